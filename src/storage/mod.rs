//! Storage layer for SOS incidents, their message log and the intervention catalog.
//!
//! The [`Storage`] trait is the boundary the conversation core talks to;
//! [`SqliteStorage`] is the production implementation.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Which SOS flow an incident (or intervention) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Food craving support.
    Craving,
    /// Low-energy / movement support.
    Energy,
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentKind::Craving => write!(f, "craving"),
            IncidentKind::Energy => write!(f, "energy"),
        }
    }
}

impl std::str::FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "craving" => Ok(IncidentKind::Craving),
            "energy" | "movement" => Ok(IncidentKind::Energy),
            _ => Err(format!("Unknown incident kind: {}", s)),
        }
    }
}

/// A coach and the persona fields handed to the response generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coach {
    pub id: String,
    pub name: String,
    /// Free-form description of how the coach works (e.g. "gentle, curious").
    pub coaching_style: Option<String>,
    /// Preferred tone of voice for phrased replies.
    pub tone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Coach {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            coaching_style: None,
            tone: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.coaching_style = Some(style.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }
}

/// A coached client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub coach_id: String,
    pub name: String,
    /// Token from the coach's invite link.
    pub access_token: Option<String>,
    /// Id of the authenticated account, when the client signed in.
    pub auth_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(coach_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            coach_id: coach_id.into(),
            name: name.into(),
            access_token: None,
            auth_user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_auth_user(mut self, user_id: impl Into<String>) -> Self {
        self.auth_user_id = Some(user_id.into());
        self
    }
}

/// A single SOS support session.
///
/// Craving and energy incidents share one record shape; fields that belong
/// to the other flow stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub client_id: String,
    pub kind: IncidentKind,
    pub created_at: DateTime<Utc>,
    /// Captured at creation, e.g. "Tuesday".
    pub day_of_week: String,
    /// Captured at creation: morning, afternoon, evening or night.
    pub time_of_day: String,
    pub resolved_at: Option<DateTime<Utc>>,
    // craving
    pub trigger_food: Option<String>,
    pub initial_intensity: Option<i32>,
    pub context: Option<String>,
    pub final_intensity: Option<i32>,
    // energy
    pub blocker: Option<String>,
    pub energy_level: Option<i32>,
    pub approach: Option<String>,
    pub activity_completed: Option<bool>,
    pub post_energy_level: Option<i32>,
    // shared
    pub location: Option<String>,
    pub intervention_id: Option<String>,
    pub result_rating: Option<i32>,
}

impl Incident {
    /// Create a new unresolved incident stamped with the local day and time of day.
    pub fn new(client_id: impl Into<String>, kind: IncidentKind) -> Self {
        let local = Local::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            kind,
            created_at: Utc::now(),
            day_of_week: day_of_week(&local),
            time_of_day: time_of_day(local.hour()),
            resolved_at: None,
            trigger_food: None,
            initial_intensity: None,
            context: None,
            final_intensity: None,
            blocker: None,
            energy_level: None,
            approach: None,
            activity_completed: None,
            post_energy_level: None,
            location: None,
            intervention_id: None,
            result_rating: None,
        }
    }

    /// Override the creation time (used for backfills and window tests).
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Full weekday name for a timestamp, e.g. "Tuesday".
pub fn day_of_week<Tz: chrono::TimeZone>(at: &DateTime<Tz>) -> String {
    match at.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
    .to_string()
}

/// Bucket an hour (0-23) into a time-of-day label.
pub fn time_of_day(hour: u32) -> String {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    }
    .to_string()
}

/// Sparse update of incident fields. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPatch {
    pub trigger_food: Option<String>,
    pub initial_intensity: Option<i32>,
    pub context: Option<String>,
    pub final_intensity: Option<i32>,
    pub blocker: Option<String>,
    pub energy_level: Option<i32>,
    pub approach: Option<String>,
    pub activity_completed: Option<bool>,
    pub post_energy_level: Option<i32>,
    pub location: Option<String>,
    pub intervention_id: Option<String>,
    pub result_rating: Option<i32>,
}

impl IncidentPatch {
    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self == &IncidentPatch::default()
    }

    /// Comma-separated names of the fields this patch sets.
    pub fn field_names(&self) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, _)| key)
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }
}

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Coach,
    Client,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::Coach => write!(f, "coach"),
            Sender::Client => write!(f, "client"),
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach" => Ok(Sender::Coach),
            "client" => Ok(Sender::Client),
            _ => Err(format!("Unknown sender: {}", s)),
        }
    }
}

/// Tag describing what a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    OptionSelection,
    IntensityRating,
    LocationSelection,
    TacticResponse,
    FollowupResponse,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Text => "text",
            MessageType::OptionSelection => "option_selection",
            MessageType::IntensityRating => "intensity_rating",
            MessageType::LocationSelection => "location_selection",
            MessageType::TacticResponse => "tactic_response",
            MessageType::FollowupResponse => "followup_response",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "option_selection" => Ok(MessageType::OptionSelection),
            "intensity_rating" => Ok(MessageType::IntensityRating),
            "location_selection" => Ok(MessageType::LocationSelection),
            "tactic_response" => Ok(MessageType::TacticResponse),
            "followup_response" => Ok(MessageType::FollowupResponse),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// One conversational turn, owned by exactly one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub incident_id: String,
    pub incident_kind: IncidentKind,
    pub sender: Sender,
    pub text: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    /// Side-channel instructions, e.g. `{"resolve_incident": true}`.
    pub metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn new(
        incident_id: impl Into<String>,
        incident_kind: IncidentKind,
        sender: Sender,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id: incident_id.into(),
            incident_kind,
            sender,
            text: text.into(),
            message_type: MessageType::Text,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A coach-authored strategy in the global catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: String,
    pub coach_id: String,
    pub kind: IncidentKind,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    /// Location/situation labels; empty means untagged (eligible everywhere).
    #[serde(default)]
    pub context_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Intervention {
    pub fn new(
        coach_id: impl Into<String>,
        kind: IncidentKind,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            coach_id: coach_id.into(),
            kind,
            name: name.into(),
            description: description.into(),
            category: None,
            context_tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-client override of a catalog intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientIntervention {
    pub client_id: String,
    pub intervention_id: String,
    pub active: bool,
    pub favorite: bool,
    pub times_used: i32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub effectiveness_rating: Option<i32>,
    pub coach_notes: Option<String>,
}

impl ClientIntervention {
    pub fn new(client_id: impl Into<String>, intervention_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            intervention_id: intervention_id.into(),
            active: true,
            favorite: false,
            times_used: 0,
            last_used_at: None,
            effectiveness_rating: None,
            coach_notes: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn favorite(mut self) -> Self {
        self.favorite = true;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.coach_notes = Some(notes.into());
        self
    }
}

/// A catalog intervention joined with the client's override row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIntervention {
    pub intervention: Intervention,
    pub active: bool,
    pub favorite: bool,
    pub times_used: i32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub effectiveness_rating: Option<i32>,
}

impl CandidateIntervention {
    pub fn id(&self) -> &str {
        &self.intervention.id
    }

    pub fn name(&self) -> &str {
        &self.intervention.name
    }
}

impl From<Intervention> for CandidateIntervention {
    fn from(intervention: Intervention) -> Self {
        Self {
            intervention,
            active: true,
            favorite: false,
            times_used: 0,
            last_used_at: None,
            effectiveness_rating: None,
        }
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
pub(crate) fn format_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Storage trait for the incident store and intervention catalog.
#[async_trait]
pub trait Storage: Send + Sync {
    // Identity records

    /// Create a coach.
    async fn create_coach(&self, coach: &Coach) -> StorageResult<()>;
    /// Get a coach by ID.
    async fn get_coach(&self, id: &str) -> StorageResult<Option<Coach>>;
    /// Create a client.
    async fn create_client(&self, client: &Client) -> StorageResult<()>;
    /// Get a client by ID.
    async fn get_client(&self, id: &str) -> StorageResult<Option<Client>>;
    /// Look up a client by invite access token.
    async fn find_client_by_token(&self, token: &str) -> StorageResult<Option<Client>>;
    /// Look up a client by authenticated account id.
    async fn find_client_by_auth_user(&self, user_id: &str) -> StorageResult<Option<Client>>;

    // Incidents

    /// Insert a new incident row.
    async fn create_incident(&self, incident: &Incident) -> StorageResult<()>;
    /// Get an incident by ID.
    async fn get_incident(&self, id: &str) -> StorageResult<Option<Incident>>;
    /// Most recent unresolved incident of `kind` created at or after `since`.
    async fn find_active_incident(
        &self,
        client_id: &str,
        kind: IncidentKind,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Incident>>;
    /// Apply a sparse field update.
    async fn update_incident(&self, id: &str, patch: &IncidentPatch) -> StorageResult<()>;
    /// Set `resolved_at` if still null. Returns whether the incident transitioned.
    async fn mark_incident_resolved(&self, id: &str, at: DateTime<Utc>) -> StorageResult<bool>;
    /// Intervention ids chosen in the client's most recent incidents of `kind`.
    async fn recent_intervention_ids(
        &self,
        client_id: &str,
        kind: IncidentKind,
        limit: u32,
    ) -> StorageResult<Vec<String>>;

    // Message log

    /// Append a message to an incident's log.
    async fn append_message(&self, message: &ChatMessage) -> StorageResult<()>;
    /// Messages of an incident in conversation order.
    async fn list_messages(
        &self,
        kind: IncidentKind,
        incident_id: &str,
    ) -> StorageResult<Vec<ChatMessage>>;

    // Intervention catalog

    /// Add an intervention to a coach's catalog.
    async fn create_intervention(&self, intervention: &Intervention) -> StorageResult<()>;
    /// Insert or replace a client's override row.
    async fn upsert_client_intervention(&self, row: &ClientIntervention) -> StorageResult<()>;
    /// The coach's catalog of `kind` joined to the client's overrides.
    async fn list_client_interventions(
        &self,
        client_id: &str,
        kind: IncidentKind,
        active_only: bool,
    ) -> StorageResult<Vec<CandidateIntervention>>;
    /// Count one more use of an intervention by a client.
    async fn record_intervention_use(
        &self,
        client_id: &str,
        intervention_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;
    /// Store the latest effectiveness rating a client gave an intervention.
    async fn rate_intervention(
        &self,
        client_id: &str,
        intervention_id: &str,
        rating: i32,
    ) -> StorageResult<()>;
}
