//! SOS conversation engine.
//!
//! A conversation walks one of two fixed step sequences (craving or energy).
//! Each flow is a static table of [`flow::StepSpec`] rows interpreted by a
//! single generic [`ConversationEngine`]; the [`UnifiedDispatcher`] picks the
//! flow from the client's first answer and forwards every later turn.
//!
//! The client owns the cursor: every turn names the step being entered and
//! carries the answer to the previous question. Per-conversation state lives
//! in an explicit [`ConversationContext`] that is passed into each turn.

mod core;
mod dispatcher;
mod engine;
mod flow;
mod followup;
mod lifecycle;
mod selector;
mod step;

pub use self::core::ConversationCore;
pub use dispatcher::{classify_struggle, UnifiedDispatcher};
pub use engine::{ConversationEngine, CravingEngine, EnergyEngine};
pub use flow::{CravingFlow, EnergyFlow, Field, Flow, OptionSource, StepSpec};
pub use followup::FollowUpScheduler;
pub use lifecycle::{CoachPersona, Credentials, Session, SessionManager};
pub use selector::{location_tag, InterventionSelector, Selection};
pub use step::{
    is_another_idea, rating_options, tactic_options, Choice, ConversationStep, OfferedOption,
    StaticChoice, ACCEPT_OPTION, ANOTHER_IDEA_OPTION,
};

use serde::{Deserialize, Serialize};

use crate::storage::{IncidentKind, Intervention, MessageType};

/// Facts gathered during one incident, named flow-neutrally.
///
/// Craving: `trigger` is the food, `level` the initial intensity, `context`
/// the emotional trigger and `outcome_level` the final intensity.
/// Energy: `trigger` is the blocker, `level` the energy level, `context` the
/// preferred approach and `outcome_level` the post-activity energy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SituationalFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_rating: Option<i32>,
}

/// Per-conversation state carried between turns.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session: Session,
    pub kind: IncidentKind,
    pub incident_id: String,
    pub facts: SituationalFacts,
    /// Current primary/secondary pair, set at SUGGEST_TACTIC.
    pub selection: Option<Selection>,
    /// The intervention the client accepted.
    pub chosen: Option<Intervention>,
    /// Set once the client asked for the secondary suggestion.
    pub second_round: bool,
    /// The step the client is expected to enter next.
    pub cursor: ConversationStep,
}

impl ConversationContext {
    pub fn new(session: Session, kind: IncidentKind, incident_id: impl Into<String>) -> Self {
        Self {
            session,
            kind,
            incident_id: incident_id.into(),
            facts: SituationalFacts::default(),
            selection: None,
            chosen: None,
            second_round: false,
            cursor: ConversationStep::Welcome,
        }
    }
}

/// Delayed check-in requested by a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpPlan {
    pub delay_secs: u64,
}

/// What one turn hands back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub phrased_line: String,
    /// Kind of answer the client is asked for.
    pub message_type: MessageType,
    /// Step whose line this is.
    pub step: ConversationStep,
    /// Step the client should send with its next answer.
    pub next_step: ConversationStep,
    pub offered_options: Vec<OfferedOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_interventions: Option<Vec<Intervention>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpPlan>,
    pub ended: bool,
}

/// Read a 1-10 rating out of free text.
///
/// Takes the first integer found and clamps it into range; returns `None`
/// when the text holds no digits.
pub fn parse_rating(answer: &str) -> Option<i32> {
    let digits: String = answer
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    // Absurdly long digit runs overflow; they are still "high".
    let value = digits.parse::<i64>().unwrap_or(i64::MAX);
    Some(value.clamp(1, 10) as i32)
}

/// Read a yes/no activity answer.
pub fn parse_completion(answer: &str) -> bool {
    let normalized = answer.trim().to_lowercase();
    let negative = ["not", "no", "didn't", "didnt", "couldn't", "skip"];
    if negative
        .iter()
        .any(|word| normalized.split(|c: char| !c.is_alphanumeric() && c != '\'').any(|w| w == *word))
    {
        return false;
    }
    ["yes", "did", "done", "completed", "finished", "yep", "yeah"]
        .iter()
        .any(|word| normalized.contains(word))
}
