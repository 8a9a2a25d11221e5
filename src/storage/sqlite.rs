use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{
    format_ts, parse_ts, CandidateIntervention, ChatMessage, Client, ClientIntervention, Coach,
    Incident, IncidentKind, IncidentPatch, Intervention, MessageType, Sender, Storage,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const INCIDENT_COLUMNS: &str = "id, client_id, kind, created_at, day_of_week, time_of_day, \
     resolved_at, trigger_food, initial_intensity, context, final_intensity, blocker, \
     energy_level, approach, activity_completed, post_energy_level, location, \
     intervention_id, result_rating";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database (tests and dry runs).
    ///
    /// Each SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to a single connection that is never recycled.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_coach(&self, coach: &Coach) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coaches (id, name, coaching_style, tone, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&coach.id)
        .bind(&coach.name)
        .bind(&coach.coaching_style)
        .bind(&coach.tone)
        .bind(format_ts(&coach.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_coach(&self, id: &str) -> StorageResult<Option<Coach>> {
        let row: Option<CoachRow> = sqlx::query_as(
            "SELECT id, name, coaching_style, tone, created_at FROM coaches WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, coach_id, name, access_token, auth_user_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&client.id)
        .bind(&client.coach_id)
        .bind(&client.name)
        .bind(&client.access_token)
        .bind(&client.auth_user_id)
        .bind(format_ts(&client.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_client(&self, id: &str) -> StorageResult<Option<Client>> {
        self.fetch_client("id", id).await
    }

    async fn find_client_by_token(&self, token: &str) -> StorageResult<Option<Client>> {
        self.fetch_client("access_token", token).await
    }

    async fn find_client_by_auth_user(&self, user_id: &str) -> StorageResult<Option<Client>> {
        self.fetch_client("auth_user_id", user_id).await
    }

    async fn create_incident(&self, incident: &Incident) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO incidents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            INCIDENT_COLUMNS
        ))
        .bind(&incident.id)
        .bind(&incident.client_id)
        .bind(incident.kind.to_string())
        .bind(format_ts(&incident.created_at))
        .bind(&incident.day_of_week)
        .bind(&incident.time_of_day)
        .bind(incident.resolved_at.as_ref().map(format_ts))
        .bind(&incident.trigger_food)
        .bind(incident.initial_intensity)
        .bind(&incident.context)
        .bind(incident.final_intensity)
        .bind(&incident.blocker)
        .bind(incident.energy_level)
        .bind(&incident.approach)
        .bind(incident.activity_completed)
        .bind(incident.post_energy_level)
        .bind(&incident.location)
        .bind(&incident.intervention_id)
        .bind(incident.result_rating)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_incident(&self, id: &str) -> StorageResult<Option<Incident>> {
        let row: Option<IncidentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM incidents WHERE id = ?",
            INCIDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_active_incident(
        &self,
        client_id: &str,
        kind: IncidentKind,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Incident>> {
        let row: Option<IncidentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM incidents
            WHERE client_id = ? AND kind = ? AND resolved_at IS NULL AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(client_id)
        .bind(kind.to_string())
        .bind(format_ts(&since))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_incident(&self, id: &str, patch: &IncidentPatch) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE incidents SET
                trigger_food = COALESCE(?, trigger_food),
                initial_intensity = COALESCE(?, initial_intensity),
                context = COALESCE(?, context),
                final_intensity = COALESCE(?, final_intensity),
                blocker = COALESCE(?, blocker),
                energy_level = COALESCE(?, energy_level),
                approach = COALESCE(?, approach),
                activity_completed = COALESCE(?, activity_completed),
                post_energy_level = COALESCE(?, post_energy_level),
                location = COALESCE(?, location),
                intervention_id = COALESCE(?, intervention_id),
                result_rating = COALESCE(?, result_rating)
            WHERE id = ?
            "#,
        )
        .bind(&patch.trigger_food)
        .bind(patch.initial_intensity)
        .bind(&patch.context)
        .bind(patch.final_intensity)
        .bind(&patch.blocker)
        .bind(patch.energy_level)
        .bind(&patch.approach)
        .bind(patch.activity_completed)
        .bind(patch.post_energy_level)
        .bind(&patch.location)
        .bind(&patch.intervention_id)
        .bind(patch.result_rating)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::IncidentNotFound {
                incident_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn mark_incident_resolved(&self, id: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        let result =
            sqlx::query("UPDATE incidents SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL")
                .bind(format_ts(&at))
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_intervention_ids(
        &self,
        client_id: &str,
        kind: IncidentKind,
        limit: u32,
    ) -> StorageResult<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT intervention_id
            FROM incidents
            WHERE client_id = ? AND kind = ? AND intervention_id IS NOT NULL
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(client_id)
        .bind(kind.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn append_message(&self, message: &ChatMessage) -> StorageResult<()> {
        let metadata = message
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO messages (id, incident_id, incident_kind, sender, text, message_type, timestamp, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.incident_id)
        .bind(message.incident_kind.to_string())
        .bind(message.sender.to_string())
        .bind(&message.text)
        .bind(message.message_type.to_string())
        .bind(format_ts(&message.timestamp))
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_messages(
        &self,
        kind: IncidentKind,
        incident_id: &str,
    ) -> StorageResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, incident_id, incident_kind, sender, text, message_type, timestamp, metadata
            FROM messages
            WHERE incident_kind = ? AND incident_id = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(kind.to_string())
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(MessageRow::into_message).collect())
    }

    async fn create_intervention(&self, intervention: &Intervention) -> StorageResult<()> {
        let tags = serde_json::to_string(&intervention.context_tags).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO interventions (id, coach_id, kind, name, description, category, context_tags, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&intervention.id)
        .bind(&intervention.coach_id)
        .bind(intervention.kind.to_string())
        .bind(&intervention.name)
        .bind(&intervention.description)
        .bind(&intervention.category)
        .bind(&tags)
        .bind(format_ts(&intervention.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_client_intervention(&self, row: &ClientIntervention) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_interventions
                (client_id, intervention_id, active, favorite, times_used, last_used_at, effectiveness_rating, coach_notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (client_id, intervention_id) DO UPDATE SET
                active = excluded.active,
                favorite = excluded.favorite,
                times_used = excluded.times_used,
                last_used_at = excluded.last_used_at,
                effectiveness_rating = excluded.effectiveness_rating,
                coach_notes = excluded.coach_notes
            "#,
        )
        .bind(&row.client_id)
        .bind(&row.intervention_id)
        .bind(row.active)
        .bind(row.favorite)
        .bind(row.times_used)
        .bind(row.last_used_at.as_ref().map(format_ts))
        .bind(row.effectiveness_rating)
        .bind(&row.coach_notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_client_interventions(
        &self,
        client_id: &str,
        kind: IncidentKind,
        active_only: bool,
    ) -> StorageResult<Vec<CandidateIntervention>> {
        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT i.id, i.coach_id, i.kind, i.name, i.description, i.category, i.context_tags, i.created_at,
                   COALESCE(ci.active, 1) AS active,
                   COALESCE(ci.favorite, 0) AS favorite,
                   COALESCE(ci.times_used, 0) AS times_used,
                   ci.last_used_at,
                   ci.effectiveness_rating
            FROM clients c
            JOIN interventions i ON i.coach_id = c.coach_id
            LEFT JOIN client_interventions ci
                   ON ci.intervention_id = i.id AND ci.client_id = c.id
            WHERE c.id = ? AND i.kind = ? AND (? = 0 OR COALESCE(ci.active, 1) = 1)
            ORDER BY COALESCE(ci.favorite, 0) DESC, i.rowid ASC
            "#,
        )
        .bind(client_id)
        .bind(kind.to_string())
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(CandidateRow::into_candidate).collect())
    }

    async fn record_intervention_use(
        &self,
        client_id: &str,
        intervention_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_interventions (client_id, intervention_id, times_used, last_used_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (client_id, intervention_id) DO UPDATE SET
                times_used = times_used + 1,
                last_used_at = excluded.last_used_at
            "#,
        )
        .bind(client_id)
        .bind(intervention_id)
        .bind(format_ts(&at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn rate_intervention(
        &self,
        client_id: &str,
        intervention_id: &str,
        rating: i32,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_interventions (client_id, intervention_id, effectiveness_rating)
            VALUES (?, ?, ?)
            ON CONFLICT (client_id, intervention_id) DO UPDATE SET
                effectiveness_rating = excluded.effectiveness_rating
            "#,
        )
        .bind(client_id)
        .bind(intervention_id)
        .bind(rating)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SqliteStorage {
    async fn fetch_client(&self, column: &str, value: &str) -> StorageResult<Option<Client>> {
        // `column` is always one of the fixed names passed by the trait methods above.
        let row: Option<ClientRow> = sqlx::query_as(&format!(
            "SELECT id, coach_id, name, access_token, auth_user_id, created_at FROM clients WHERE {} = ?",
            column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct CoachRow {
    id: String,
    name: String,
    coaching_style: Option<String>,
    tone: Option<String>,
    created_at: String,
}

impl From<CoachRow> for Coach {
    fn from(row: CoachRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            coaching_style: row.coaching_style,
            tone: row.tone,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    coach_id: String,
    name: String,
    access_token: Option<String>,
    auth_user_id: Option<String>,
    created_at: String,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Self {
            id: row.id,
            coach_id: row.coach_id,
            name: row.name,
            access_token: row.access_token,
            auth_user_id: row.auth_user_id,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    client_id: String,
    kind: String,
    created_at: String,
    day_of_week: String,
    time_of_day: String,
    resolved_at: Option<String>,
    trigger_food: Option<String>,
    initial_intensity: Option<i32>,
    context: Option<String>,
    final_intensity: Option<i32>,
    blocker: Option<String>,
    energy_level: Option<i32>,
    approach: Option<String>,
    activity_completed: Option<bool>,
    post_energy_level: Option<i32>,
    location: Option<String>,
    intervention_id: Option<String>,
    result_rating: Option<i32>,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        Self {
            kind: row.kind.parse().unwrap_or_else(|e| {
                warn!(incident_id = %row.id, error = %e, "Unknown incident kind in store");
                IncidentKind::Craving
            }),
            id: row.id,
            client_id: row.client_id,
            created_at: parse_ts(&row.created_at),
            day_of_week: row.day_of_week,
            time_of_day: row.time_of_day,
            resolved_at: row.resolved_at.as_deref().map(parse_ts),
            trigger_food: row.trigger_food,
            initial_intensity: row.initial_intensity,
            context: row.context,
            final_intensity: row.final_intensity,
            blocker: row.blocker,
            energy_level: row.energy_level,
            approach: row.approach,
            activity_completed: row.activity_completed,
            post_energy_level: row.post_energy_level,
            location: row.location,
            intervention_id: row.intervention_id,
            result_rating: row.result_rating,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    incident_id: String,
    incident_kind: String,
    sender: String,
    text: String,
    message_type: String,
    timestamp: String,
    metadata: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> Option<ChatMessage> {
        let parsed = (
            self.incident_kind.parse::<IncidentKind>(),
            self.sender.parse::<Sender>(),
            self.message_type.parse::<MessageType>(),
        );
        match parsed {
            (Ok(incident_kind), Ok(sender), Ok(message_type)) => Some(ChatMessage {
                id: self.id,
                incident_id: self.incident_id,
                incident_kind,
                sender,
                text: self.text,
                message_type,
                timestamp: parse_ts(&self.timestamp),
                metadata: self.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            }),
            _ => {
                warn!(message_id = %self.id, "Skipping message row with unknown tags");
                None
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: String,
    coach_id: String,
    kind: String,
    name: String,
    description: String,
    category: Option<String>,
    context_tags: String,
    created_at: String,
    active: bool,
    favorite: bool,
    times_used: i32,
    last_used_at: Option<String>,
    effectiveness_rating: Option<i32>,
}

impl CandidateRow {
    fn into_candidate(self) -> Option<CandidateIntervention> {
        let kind = match self.kind.parse::<IncidentKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(intervention_id = %self.id, error = %e, "Skipping intervention row");
                return None;
            }
        };

        Some(CandidateIntervention {
            intervention: Intervention {
                id: self.id,
                coach_id: self.coach_id,
                kind,
                name: self.name,
                description: self.description,
                category: self.category,
                context_tags: serde_json::from_str(&self.context_tags).unwrap_or_default(),
                created_at: parse_ts(&self.created_at),
            },
            active: self.active,
            favorite: self.favorite,
            times_used: self.times_used,
            last_used_at: self.last_used_at.as_deref().map(parse_ts),
            effectiveness_rating: self.effectiveness_rating,
        })
    }
}
