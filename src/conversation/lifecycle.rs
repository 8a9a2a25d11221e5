//! Client identity resolution and incident lifecycle.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppResult, ConversationError};
use crate::storage::{Client, Coach, Incident, IncidentKind, IncidentPatch, Storage};

/// Identity hints supplied by the client app, tried in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    /// Client id remembered from an earlier successful resolution.
    #[serde(default)]
    pub cached_client_id: Option<String>,
    #[serde(default)]
    pub auth_user_id: Option<String>,
}

/// How the coach speaks, passed to the response generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachPersona {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coaching_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

impl Default for CoachPersona {
    fn default() -> Self {
        Self {
            name: "your coach".to_string(),
            coaching_style: None,
            tone: None,
        }
    }
}

impl From<Coach> for CoachPersona {
    fn from(coach: Coach) -> Self {
        Self {
            name: coach.name,
            coaching_style: coach.coaching_style,
            tone: coach.tone,
        }
    }
}

/// A resolved client and their coach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub client_id: String,
    pub coach_id: String,
    pub client_name: String,
    pub coach: CoachPersona,
    /// Access token the client is known by, if any.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

/// Resolves identity and owns incident creation and updates.
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    active_window: Duration,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn Storage>, active_window_minutes: i64) -> Self {
        Self {
            storage,
            active_window: Duration::minutes(active_window_minutes),
        }
    }

    /// Resolve the client behind `credentials`.
    ///
    /// Tries the access token, then the cached client id, then the auth user
    /// id. On success the resolved id is written back to `cached_client_id`.
    pub async fn resolve_identity(&self, credentials: &mut Credentials) -> AppResult<Session> {
        let client = match self.lookup_client(credentials).await {
            Some(client) => client,
            None => {
                warn!("No client matched the supplied credentials");
                return Err(ConversationError::Unauthenticated.into());
            }
        };

        let coach = match self.storage.get_coach(&client.coach_id).await {
            Ok(Some(coach)) => CoachPersona::from(coach),
            Ok(None) => {
                warn!(coach_id = %client.coach_id, "Coach not found, using default persona");
                CoachPersona::default()
            }
            Err(e) => {
                warn!(error = %e, coach_id = %client.coach_id, "Coach lookup failed, using default persona");
                CoachPersona::default()
            }
        };

        credentials.cached_client_id = Some(client.id.clone());
        info!(client_id = %client.id, "Client resolved");

        Ok(Session {
            client_id: client.id,
            coach_id: client.coach_id,
            client_name: client.name,
            coach,
            token: client.access_token,
        })
    }

    async fn lookup_client(&self, credentials: &Credentials) -> Option<Client> {
        if let Some(token) = non_empty(&credentials.access_token) {
            match self.storage.find_client_by_token(token).await {
                Ok(Some(client)) => return Some(client),
                Ok(None) => debug!("Access token did not match a client"),
                Err(e) => warn!(error = %e, "Token lookup failed"),
            }
        }

        if let Some(client_id) = non_empty(&credentials.cached_client_id) {
            match self.storage.get_client(client_id).await {
                Ok(Some(client)) => return Some(client),
                Ok(None) => debug!(client_id = %client_id, "Cached client id is stale"),
                Err(e) => warn!(error = %e, "Cached client lookup failed"),
            }
        }

        if let Some(user_id) = non_empty(&credentials.auth_user_id) {
            match self.storage.find_client_by_auth_user(user_id).await {
                Ok(Some(client)) => return Some(client),
                Ok(None) => debug!("Auth user did not match a client"),
                Err(e) => warn!(error = %e, "Auth user lookup failed"),
            }
        }

        None
    }

    /// Reuse the client's active incident of `kind` or open a new one.
    pub async fn ensure_incident(&self, client_id: &str, kind: IncidentKind) -> AppResult<String> {
        let since = Utc::now() - self.active_window;
        let existing = self
            .storage
            .find_active_incident(client_id, kind, since)
            .await
            .map_err(|e| ConversationError::IncidentCreationFailed {
                message: e.to_string(),
            })?;

        if let Some(incident) = existing {
            info!(incident_id = %incident.id, %kind, "Reusing active incident");
            return Ok(incident.id);
        }

        let incident = Incident::new(client_id, kind);
        self.storage
            .create_incident(&incident)
            .await
            .map_err(|e| ConversationError::IncidentCreationFailed {
                message: e.to_string(),
            })?;

        info!(incident_id = %incident.id, %kind, "Incident created");
        Ok(incident.id)
    }

    /// Write answered fields. Failures are logged and reported as `false`.
    pub async fn update_incident(&self, incident_id: &str, patch: &IncidentPatch) -> bool {
        match self.storage.update_incident(incident_id, patch).await {
            Ok(()) => true,
            Err(e) => {
                let err = ConversationError::PersistenceWriteFailed {
                    field: patch.field_names(),
                    message: e.to_string(),
                };
                warn!(
                    error = %err,
                    incident_id = %incident_id,
                    "Incident update failed, conversation continues"
                );
                false
            }
        }
    }

    /// Set the resolution time once. Returns whether this call resolved it.
    pub async fn mark_resolved(&self, incident_id: &str) -> bool {
        match self.storage.mark_incident_resolved(incident_id, Utc::now()).await {
            Ok(resolved) => {
                if resolved {
                    info!(incident_id = %incident_id, "Incident resolved");
                }
                resolved
            }
            Err(e) => {
                warn!(error = %e, incident_id = %incident_id, "Failed to resolve incident");
                false
            }
        }
    }

    /// Whether the incident has been resolved. Unknown incidents count as resolved.
    pub async fn is_resolved(&self, incident_id: &str) -> bool {
        match self.storage.get_incident(incident_id).await {
            Ok(Some(incident)) => incident.is_resolved(),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, incident_id = %incident_id, "Incident lookup failed");
                true
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::SqliteStorage;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<SqliteStorage>, SessionManager, Client) {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let coach = Coach::new("Dana").with_tone("warm");
        storage.create_coach(&coach).await.unwrap();
        let client = Client::new(&coach.id, "Sam")
            .with_access_token("tok-123")
            .with_auth_user("auth-9");
        storage.create_client(&client).await.unwrap();
        let manager = SessionManager::new(storage.clone(), 60);
        (storage, manager, client)
    }

    #[tokio::test]
    async fn test_resolve_by_token_caches_client_id() {
        let (_storage, manager, client) = setup().await;
        let mut creds = Credentials {
            access_token: Some("tok-123".to_string()),
            ..Default::default()
        };
        let session = manager.resolve_identity(&mut creds).await.unwrap();
        assert_eq!(session.client_id, client.id);
        assert_eq!(session.client_name, "Sam");
        assert_eq!(session.coach.name, "Dana");
        assert_eq!(session.coach.tone.as_deref(), Some("warm"));
        assert_eq!(creds.cached_client_id, Some(client.id));
    }

    #[tokio::test]
    async fn test_resolve_falls_through_to_auth_user() {
        let (_storage, manager, client) = setup().await;
        let mut creds = Credentials {
            access_token: Some("expired".to_string()),
            cached_client_id: Some("gone".to_string()),
            auth_user_id: Some("auth-9".to_string()),
        };
        let session = manager.resolve_identity(&mut creds).await.unwrap();
        assert_eq!(session.client_id, client.id);
    }

    #[tokio::test]
    async fn test_resolve_with_cached_id() {
        let (_storage, manager, client) = setup().await;
        let mut creds = Credentials {
            cached_client_id: Some(client.id.clone()),
            ..Default::default()
        };
        assert_eq!(
            manager.resolve_identity(&mut creds).await.unwrap().client_id,
            client.id
        );
    }

    #[tokio::test]
    async fn test_resolve_without_match_is_unauthenticated() {
        let (_storage, manager, _client) = setup().await;
        let mut creds = Credentials::default();
        let err = manager.resolve_identity(&mut creds).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Conversation(ConversationError::Unauthenticated)
        ));
        assert!(creds.cached_client_id.is_none());
    }

    #[tokio::test]
    async fn test_ensure_incident_reuses_active() {
        let (_storage, manager, client) = setup().await;
        let first = manager
            .ensure_incident(&client.id, IncidentKind::Craving)
            .await
            .unwrap();
        let second = manager
            .ensure_incident(&client.id, IncidentKind::Craving)
            .await
            .unwrap();
        assert_eq!(first, second);

        let other_kind = manager
            .ensure_incident(&client.id, IncidentKind::Energy)
            .await
            .unwrap();
        assert_ne!(first, other_kind);
    }

    #[tokio::test]
    async fn test_ensure_incident_ignores_stale_and_resolved() {
        let (storage, manager, client) = setup().await;
        let stale = Incident::new(&client.id, IncidentKind::Craving)
            .with_created_at(Utc::now() - Duration::minutes(61));
        storage.create_incident(&stale).await.unwrap();

        let fresh = manager
            .ensure_incident(&client.id, IncidentKind::Craving)
            .await
            .unwrap();
        assert_ne!(fresh, stale.id);

        assert!(manager.mark_resolved(&fresh).await);
        let next = manager
            .ensure_incident(&client.id, IncidentKind::Craving)
            .await
            .unwrap();
        assert_ne!(next, fresh);
    }

    #[tokio::test]
    async fn test_ensure_incident_for_unknown_client_fails() {
        let (_storage, manager, _client) = setup().await;
        let err = manager
            .ensure_incident("nobody", IncidentKind::Energy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Conversation(ConversationError::IncidentCreationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_resolved_only_once() {
        let (storage, manager, client) = setup().await;
        let id = manager
            .ensure_incident(&client.id, IncidentKind::Craving)
            .await
            .unwrap();
        assert!(!manager.is_resolved(&id).await);

        assert!(manager.mark_resolved(&id).await);
        let first = storage.get_incident(&id).await.unwrap().unwrap().resolved_at;

        assert!(!manager.mark_resolved(&id).await);
        let second = storage.get_incident(&id).await.unwrap().unwrap().resolved_at;
        assert_eq!(first, second);
        assert!(manager.is_resolved(&id).await);
    }

    #[tokio::test]
    async fn test_update_unknown_incident_reports_false() {
        let (_storage, manager, _client) = setup().await;
        let patch = IncidentPatch {
            location: Some("Home".to_string()),
            ..Default::default()
        };
        assert!(!manager.update_incident("missing", &patch).await);
    }
}
