//! Server module for the SOS conversation protocol.
//!
//! This module provides:
//! - JSON-RPC 2.0 over stdio (newline-delimited)
//! - Method handlers and routing
//! - Shared application state with the live conversations

mod handlers;
mod rpc;

pub use handlers::*;
pub use rpc::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::conversation::{ConversationCore, FollowUpScheduler, UnifiedDispatcher};
use crate::generator::{InterventionRanker, LangbaseGenerator, LangbaseRanker, ResponseGenerator};
use crate::langbase::LangbaseClient;
use crate::storage::Storage;

/// A live conversation, locked for the duration of each turn.
pub type ConversationHandle = Arc<Mutex<UnifiedDispatcher>>;

struct LiveConversation {
    handle: ConversationHandle,
    last_active: Instant,
}

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Incident store and intervention catalog.
    pub storage: Arc<dyn Storage>,
    /// Dependencies handed to every new conversation.
    pub core: ConversationCore,
    /// Deferred check-ins.
    pub scheduler: FollowUpScheduler,
    conversations: Mutex<HashMap<String, LiveConversation>>,
}

impl AppState {
    /// Create state around explicit generator and ranker implementations.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ResponseGenerator>,
        ranker: Arc<dyn InterventionRanker>,
    ) -> Self {
        let core = ConversationCore::new(
            storage.clone(),
            generator,
            ranker,
            config.conversation.clone(),
        );
        Self {
            config,
            storage,
            core,
            scheduler: FollowUpScheduler::new(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Create state backed by the Langbase pipes named in the config.
    pub fn with_langbase(config: Config, storage: Arc<dyn Storage>, langbase: LangbaseClient) -> Self {
        tracing::info!(
            response_pipe = %config.pipes.response,
            ranker_pipe = %config.pipes.ranker,
            "AppState initializing with pipe configuration"
        );

        let generator = Arc::new(LangbaseGenerator::new(
            langbase.clone(),
            config.pipes.response.clone(),
        ));
        let ranker = Arc::new(LangbaseRanker::new(langbase, config.pipes.ranker.clone()));
        Self::new(config, storage, generator, ranker)
    }

    /// Register a conversation under `id`.
    pub async fn insert_conversation(&self, id: impl Into<String>, dispatcher: UnifiedDispatcher) {
        let live = LiveConversation {
            handle: Arc::new(Mutex::new(dispatcher)),
            last_active: Instant::now(),
        };
        self.conversations.lock().await.insert(id.into(), live);
    }

    /// Look up a live conversation and mark it active.
    pub async fn conversation(&self, id: &str) -> Option<ConversationHandle> {
        let mut conversations = self.conversations.lock().await;
        let live = conversations.get_mut(id)?;
        live.last_active = Instant::now();
        Some(live.handle.clone())
    }

    /// Forget a conversation. Scheduled check-ins keep their own handle.
    pub async fn remove_conversation(&self, id: &str) -> bool {
        self.conversations.lock().await.remove(id).is_some()
    }

    /// Drop conversations untouched for longer than `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut conversations = self.conversations.lock().await;
        let before = conversations.len();
        conversations.retain(|_, live| live.last_active.elapsed() <= max_idle);
        let evicted = before - conversations.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = conversations.len(), "Evicted idle conversations");
        }
        evicted
    }

    /// How long a conversation may sit unanswered before it is evicted.
    pub fn idle_limit(&self) -> Duration {
        let minutes = self.config.conversation.active_incident_window_minutes.max(0) as u64;
        Duration::from_secs(minutes * 60)
    }

    /// Number of live conversations.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
