//! Dependencies shared by every conversation.
//!
//! [`ConversationCore`] bundles the store, the response generator, the
//! intervention ranker and the conversation settings so each engine and
//! dispatcher can be built from one cheap clone.

use std::sync::Arc;

use crate::config::{ConversationConfig, GenerationPolicy};
use crate::generator::{InterventionRanker, ResponseGenerator};
use crate::storage::{IncidentKind, Storage};

/// Core infrastructure shared by all conversations.
#[derive(Clone)]
pub struct ConversationCore {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn ResponseGenerator>,
    ranker: Arc<dyn InterventionRanker>,
    config: ConversationConfig,
}

impl ConversationCore {
    pub fn new(
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ResponseGenerator>,
        ranker: Arc<dyn InterventionRanker>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            storage,
            generator,
            ranker,
            config,
        }
    }

    #[inline]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[inline]
    pub fn generator(&self) -> &Arc<dyn ResponseGenerator> {
        &self.generator
    }

    #[inline]
    pub fn ranker(&self) -> &Arc<dyn InterventionRanker> {
        &self.ranker
    }

    #[inline]
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// What to do when generation fails in a `kind` conversation.
    pub fn generation_policy(&self, kind: IncidentKind) -> GenerationPolicy {
        match kind {
            IncidentKind::Craving => self.config.craving_generation_policy,
            IncidentKind::Energy => self.config.energy_generation_policy,
        }
    }

    /// Delay before the post-suggestion check-in for `kind`.
    pub fn follow_up_delay_secs(&self, kind: IncidentKind) -> u64 {
        match kind {
            IncidentKind::Craving => self.config.craving_follow_up_secs,
            IncidentKind::Energy => self.config.energy_follow_up_secs,
        }
    }
}
