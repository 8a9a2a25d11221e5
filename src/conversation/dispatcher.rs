//! Entry point for a client conversation.
//!
//! The dispatcher resolves the client, asks which struggle they are facing,
//! builds the matching engine on the first answer and forwards every later
//! turn to it unchanged.

use tracing::{debug, info};

use super::engine::{CravingEngine, EnergyEngine};
use super::lifecycle::{Credentials, Session, SessionManager};
use super::step::{ConversationStep, OfferedOption, StaticChoice};
use super::{ConversationContext, ConversationCore, TurnResponse};
use crate::error::{AppResult, ConversationError};
use crate::generator::{fallback_line, GenerationContext};
use crate::storage::{ChatMessage, IncidentKind, MessageType};

const STRUGGLE_CHOICES: &[StaticChoice] = &[
    StaticChoice::valued("🍫", "I'm having a craving", "craving"),
    StaticChoice::valued("⚡", "I'm low on energy", "energy"),
];

const REASK_LINE: &str = "Sorry, I didn't quite catch that. Is it a craving, or are you low on energy?";

const CRAVING_WORDS: &[&str] = &["crav", "hungry", "snack", "eat", "sugar", "chocolate", "sweet"];
const ENERGY_WORDS: &[&str] = &[
    "tired", "energy", "exhausted", "motivat", "lazy", "sluggish", "move", "moving", "exercise",
    "workout",
];

/// Pick a flow from the client's answer to the struggle question.
///
/// Option values match exactly; free text is matched on word prefixes, with
/// craving words taking precedence.
pub fn classify_struggle(input: &str) -> Option<IncidentKind> {
    let normalized = input.trim().to_lowercase();
    if let Ok(kind) = normalized.parse::<IncidentKind>() {
        return Some(kind);
    }

    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |vocabulary: &[&str]| {
        words
            .iter()
            .any(|word| vocabulary.iter().any(|prefix| word.starts_with(prefix)))
    };

    if mentions(CRAVING_WORDS) {
        Some(IncidentKind::Craving)
    } else if mentions(ENERGY_WORDS) {
        Some(IncidentKind::Energy)
    } else {
        None
    }
}

enum ActiveEngine {
    Craving(CravingEngine),
    Energy(EnergyEngine),
}

struct ActiveConversation {
    engine: ActiveEngine,
    ctx: ConversationContext,
}

impl ActiveConversation {
    async fn advance(&mut self, step: ConversationStep, input: &str) -> AppResult<TurnResponse> {
        match &self.engine {
            ActiveEngine::Craving(engine) => engine.advance(step, input, &mut self.ctx).await,
            ActiveEngine::Energy(engine) => engine.advance(step, input, &mut self.ctx).await,
        }
    }

    async fn follow_up(&mut self) -> AppResult<Option<TurnResponse>> {
        match &self.engine {
            ActiveEngine::Craving(engine) => engine.follow_up(&mut self.ctx).await,
            ActiveEngine::Energy(engine) => engine.follow_up(&mut self.ctx).await,
        }
    }
}

/// One client conversation, from identity to the chosen flow's last step.
pub struct UnifiedDispatcher {
    core: ConversationCore,
    lifecycle: SessionManager,
    credentials: Credentials,
    session: Option<Session>,
    active: Option<ActiveConversation>,
}

impl UnifiedDispatcher {
    pub fn new(core: ConversationCore, credentials: Credentials) -> Self {
        let lifecycle = SessionManager::new(
            core.storage().clone(),
            core.config().active_incident_window_minutes,
        );
        Self {
            core,
            lifecycle,
            credentials,
            session: None,
            active: None,
        }
    }

    /// Credentials as updated by identity resolution (cached client id).
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Kind and id of the incident once a flow has been chosen.
    pub fn incident(&self) -> Option<(IncidentKind, &str)> {
        self.active
            .as_ref()
            .map(|active| (active.ctx.kind, active.ctx.incident_id.as_str()))
    }

    /// Resolve the client and ask which struggle they are facing.
    pub async fn start(&mut self) -> AppResult<TurnResponse> {
        let session = self.ensure_session().await?.clone();
        // Both flows share the struggle question.
        let gen = GenerationContext::new(
            IncidentKind::Craving,
            ConversationStep::IdentifyStruggle,
            session.client_name,
            session.coach,
        );
        Ok(Self::struggle_prompt(fallback_line(&gen)))
    }

    /// Handle one client turn.
    pub async fn handle_turn(
        &mut self,
        step: ConversationStep,
        input: &str,
    ) -> AppResult<TurnResponse> {
        if step == ConversationStep::IdentifyStruggle {
            return self.fork(input).await;
        }

        match self.active.as_mut() {
            Some(active) => active.advance(step, input).await,
            None => Err(ConversationError::Validation {
                field: "step".to_string(),
                reason: format!("{} sent before a flow was chosen", step),
            }
            .into()),
        }
    }

    /// Run the chosen engine's delayed check-in, if still relevant.
    pub async fn follow_up(&mut self) -> AppResult<Option<TurnResponse>> {
        match self.active.as_mut() {
            Some(active) => active.follow_up().await,
            None => Ok(None),
        }
    }

    /// Messages logged for the active incident so far.
    pub async fn history(&self) -> AppResult<Vec<ChatMessage>> {
        match self.incident() {
            Some((kind, incident_id)) => Ok(self
                .core
                .storage()
                .list_messages(kind, incident_id)
                .await?),
            None => Ok(Vec::new()),
        }
    }

    async fn ensure_session(&mut self) -> AppResult<&Session> {
        if self.session.is_none() {
            let session = self.lifecycle.resolve_identity(&mut self.credentials).await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| ConversationError::Unauthenticated.into())
    }

    async fn fork(&mut self, input: &str) -> AppResult<TurnResponse> {
        if let Some((kind, _)) = self.incident() {
            return Err(ConversationError::Validation {
                field: "step".to_string(),
                reason: format!("the {} flow has already been chosen", kind),
            }
            .into());
        }

        let session = self.ensure_session().await?.clone();
        let Some(kind) = classify_struggle(input) else {
            debug!("Struggle answer not recognised, asking again");
            return Ok(Self::struggle_prompt(REASK_LINE.to_string()));
        };

        info!(client_id = %session.client_id, %kind, "Flow chosen");
        let (engine, (ctx, response)) = match kind {
            IncidentKind::Craving => {
                let engine = CravingEngine::new(self.core.clone());
                let started = engine.begin(session).await?;
                (ActiveEngine::Craving(engine), started)
            }
            IncidentKind::Energy => {
                let engine = EnergyEngine::new(self.core.clone());
                let started = engine.begin(session).await?;
                (ActiveEngine::Energy(engine), started)
            }
        };

        self.active = Some(ActiveConversation { engine, ctx });
        Ok(response)
    }

    fn struggle_prompt(line: String) -> TurnResponse {
        TurnResponse {
            phrased_line: line,
            message_type: MessageType::OptionSelection,
            step: ConversationStep::IdentifyStruggle,
            next_step: ConversationStep::IdentifyStruggle,
            offered_options: STRUGGLE_CHOICES.iter().map(OfferedOption::from).collect(),
            selected_interventions: None,
            follow_up: None,
            ended: false,
        }
    }
}
