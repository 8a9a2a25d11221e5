//! Generic step-table interpreter shared by both SOS flows.

use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::{debug, error, info, warn};

use super::flow::{CravingFlow, EnergyFlow, Field, Flow, OptionSource, StepSpec};
use super::lifecycle::{Session, SessionManager};
use super::selector::InterventionSelector;
use super::step::{is_another_idea, rating_options, tactic_options, ConversationStep, OfferedOption};
use super::{
    parse_completion, parse_rating, ConversationContext, ConversationCore, FollowUpPlan,
    SituationalFacts, TurnResponse,
};
use crate::config::GenerationPolicy;
use crate::error::{AppResult, ConversationError};
use crate::generator::{fallback_line, GenerationContext};
use crate::langbase::CoachReply;
use crate::storage::{ChatMessage, IncidentKind, IncidentPatch, MessageType, Sender};

/// Drives one flow's step table for a conversation.
pub struct ConversationEngine<F: Flow> {
    core: ConversationCore,
    lifecycle: SessionManager,
    selector: InterventionSelector,
    _flow: PhantomData<F>,
}

pub type CravingEngine = ConversationEngine<CravingFlow>;
pub type EnergyEngine = ConversationEngine<EnergyFlow>;

impl<F: Flow> ConversationEngine<F> {
    pub fn new(core: ConversationCore) -> Self {
        let lifecycle = SessionManager::new(
            core.storage().clone(),
            core.config().active_incident_window_minutes,
        );
        let selector = InterventionSelector::new(core.ranker().clone());
        Self {
            core,
            lifecycle,
            selector,
            _flow: PhantomData,
        }
    }

    pub fn kind(&self) -> IncidentKind {
        F::KIND
    }

    /// Open or reuse the client's incident and ask the first question.
    pub async fn begin(&self, session: Session) -> AppResult<(ConversationContext, TurnResponse)> {
        let incident_id = self
            .lifecycle
            .ensure_incident(&session.client_id, F::KIND)
            .await?;
        let mut ctx = ConversationContext::new(session, F::KIND, incident_id);
        let response = self.start(&mut ctx).await?;
        Ok((ctx, response))
    }

    /// Ask the flow's first question.
    pub async fn start(&self, ctx: &mut ConversationContext) -> AppResult<TurnResponse> {
        let spec = self.spec(F::first_step())?;
        let reply = self.phrase(&self.generation_context(spec.step, ctx)).await?;
        self.log_message(ctx, Sender::Coach, &reply.message, MessageType::Text, reply.metadata)
            .await;

        let response = self.respond(spec, reply.message, ctx);
        ctx.cursor = response.next_step;
        Ok(response)
    }

    /// Enter `step` carrying the answer to the previous question.
    pub async fn advance(
        &self,
        step: ConversationStep,
        answer: &str,
        ctx: &mut ConversationContext,
    ) -> AppResult<TurnResponse> {
        if step == ConversationStep::Welcome || step == F::first_step() {
            return self.start(ctx).await;
        }

        let spec = self.spec(step)?;
        let answer = answer.trim();
        debug!(incident_id = %ctx.incident_id, %step, "Advancing conversation");
        self.log_message(ctx, Sender::Client, answer, spec.answer_type, None)
            .await;

        let response = match step {
            ConversationStep::SuggestTactic => self.suggest(spec, answer, ctx).await?,
            ConversationStep::Encouragement => self.encourage(spec, answer, ctx).await?,
            _ => self.answer(spec, answer, ctx).await?,
        };

        ctx.cursor = response.next_step;
        Ok(response)
    }

    /// Delayed check-in after the client accepted a suggestion.
    ///
    /// Produces nothing once the incident is resolved or the client has moved
    /// past the question the check-in would repeat.
    pub async fn follow_up(&self, ctx: &mut ConversationContext) -> AppResult<Option<TurnResponse>> {
        let spec = self.spec(ConversationStep::Encouragement)?;
        if ctx.cursor != spec.next {
            debug!(incident_id = %ctx.incident_id, cursor = %ctx.cursor, "Follow-up no longer relevant");
            return Ok(None);
        }
        if self.lifecycle.is_resolved(&ctx.incident_id).await {
            debug!(incident_id = %ctx.incident_id, "Incident resolved, skipping follow-up");
            return Ok(None);
        }

        let gen = self.generation_context(spec.step, ctx).as_follow_up();
        let reply = self.phrase(&gen).await?;
        self.log_message(
            ctx,
            Sender::Coach,
            &reply.message,
            MessageType::FollowupResponse,
            reply.metadata,
        )
        .await;

        info!(incident_id = %ctx.incident_id, "Follow-up sent");
        Ok(Some(self.respond(spec, reply.message, ctx)))
    }

    fn spec(&self, step: ConversationStep) -> AppResult<&'static StepSpec> {
        F::spec(step).ok_or_else(|| {
            ConversationError::InvalidStep {
                flow: F::KIND.to_string(),
                step: step.to_string(),
            }
            .into()
        })
    }

    /// Plain step: persist, resolve if required, phrase.
    async fn answer(
        &self,
        spec: &'static StepSpec,
        answer: &str,
        ctx: &mut ConversationContext,
    ) -> AppResult<TurnResponse> {
        if let Some(field) = spec.persists {
            self.persist(field, answer, ctx).await;
        }
        if spec.resolves {
            self.lifecycle.mark_resolved(&ctx.incident_id).await;
        }
        if spec.step == ConversationStep::Close {
            self.rate_chosen(ctx).await;
        }

        let reply = self.phrase(&self.generation_context(spec.step, ctx)).await?;
        let metadata = if spec.resolves {
            Some(with_resolve_marker(reply.metadata))
        } else {
            reply.metadata
        };
        self.log_message(ctx, Sender::Coach, &reply.message, MessageType::Text, metadata)
            .await;

        Ok(self.respond(spec, reply.message, ctx))
    }

    /// SUGGEST_TACTIC: persist the context, select, offer the primary.
    async fn suggest(
        &self,
        spec: &'static StepSpec,
        answer: &str,
        ctx: &mut ConversationContext,
    ) -> AppResult<TurnResponse> {
        if let Some(field) = spec.persists {
            self.persist(field, answer, ctx).await;
        }

        let storage = self.core.storage();
        let candidates = storage
            .list_client_interventions(&ctx.session.client_id, F::KIND, true)
            .await?;
        let recent: HashSet<String> = match storage
            .recent_intervention_ids(
                &ctx.session.client_id,
                F::KIND,
                self.core.config().recent_suggestion_limit,
            )
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Could not load suggestion history");
                HashSet::new()
            }
        };

        let selection = match self
            .selector
            .select(F::KIND, &candidates, &ctx.facts, &recent)
            .await
        {
            Ok(selection) => selection,
            Err(err @ ConversationError::NoEligibleInterventions { .. }) => {
                return Ok(self.dead_end(spec, err, ctx).await);
            }
            Err(e) => return Err(e.into()),
        };

        let primary = selection.primary.intervention.clone();
        ctx.selection = Some(selection);
        ctx.second_round = false;
        ctx.chosen = None;

        let gen = self
            .generation_context(spec.step, ctx)
            .with_intervention(&primary);
        let reply = self.phrase(&gen).await?;
        self.log_message(ctx, Sender::Coach, &reply.message, MessageType::Text, reply.metadata)
            .await;

        let mut response = self.respond(spec, reply.message, ctx);
        response.selected_interventions = Some(vec![primary]);
        Ok(response)
    }

    /// ENCOURAGEMENT: either the one-time detour to the secondary, or acceptance.
    async fn encourage(
        &self,
        spec: &'static StepSpec,
        answer: &str,
        ctx: &mut ConversationContext,
    ) -> AppResult<TurnResponse> {
        let Some(selection) = ctx.selection.clone() else {
            return Err(ConversationError::Validation {
                field: "step".to_string(),
                reason: "no intervention has been suggested yet".to_string(),
            }
            .into());
        };

        // With a single eligible intervention there is no detour; any answer accepts it.
        if !ctx.second_round && selection.has_alternative() && is_another_idea(answer) {
            ctx.second_round = true;
            let secondary = selection.secondary.intervention;
            let gen = self
                .generation_context(ConversationStep::SuggestTactic, ctx)
                .with_intervention(&secondary)
                .as_alternative();
            let reply = self.phrase(&gen).await?;
            self.log_message(ctx, Sender::Coach, &reply.message, MessageType::Text, reply.metadata)
                .await;

            info!(incident_id = %ctx.incident_id, intervention_id = %secondary.id, "Offering secondary suggestion");
            return Ok(TurnResponse {
                phrased_line: reply.message,
                message_type: MessageType::TacticResponse,
                step: spec.step,
                next_step: spec.step,
                offered_options: tactic_options(true),
                selected_interventions: Some(vec![secondary]),
                follow_up: None,
                ended: false,
            });
        }

        let chosen = if ctx.second_round {
            selection.secondary.intervention
        } else {
            selection.primary.intervention
        };

        let patch = IncidentPatch {
            intervention_id: Some(chosen.id.clone()),
            ..Default::default()
        };
        self.lifecycle.update_incident(&ctx.incident_id, &patch).await;
        if let Err(e) = self
            .core
            .storage()
            .record_intervention_use(&ctx.session.client_id, &chosen.id, Utc::now())
            .await
        {
            warn!(error = %e, intervention_id = %chosen.id, "Failed to record intervention use");
        }
        ctx.chosen = Some(chosen.clone());

        let reply = self.phrase(&self.generation_context(spec.step, ctx)).await?;
        self.log_message(ctx, Sender::Coach, &reply.message, MessageType::Text, reply.metadata)
            .await;

        info!(incident_id = %ctx.incident_id, intervention_id = %chosen.id, "Intervention accepted");
        let mut response = self.respond(spec, reply.message, ctx);
        response.selected_interventions = Some(vec![chosen]);
        response.follow_up = Some(FollowUpPlan {
            delay_secs: self.core.follow_up_delay_secs(F::KIND),
        });
        Ok(response)
    }

    /// Terminal reply when the catalog has nothing for this situation.
    async fn dead_end(
        &self,
        spec: &'static StepSpec,
        err: ConversationError,
        ctx: &ConversationContext,
    ) -> TurnResponse {
        warn!(incident_id = %ctx.incident_id, error = %err, "Ending conversation early");
        let line = err
            .user_message()
            .unwrap_or("Please contact your coach.")
            .to_string();
        self.log_message(ctx, Sender::Coach, &line, MessageType::Text, None)
            .await;

        TurnResponse {
            phrased_line: line,
            message_type: MessageType::Text,
            step: spec.step,
            next_step: ConversationStep::Close,
            offered_options: Vec::new(),
            selected_interventions: None,
            follow_up: None,
            ended: true,
        }
    }

    /// Write the answer into the incident. Unreadable answers are skipped.
    async fn persist(&self, field: Field, answer: &str, ctx: &mut ConversationContext) {
        match apply_answer(field, answer, &mut ctx.facts) {
            Some(patch) => {
                self.lifecycle.update_incident(&ctx.incident_id, &patch).await;
            }
            None => warn!(
                incident_id = %ctx.incident_id,
                field = field.as_str(),
                "Answer could not be read, field left empty"
            ),
        }
    }

    /// Store the closing helpfulness rating against the accepted intervention.
    async fn rate_chosen(&self, ctx: &ConversationContext) {
        let (Some(chosen), Some(rating)) = (&ctx.chosen, ctx.facts.result_rating) else {
            return;
        };
        if let Err(e) = self
            .core
            .storage()
            .rate_intervention(&ctx.session.client_id, &chosen.id, rating)
            .await
        {
            warn!(error = %e, intervention_id = %chosen.id, "Failed to store effectiveness rating");
        }
    }

    fn generation_context(
        &self,
        step: ConversationStep,
        ctx: &ConversationContext,
    ) -> GenerationContext {
        let gen = GenerationContext::new(
            F::KIND,
            step,
            ctx.session.client_name.clone(),
            ctx.session.coach.clone(),
        )
        .with_facts(ctx.facts.clone());
        match &ctx.chosen {
            Some(chosen) => gen.with_intervention(chosen),
            None => gen,
        }
    }

    /// Generate the line, applying the flow's policy when generation fails.
    async fn phrase(&self, gen: &GenerationContext) -> AppResult<CoachReply> {
        let failure = match self.core.generator().generate(gen).await {
            Ok(reply) if !reply.message.trim().is_empty() => return Ok(reply.normalized()),
            Ok(_) => "generator returned an empty line".to_string(),
            Err(e) => e.to_string(),
        };

        match self.core.generation_policy(F::KIND) {
            GenerationPolicy::Fallback => {
                warn!(flow = %F::KIND, step = %gen.step, error = %failure, "Generation failed, using fallback line");
                Ok(CoachReply::new(fallback_line(gen)))
            }
            GenerationPolicy::Propagate => {
                error!(flow = %F::KIND, step = %gen.step, error = %failure, "Generation failed");
                Err(ConversationError::GenerationFailed {
                    step: gen.step.to_string(),
                    message: failure,
                }
                .into())
            }
        }
    }

    fn options(&self, spec: &StepSpec, ctx: &ConversationContext) -> Vec<OfferedOption> {
        match spec.options {
            OptionSource::None => Vec::new(),
            OptionSource::Fixed(choices) => choices.iter().map(OfferedOption::from).collect(),
            OptionSource::Rating => rating_options(),
            OptionSource::Tactic => {
                let detour_left = !ctx.second_round
                    && ctx.selection.as_ref().map_or(true, |s| s.has_alternative());
                tactic_options(!detour_left)
            }
        }
    }

    fn respond(&self, spec: &StepSpec, line: String, ctx: &ConversationContext) -> TurnResponse {
        TurnResponse {
            phrased_line: line,
            message_type: F::expected_answer(spec.step),
            step: spec.step,
            next_step: spec.next,
            offered_options: self.options(spec, ctx),
            selected_interventions: None,
            follow_up: None,
            ended: spec.step == ConversationStep::Close,
        }
    }

    /// Append to the incident's log. Failures are logged and ignored.
    async fn log_message(
        &self,
        ctx: &ConversationContext,
        sender: Sender,
        text: &str,
        message_type: MessageType,
        metadata: Option<serde_json::Value>,
    ) {
        let mut message = ChatMessage::new(&ctx.incident_id, F::KIND, sender, text)
            .with_type(message_type);
        if let Some(metadata) = metadata {
            message = message.with_metadata(metadata);
        }
        if let Err(e) = self.core.storage().append_message(&message).await {
            warn!(error = %e, incident_id = %ctx.incident_id, "Failed to append message");
        }
    }
}

/// Add the resolution marker to whatever metadata the generator attached.
fn with_resolve_marker(metadata: Option<serde_json::Value>) -> serde_json::Value {
    match metadata {
        Some(serde_json::Value::Object(mut map)) => {
            map.insert("resolve_incident".to_string(), json!(true));
            serde_json::Value::Object(map)
        }
        Some(other) => json!({ "resolve_incident": true, "generator": other }),
        None => json!({ "resolve_incident": true }),
    }
}

/// Read `answer` into `facts` and build the matching incident patch.
///
/// Returns `None` when the answer holds nothing usable for the field.
fn apply_answer(field: Field, answer: &str, facts: &mut SituationalFacts) -> Option<IncidentPatch> {
    let mut patch = IncidentPatch::default();

    if field.is_rating() {
        let rating = parse_rating(answer)?;
        match field {
            Field::InitialIntensity => patch.initial_intensity = Some(rating),
            Field::EnergyLevel => patch.energy_level = Some(rating),
            Field::FinalIntensity => patch.final_intensity = Some(rating),
            Field::PostEnergyLevel => patch.post_energy_level = Some(rating),
            _ => patch.result_rating = Some(rating),
        }
        match field {
            Field::InitialIntensity | Field::EnergyLevel => facts.level = Some(rating),
            Field::FinalIntensity | Field::PostEnergyLevel => facts.outcome_level = Some(rating),
            _ => facts.result_rating = Some(rating),
        }
        return Some(patch);
    }

    if field == Field::ActivityCompleted {
        let completed = parse_completion(answer);
        facts.activity_completed = Some(completed);
        patch.activity_completed = Some(completed);
        return Some(patch);
    }

    if answer.is_empty() {
        return None;
    }
    let text = Some(answer.to_string());
    match field {
        Field::TriggerFood => {
            facts.trigger = text.clone();
            patch.trigger_food = text;
        }
        Field::Blocker => {
            facts.trigger = text.clone();
            patch.blocker = text;
        }
        Field::Context => {
            facts.context = text.clone();
            patch.context = text;
        }
        Field::Approach => {
            facts.context = text.clone();
            patch.approach = text;
        }
        Field::Location => {
            facts.location = text.clone();
            patch.location = text;
        }
        Field::Intervention => patch.intervention_id = text,
        _ => return None,
    }
    Some(patch)
}
