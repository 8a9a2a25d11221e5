use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

use super::{
    extract_json_from_completion, GenerationContext, InterventionRanker, RankingCandidate,
    RankingContext, ResponseGenerator,
};
use crate::error::{LangbaseError, LangbaseResult};
use crate::langbase::{CoachReply, LangbaseClient, Message, PipeRequest, RankResponse};
use crate::prompts::{INTERVENTION_RANKER_PROMPT, SOS_RESPONSE_PROMPT};

/// Phrases coach lines through the response pipe.
#[derive(Clone)]
pub struct LangbaseGenerator {
    langbase: LangbaseClient,
    pipe_name: String,
}

impl LangbaseGenerator {
    pub fn new(langbase: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            langbase,
            pipe_name: pipe_name.into(),
        }
    }

    fn build_messages(ctx: &GenerationContext) -> Vec<Message> {
        vec![
            Message::system(SOS_RESPONSE_PROMPT),
            Message::user(serde_json::to_string(ctx).unwrap_or_default()),
        ]
    }
}

#[async_trait]
impl ResponseGenerator for LangbaseGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> LangbaseResult<CoachReply> {
        let start = Instant::now();
        let request = PipeRequest::new(&self.pipe_name, Self::build_messages(ctx))
            .with_variable("flow", ctx.flow.to_string())
            .with_variable("step", ctx.step.to_string());
        let response = self.langbase.call_pipe(request).await?;

        let reply = extract_json_from_completion(&response.completion)
            .ok()
            .and_then(|json| serde_json::from_str::<CoachReply>(json).ok())
            .unwrap_or_else(|| CoachReply::from_completion(&response.completion))
            .normalized();

        if reply.message.is_empty() {
            return Err(LangbaseError::InvalidResponse {
                message: "Coach reply was empty".to_string(),
            });
        }

        debug!(
            flow = %ctx.flow,
            step = %ctx.step,
            latency_ms = start.elapsed().as_millis() as u64,
            has_metadata = reply.metadata.is_some(),
            "Coach line generated"
        );
        Ok(reply)
    }
}

/// Ranks candidate interventions through the ranker pipe.
#[derive(Clone)]
pub struct LangbaseRanker {
    langbase: LangbaseClient,
    pipe_name: String,
}

impl LangbaseRanker {
    pub fn new(langbase: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            langbase,
            pipe_name: pipe_name.into(),
        }
    }

    fn build_messages(ctx: &RankingContext, candidates: &[RankingCandidate]) -> Vec<Message> {
        let payload = serde_json::json!({
            "situation": ctx,
            "candidates": candidates,
        });
        vec![
            Message::system(INTERVENTION_RANKER_PROMPT),
            Message::user(payload.to_string()),
        ]
    }
}

#[async_trait]
impl InterventionRanker for LangbaseRanker {
    async fn rank(
        &self,
        ctx: &RankingContext,
        candidates: &[RankingCandidate],
    ) -> LangbaseResult<RankResponse> {
        let request = PipeRequest::new(&self.pipe_name, Self::build_messages(ctx, candidates));
        let response = self.langbase.call_pipe(request).await?;

        let json = extract_json_from_completion(&response.completion)
            .map_err(|message| LangbaseError::InvalidResponse { message })?;
        let ranked: RankResponse =
            serde_json::from_str(json).map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse ranker response: {}", e),
            })?;

        info!(
            flow = %ctx.flow,
            candidates = candidates.len(),
            primary = %ranked.primary_id,
            secondary = %ranked.secondary_id,
            "Interventions ranked"
        );
        Ok(ranked)
    }
}
