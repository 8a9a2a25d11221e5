//! Coach-line generation and intervention ranking.
//!
//! Both concerns sit behind traits so the conversation engine can run against
//! the Langbase pipes in production and scripted fakes in tests.

mod fallback;
mod langbase;

pub use fallback::fallback_line;
pub use langbase::{LangbaseGenerator, LangbaseRanker};

use async_trait::async_trait;
use serde::Serialize;

use crate::conversation::{CoachPersona, ConversationStep, SituationalFacts};
use crate::error::LangbaseResult;
use crate::langbase::{CoachReply, RankResponse};
use crate::storage::{CandidateIntervention, IncidentKind, Intervention};

/// Name and description of the intervention a line talks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterventionBrief {
    pub name: String,
    pub description: String,
}

impl From<&Intervention> for InterventionBrief {
    fn from(intervention: &Intervention) -> Self {
        Self {
            name: intervention.name.clone(),
            description: intervention.description.clone(),
        }
    }
}

/// Everything the response generator sees when phrasing one coach line.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationContext {
    pub flow: IncidentKind,
    pub step: ConversationStep,
    pub client_name: String,
    pub coach: CoachPersona,
    pub facts: SituationalFacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention: Option<InterventionBrief>,
    /// The line offers the secondary suggestion.
    pub alternative: bool,
    /// The line is a delayed check-in rather than a reply.
    pub follow_up: bool,
}

impl GenerationContext {
    pub fn new(
        flow: IncidentKind,
        step: ConversationStep,
        client_name: impl Into<String>,
        coach: CoachPersona,
    ) -> Self {
        Self {
            flow,
            step,
            client_name: client_name.into(),
            coach,
            facts: SituationalFacts::default(),
            intervention: None,
            alternative: false,
            follow_up: false,
        }
    }

    pub fn with_facts(mut self, facts: SituationalFacts) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_intervention(mut self, intervention: &Intervention) -> Self {
        self.intervention = Some(InterventionBrief::from(intervention));
        self
    }

    pub fn as_alternative(mut self) -> Self {
        self.alternative = true;
        self
    }

    pub fn as_follow_up(mut self) -> Self {
        self.follow_up = true;
        self
    }
}

/// Produces the coach's line for a step, with any metadata the pipe attached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, ctx: &GenerationContext) -> LangbaseResult<CoachReply>;
}

/// Situation the ranker scores candidates against.
#[derive(Debug, Clone, Serialize)]
pub struct RankingContext {
    pub flow: IncidentKind,
    pub facts: SituationalFacts,
    pub time_of_day: String,
    pub day_of_week: String,
}

/// A candidate as presented to the ranker, history included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingCandidate {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub context_tags: Vec<String>,
    pub favorite: bool,
    pub times_used: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effectiveness_rating: Option<i32>,
    pub recently_suggested: bool,
}

impl RankingCandidate {
    pub fn from_candidate(candidate: &CandidateIntervention, recently_suggested: bool) -> Self {
        let intervention = &candidate.intervention;
        Self {
            id: intervention.id.clone(),
            name: intervention.name.clone(),
            description: intervention.description.clone(),
            category: intervention.category.clone(),
            context_tags: intervention.context_tags.clone(),
            favorite: candidate.favorite,
            times_used: candidate.times_used,
            effectiveness_rating: candidate.effectiveness_rating,
            recently_suggested,
        }
    }
}

/// Picks a primary and secondary intervention out of the candidates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InterventionRanker: Send + Sync {
    async fn rank(
        &self,
        ctx: &RankingContext,
        candidates: &[RankingCandidate],
    ) -> LangbaseResult<RankResponse>;
}

/// Pull the JSON body out of a completion that may wrap it in a code fence.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
