//! Picks a primary and secondary intervention for the current situation.
//!
//! Candidates are narrowed by location, then by freshness, and the survivors
//! are handed to the ranker. Whatever the ranker answers, the result always
//! names two ids from the survivors, distinct whenever two exist.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::SituationalFacts;
use crate::error::ConversationError;
use crate::generator::{InterventionRanker, RankingCandidate, RankingContext};
use crate::storage::{day_of_week, time_of_day, CandidateIntervention, IncidentKind};

/// Tag that makes an intervention eligible at any location.
pub const UNIVERSAL_TAG: &str = "universal";

const FALLBACK_REASONING: &str = "malformed AI response";

/// Normalized tag for a location answer ("Home" -> "home").
pub fn location_tag(location: &str) -> String {
    location
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// The ranked pair offered to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub primary: CandidateIntervention,
    pub secondary: CandidateIntervention,
    pub reasoning: String,
    /// The ranker answer was unusable and list order was used instead.
    pub fallback_used: bool,
}

impl Selection {
    /// False when only one intervention was eligible and the detour has nothing to offer.
    pub fn has_alternative(&self) -> bool {
        self.primary.id() != self.secondary.id()
    }
}

/// Location filter, freshness preference and ranker validation.
#[derive(Clone)]
pub struct InterventionSelector {
    ranker: Arc<dyn InterventionRanker>,
}

impl InterventionSelector {
    pub fn new(ranker: Arc<dyn InterventionRanker>) -> Self {
        Self { ranker }
    }

    /// Candidates eligible at `location`.
    ///
    /// Untagged interventions go everywhere; tagged ones need the location's
    /// tag or `universal`. Without a location every candidate is eligible.
    pub fn eligible(
        candidates: &[CandidateIntervention],
        location: Option<&str>,
    ) -> Vec<CandidateIntervention> {
        let Some(tag) = location.map(location_tag).filter(|t| !t.is_empty()) else {
            return candidates.to_vec();
        };

        candidates
            .iter()
            .filter(|candidate| {
                let tags = &candidate.intervention.context_tags;
                tags.is_empty()
                    || tags.iter().any(|t| {
                        let t = location_tag(t);
                        t == tag || t == UNIVERSAL_TAG
                    })
            })
            .cloned()
            .collect()
    }

    /// Choose a primary and secondary for the client.
    pub async fn select(
        &self,
        kind: IncidentKind,
        candidates: &[CandidateIntervention],
        facts: &SituationalFacts,
        recent_ids: &HashSet<String>,
    ) -> Result<Selection, ConversationError> {
        let survivors = Self::eligible(candidates, facts.location.as_deref());

        match survivors.len() {
            0 => {
                warn!(
                    %kind,
                    location = facts.location.as_deref().unwrap_or("unknown"),
                    candidates = candidates.len(),
                    "No eligible interventions"
                );
                return Err(ConversationError::NoEligibleInterventions {
                    location: facts.location.clone().unwrap_or_default(),
                });
            }
            1 => {
                let only = survivors[0].clone();
                info!(intervention_id = %only.id(), "Single eligible intervention");
                return Ok(Selection {
                    primary: only.clone(),
                    secondary: only,
                    reasoning: "only one eligible intervention".to_string(),
                    fallback_used: false,
                });
            }
            _ => {}
        }

        let fresh: Vec<CandidateIntervention> = survivors
            .iter()
            .filter(|c| !recent_ids.contains(c.id()))
            .cloned()
            .collect();
        let pool = if fresh.len() >= 2 { fresh } else { survivors };

        let ranking: Vec<RankingCandidate> = pool
            .iter()
            .map(|c| RankingCandidate::from_candidate(c, recent_ids.contains(c.id())))
            .collect();
        let now = Local::now();
        let ctx = RankingContext {
            flow: kind,
            facts: facts.clone(),
            time_of_day: time_of_day(now.hour()),
            day_of_week: day_of_week(&now),
        };

        let ranked = match self.ranker.rank(&ctx, &ranking).await {
            Ok(ranked) => ranked,
            Err(e) => {
                let err = ConversationError::MalformedSelectorResponse {
                    message: e.to_string(),
                };
                warn!(error = %err, "Ranker failed, using list order");
                return Ok(Self::list_order(&pool));
            }
        };

        let find = |id: &str| pool.iter().find(|c| c.id() == id.trim()).cloned();
        let (Some(primary), Some(secondary)) = (find(&ranked.primary_id), find(&ranked.secondary_id))
        else {
            warn!(
                primary_id = %ranked.primary_id,
                secondary_id = %ranked.secondary_id,
                "Ranker returned unknown ids, using list order"
            );
            return Ok(Self::list_order(&pool));
        };

        let secondary = if secondary.id() == primary.id() {
            match pool.iter().find(|c| c.id() != primary.id()) {
                Some(other) => other.clone(),
                None => secondary,
            }
        } else {
            secondary
        };

        info!(
            primary = %primary.id(),
            secondary = %secondary.id(),
            pool = pool.len(),
            "Interventions selected"
        );

        Ok(Selection {
            primary,
            secondary,
            reasoning: ranked.reasoning,
            fallback_used: false,
        })
    }

    fn list_order(pool: &[CandidateIntervention]) -> Selection {
        Selection {
            primary: pool[0].clone(),
            secondary: pool[1].clone(),
            reasoning: FALLBACK_REASONING.to_string(),
            fallback_used: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LangbaseError;
    use crate::generator::MockInterventionRanker;
    use crate::langbase::RankResponse;
    use crate::storage::Intervention;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, tags: &[&str]) -> CandidateIntervention {
        let mut intervention = Intervention::new("coach-1", IncidentKind::Craving, id, "desc")
            .with_tags(tags.iter().copied());
        intervention.id = id.to_string();
        CandidateIntervention::from(intervention)
    }

    fn at_home() -> SituationalFacts {
        SituationalFacts {
            location: Some("Home".to_string()),
            ..Default::default()
        }
    }

    fn ranker_answering(primary: &str, secondary: &str) -> MockInterventionRanker {
        let (primary, secondary) = (primary.to_string(), secondary.to_string());
        let mut ranker = MockInterventionRanker::new();
        ranker.expect_rank().returning(move |_, _| {
            Ok(RankResponse {
                primary_id: primary.clone(),
                secondary_id: secondary.clone(),
                reasoning: "fits the evening".to_string(),
            })
        });
        ranker
    }

    fn ids(candidates: &[CandidateIntervention]) -> Vec<&str> {
        candidates.iter().map(|c| c.id()).collect()
    }

    #[test]
    fn test_location_tag() {
        assert_eq!(location_tag(" Home "), "home");
        assert_eq!(location_tag("Living Room"), "living_room");
    }

    #[test]
    fn test_location_filter() {
        let candidates = vec![
            candidate("A", &["home"]),
            candidate("B", &["work"]),
            candidate("C", &["universal"]),
            candidate("D", &[]),
        ];
        assert_eq!(
            ids(&InterventionSelector::eligible(&candidates, Some("Home"))),
            vec!["A", "C", "D"]
        );
        assert_eq!(
            ids(&InterventionSelector::eligible(&candidates, Some("Car"))),
            vec!["C", "D"]
        );
        assert_eq!(InterventionSelector::eligible(&candidates, None).len(), 4);
    }

    #[tokio::test]
    async fn test_no_survivors_is_an_error() {
        let selector = InterventionSelector::new(Arc::new(MockInterventionRanker::new()));
        let candidates = vec![candidate("B", &["work"])];
        let err = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::NoEligibleInterventions { .. }));

        let err = selector
            .select(IncidentKind::Craving, &[], &at_home(), &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::NoEligibleInterventions { .. }));
    }

    #[tokio::test]
    async fn test_single_survivor_is_primary_and_secondary() {
        let selector = InterventionSelector::new(Arc::new(MockInterventionRanker::new()));
        let candidates = vec![candidate("A", &["home"]), candidate("B", &["work"])];
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "A");
        assert_eq!(selection.secondary.id(), "A");
    }

    #[tokio::test]
    async fn test_ranker_choice_is_used() {
        let selector = InterventionSelector::new(Arc::new(ranker_answering("C", "A")));
        let candidates = vec![candidate("A", &[]), candidate("B", &[]), candidate("C", &[])];
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "C");
        assert_eq!(selection.secondary.id(), "A");
        assert_eq!(selection.reasoning, "fits the evening");
        assert!(!selection.fallback_used);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_made_distinct() {
        let selector = InterventionSelector::new(Arc::new(ranker_answering("A", "A")));
        let candidates = vec![candidate("A", &[]), candidate("B", &[])];
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "A");
        assert_eq!(selection.secondary.id(), "B");
    }

    #[tokio::test]
    async fn test_unknown_ids_fall_back_to_list_order() {
        let selector = InterventionSelector::new(Arc::new(ranker_answering("Z", "A")));
        let candidates = vec![candidate("A", &[]), candidate("B", &[]), candidate("C", &[])];
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "A");
        assert_eq!(selection.secondary.id(), "B");
        assert_eq!(selection.reasoning, "malformed AI response");
        assert!(selection.fallback_used);
    }

    #[tokio::test]
    async fn test_ranker_failure_falls_back_to_list_order() {
        let mut ranker = MockInterventionRanker::new();
        ranker.expect_rank().returning(|_, _| {
            Err(LangbaseError::InvalidResponse {
                message: "not json".to_string(),
            })
        });
        let selector = InterventionSelector::new(Arc::new(ranker));
        let candidates = vec![candidate("A", &[]), candidate("B", &[])];
        let selection = selector
            .select(IncidentKind::Energy, &candidates, &at_home(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(ids(&[selection.primary, selection.secondary]), vec!["A", "B"]);
        assert!(selection.fallback_used);
    }

    #[tokio::test]
    async fn test_fresh_candidates_preferred() {
        let mut ranker = MockInterventionRanker::new();
        ranker
            .expect_rank()
            .withf(|_, candidates| {
                candidates.iter().map(|c| c.id.as_str()).collect::<Vec<_>>() == vec!["C", "D"]
            })
            .returning(|_, _| {
                Ok(RankResponse {
                    primary_id: "D".to_string(),
                    secondary_id: "C".to_string(),
                    reasoning: String::new(),
                })
            });
        let selector = InterventionSelector::new(Arc::new(ranker));
        let candidates = vec![
            candidate("A", &[]),
            candidate("B", &[]),
            candidate("C", &[]),
            candidate("D", &[]),
        ];
        let recent: HashSet<String> = ["A".to_string(), "B".to_string()].into();
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &recent)
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "D");
    }

    #[tokio::test]
    async fn test_too_few_fresh_candidates_uses_all_survivors() {
        let mut ranker = MockInterventionRanker::new();
        ranker
            .expect_rank()
            .withf(|_, candidates| {
                candidates.len() == 3 && candidates.iter().filter(|c| c.recently_suggested).count() == 2
            })
            .returning(|_, _| {
                Ok(RankResponse {
                    primary_id: "A".to_string(),
                    secondary_id: "C".to_string(),
                    reasoning: String::new(),
                })
            });
        let selector = InterventionSelector::new(Arc::new(ranker));
        let candidates = vec![candidate("A", &[]), candidate("B", &[]), candidate("C", &[])];
        let recent: HashSet<String> = ["A".to_string(), "B".to_string()].into();
        let selection = selector
            .select(IncidentKind::Craving, &candidates, &at_home(), &recent)
            .await
            .unwrap();
        assert_eq!(selection.primary.id(), "A");
        assert_eq!(selection.secondary.id(), "C");
    }
}
