//! End-to-end conversation tests
//!
//! Drives whole conversations through the dispatcher against an in-memory
//! store, with scripted generator and ranker implementations.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use sos_coach::config::ConversationConfig;
use sos_coach::conversation::{
    ConversationCore, ConversationStep, Credentials, UnifiedDispatcher, ACCEPT_OPTION,
    ANOTHER_IDEA_OPTION,
};
use sos_coach::error::{AppError, ConversationError, LangbaseError, LangbaseResult};
use sos_coach::generator::{
    GenerationContext, InterventionRanker, RankingCandidate, RankingContext, ResponseGenerator,
};
use sos_coach::langbase::{CoachReply, RankResponse};
use sos_coach::storage::{
    Client, Coach, IncidentKind, Intervention, MessageType, Sender, SqliteStorage, Storage,
};

/// Echoes the step and client name, or fails every call.
struct ScriptedGenerator {
    fail: bool,
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> LangbaseResult<CoachReply> {
        if self.fail {
            return Err(LangbaseError::Unavailable {
                message: "pipe down".to_string(),
                retries: 0,
            });
        }
        Ok(CoachReply::new(format!("{} for {}", ctx.step, ctx.client_name)))
    }
}

/// Picks the first candidate as primary and the last as secondary, and
/// remembers which ids it was shown.
#[derive(Default)]
struct FirstLastRanker {
    seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl InterventionRanker for FirstLastRanker {
    async fn rank(
        &self,
        _ctx: &RankingContext,
        candidates: &[RankingCandidate],
    ) -> LangbaseResult<RankResponse> {
        self.seen
            .lock()
            .unwrap()
            .push(candidates.iter().map(|c| c.id.clone()).collect());
        Ok(RankResponse {
            primary_id: candidates[0].id.clone(),
            secondary_id: candidates[candidates.len() - 1].id.clone(),
            reasoning: "first and last".to_string(),
        })
    }
}

struct World {
    storage: Arc<SqliteStorage>,
    ranker: Arc<FirstLastRanker>,
    client: Client,
    coach: Coach,
}

async fn world() -> World {
    let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    let coach = Coach::new("Dana").with_tone("warm");
    storage.create_coach(&coach).await.unwrap();
    let client = Client::new(&coach.id, "Robin").with_access_token("tok");
    storage.create_client(&client).await.unwrap();
    World {
        storage,
        ranker: Arc::new(FirstLastRanker::default()),
        client,
        coach,
    }
}

impl World {
    async fn intervention(&self, kind: IncidentKind, name: &str, tags: &[&str]) -> Intervention {
        let intervention = Intervention::new(&self.coach.id, kind, name, "desc")
            .with_tags(tags.iter().copied());
        self.storage.create_intervention(&intervention).await.unwrap();
        intervention
    }

    fn dispatcher(&self, failing_generator: bool) -> UnifiedDispatcher {
        let core = ConversationCore::new(
            self.storage.clone(),
            Arc::new(ScriptedGenerator {
                fail: failing_generator,
            }),
            self.ranker.clone(),
            ConversationConfig::default(),
        );
        UnifiedDispatcher::new(
            core,
            Credentials {
                access_token: Some("tok".to_string()),
                ..Default::default()
            },
        )
    }
}

#[tokio::test]
async fn test_energy_conversation_with_detour() {
    let w = world().await;
    let stairs = w.intervention(IncidentKind::Energy, "Stairs", &["gym"]).await;
    let stretch = w.intervention(IncidentKind::Energy, "Stretch", &[]).await;
    w.intervention(IncidentKind::Energy, "Desk push-ups", &["work"]).await;

    let mut d = w.dispatcher(false);
    let greeting = d.start().await.unwrap();
    assert!(greeting.phrased_line.contains("Robin"));

    let r = d
        .handle_turn(ConversationStep::IdentifyStruggle, "I'm so tired today")
        .await
        .unwrap();
    assert_eq!(r.step, ConversationStep::IdentifyBlocker);
    assert_eq!(r.phrased_line, "IDENTIFY_BLOCKER for Robin");

    d.handle_turn(ConversationStep::GaugeEnergy, "Tired").await.unwrap();
    d.handle_turn(ConversationStep::IdentifyLocation, "3").await.unwrap();
    d.handle_turn(ConversationStep::IdentifyApproach, "Gym").await.unwrap();

    let suggestion = d
        .handle_turn(ConversationStep::SuggestTactic, "Something quick")
        .await
        .unwrap();
    assert_eq!(suggestion.next_step, ConversationStep::Encouragement);
    assert_eq!(
        suggestion.selected_interventions.as_ref().unwrap()[0].id,
        stairs.id
    );
    assert_eq!(
        *w.ranker.seen.lock().unwrap(),
        vec![vec![stairs.id.clone(), stretch.id.clone()]]
    );

    let detour = d
        .handle_turn(ConversationStep::Encouragement, ANOTHER_IDEA_OPTION)
        .await
        .unwrap();
    assert_eq!(detour.next_step, ConversationStep::Encouragement);
    assert_eq!(detour.message_type, MessageType::TacticResponse);
    assert_eq!(detour.selected_interventions.unwrap()[0].id, stretch.id);
    assert_eq!(detour.offered_options.len(), 1);

    // Any answer in the second round takes the alternative.
    let accepted = d
        .handle_turn(ConversationStep::Encouragement, ANOTHER_IDEA_OPTION)
        .await
        .unwrap();
    assert_eq!(accepted.next_step, ConversationStep::CheckActivityCompletion);
    assert_eq!(accepted.follow_up.unwrap().delay_secs, 900);

    // The check-in repeats the pending question while it is still open.
    let follow_up = d.follow_up().await.unwrap().unwrap();
    assert_eq!(follow_up.next_step, ConversationStep::CheckActivityCompletion);

    d.handle_turn(ConversationStep::CheckActivityCompletion, "I did it!")
        .await
        .unwrap();
    let rated = d.handle_turn(ConversationStep::RateResult, "8").await.unwrap();
    assert_eq!(rated.next_step, ConversationStep::Close);

    let closed = d.handle_turn(ConversationStep::Close, "9").await.unwrap();
    assert!(closed.ended);
    assert!(d.follow_up().await.unwrap().is_none());

    let (_, incident_id) = d.incident().unwrap();
    let incident = w.storage.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(incident.blocker.as_deref(), Some("Tired"));
    assert_eq!(incident.energy_level, Some(3));
    assert_eq!(incident.location.as_deref(), Some("Gym"));
    assert_eq!(incident.approach.as_deref(), Some("Something quick"));
    assert_eq!(incident.intervention_id.as_deref(), Some(stretch.id.as_str()));
    assert_eq!(incident.activity_completed, Some(true));
    assert_eq!(incident.post_energy_level, Some(8));
    assert_eq!(incident.result_rating, Some(9));
    assert!(incident.resolved_at.is_some());

    let candidates = w
        .storage
        .list_client_interventions(&w.client.id, IncidentKind::Energy, true)
        .await
        .unwrap();
    let used = candidates.iter().find(|c| c.id() == stretch.id).unwrap();
    assert_eq!(used.times_used, 1);
    assert_eq!(used.effectiveness_rating, Some(9));

    let history = d.history().await.unwrap();
    assert_eq!(history.first().unwrap().sender, Sender::Coach);
    assert!(history
        .iter()
        .any(|m| m.message_type == MessageType::FollowupResponse));
    let resolving = history
        .iter()
        .filter(|m| m.metadata.is_some())
        .count();
    assert_eq!(resolving, 1);
}

#[tokio::test]
async fn test_recently_used_intervention_is_rotated_out() {
    let w = world().await;
    let tea = w.intervention(IncidentKind::Craving, "Tea", &[]).await;
    let walk = w.intervention(IncidentKind::Craving, "Walk", &[]).await;
    let gum = w.intervention(IncidentKind::Craving, "Gum", &[]).await;

    async fn run_to_acceptance(d: &mut UnifiedDispatcher) -> String {
        d.handle_turn(ConversationStep::IdentifyStruggle, "craving").await.unwrap();
        d.handle_turn(ConversationStep::GaugeIntensity, "Chips").await.unwrap();
        d.handle_turn(ConversationStep::IdentifyLocation, "6").await.unwrap();
        d.handle_turn(ConversationStep::IdentifyTrigger, "Home").await.unwrap();
        d.handle_turn(ConversationStep::SuggestTactic, "Bored").await.unwrap();
        let accepted = d
            .handle_turn(ConversationStep::Encouragement, ACCEPT_OPTION)
            .await
            .unwrap();
        d.handle_turn(ConversationStep::RateResult, "3").await.unwrap();
        accepted.selected_interventions.unwrap()[0].id.clone()
    }

    let mut first = w.dispatcher(false);
    assert_eq!(run_to_acceptance(&mut first).await, tea.id);

    let mut second = w.dispatcher(false);
    let chosen = run_to_acceptance(&mut second).await;
    assert_eq!(chosen, walk.id);

    let seen = w.ranker.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec![tea.id.clone(), walk.id.clone(), gum.id.clone()]);
    assert_eq!(seen[1], vec![walk.id.clone(), gum.id.clone()]);
}

#[tokio::test]
async fn test_craving_survives_generator_outage() {
    let w = world().await;
    w.intervention(IncidentKind::Craving, "Tea", &[]).await;

    let mut d = w.dispatcher(true);
    d.handle_turn(ConversationStep::IdentifyStruggle, "craving").await.unwrap();
    let r = d
        .handle_turn(ConversationStep::GaugeIntensity, "Chocolate")
        .await
        .unwrap();
    assert!(!r.phrased_line.is_empty());
    assert!(!r.phrased_line.contains('{'));

    let suggestion = d
        .handle_turn(ConversationStep::SuggestTactic, "Bored")
        .await
        .unwrap();
    assert!(suggestion.phrased_line.contains("Tea"));
}

#[tokio::test]
async fn test_energy_generator_outage_fails_after_persisting() {
    let w = world().await;

    let mut d = w.dispatcher(true);
    let err = d
        .handle_turn(ConversationStep::IdentifyStruggle, "energy")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Conversation(ConversationError::GenerationFailed { .. })
    ));

    // The incident was opened before the first line was requested.
    let since = chrono::Utc::now() - chrono::Duration::minutes(5);
    assert!(w
        .storage
        .find_active_incident(&w.client.id, IncidentKind::Energy, since)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_empty_catalog_ends_conversation() {
    let w = world().await;

    let mut d = w.dispatcher(false);
    d.handle_turn(ConversationStep::IdentifyStruggle, "craving").await.unwrap();
    let r = d
        .handle_turn(ConversationStep::SuggestTactic, "Stressed")
        .await
        .unwrap();
    assert!(r.ended);
    assert_eq!(r.next_step, ConversationStep::Close);
    assert!(r.phrased_line.contains("contact your coach"));

    let (_, incident_id) = d.incident().unwrap();
    let incident = w.storage.get_incident(incident_id).await.unwrap().unwrap();
    assert!(incident.resolved_at.is_none());
}
