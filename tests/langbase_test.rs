//! Integration tests for Langbase client
//!
//! Tests HTTP client behavior, the coach line generator and the
//! intervention ranker using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use sos_coach::config::{LangbaseConfig, RequestConfig};
use sos_coach::conversation::{CoachPersona, ConversationStep, SituationalFacts};
use sos_coach::error::LangbaseError;
use sos_coach::generator::{
    GenerationContext, InterventionRanker, LangbaseGenerator, LangbaseRanker, RankingCandidate,
    RankingContext, ResponseGenerator,
};
use sos_coach::langbase::{LangbaseClient, Message, PipeRequest};
use sos_coach::storage::IncidentKind;

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LangbaseClient::new(&config, request_config).expect("Failed to create client")
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "completion": text,
        "threadId": "thread-123",
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        }
    }))
}

fn generation_context() -> GenerationContext {
    GenerationContext::new(
        IncidentKind::Craving,
        ConversationStep::GaugeIntensity,
        "Sam",
        CoachPersona::default(),
    )
}

fn ranking_input() -> (RankingContext, Vec<RankingCandidate>) {
    let ctx = RankingContext {
        flow: IncidentKind::Craving,
        facts: SituationalFacts {
            location: Some("Home".to_string()),
            ..Default::default()
        },
        time_of_day: "evening".to_string(),
        day_of_week: "Friday".to_string(),
    };
    let candidate = |id: &str| RankingCandidate {
        id: id.to_string(),
        name: format!("Strategy {}", id),
        description: "desc".to_string(),
        category: None,
        context_tags: Vec::new(),
        favorite: false,
        times_used: 0,
        effectiveness_rating: None,
        recently_suggested: false,
    };
    (ctx, vec![candidate("a"), candidate("b")])
}

#[cfg(test)]
mod pipe_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({"name": "test-pipe", "stream": false})))
            .respond_with(completion("Hello there"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("hi")]))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.completion, "Hello there");
        assert_eq!(response.thread_id.as_deref(), Some("thread-123"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        match err {
            LangbaseError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_retries_then_gives_up() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LangbaseError::Unavailable { retries: 2, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }
}

#[cfg(test)]
mod pipe_management_tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_pipe_upserts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .and(body_partial_json(json!({"name": "sos-response-v1", "upsert": true, "status": "private"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "sos-response-v1",
                "description": "Phrases SOS coach replies",
                "status": "private",
                "url": "https://langbase.com/pipes/sos-response-v1"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client
            .ensure_pipe("sos-response-v1", "Phrases SOS coach replies", "prompt", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_pipe_accepts_conflict() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        assert!(client
            .ensure_pipe("intervention-ranker-v1", "Ranks", "prompt", true)
            .await
            .is_ok());
    }
}

#[cfg(test)]
mod generator_tests {
    use super::*;

    #[tokio::test]
    async fn test_generator_reads_json_reply() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({
                "name": "sos-response-v1",
                "variables": {"flow": "craving", "step": "GAUGE_INTENSITY"}
            })))
            .respond_with(completion(
                r#"{"message": "  How strong is it, Sam?  ", "metadata": {"tone": "warm"}}"#,
            ))
            .mount(&mock_server)
            .await;

        let generator =
            LangbaseGenerator::new(create_test_client(&mock_server.uri(), 0), "sos-response-v1");
        let reply = generator.generate(&generation_context()).await.unwrap();
        assert_eq!(reply.message, "How strong is it, Sam?");
        assert_eq!(reply.metadata, Some(json!({"tone": "warm"})));
    }

    #[tokio::test]
    async fn test_generator_accepts_plain_text() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion("On a scale of 1 to 10, how strong is it?"))
            .mount(&mock_server)
            .await;

        let generator =
            LangbaseGenerator::new(create_test_client(&mock_server.uri(), 0), "sos-response-v1");
        let reply = generator.generate(&generation_context()).await.unwrap();
        assert_eq!(reply.message, "On a scale of 1 to 10, how strong is it?");
        assert!(reply.metadata.is_none());
    }

    #[tokio::test]
    async fn test_generator_rejects_empty_reply() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion("   "))
            .mount(&mock_server)
            .await;

        let generator =
            LangbaseGenerator::new(create_test_client(&mock_server.uri(), 0), "sos-response-v1");
        let err = generator.generate(&generation_context()).await.unwrap_err();
        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }
}

#[cfg(test)]
mod ranker_tests {
    use super::*;

    #[tokio::test]
    async fn test_ranker_parses_fenced_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "intervention-ranker-v1"})))
            .respond_with(completion(
                "```json\n{\"primary_id\": \"b\", \"secondary_id\": \"a\", \"reasoning\": \"b fits home\"}\n```",
            ))
            .mount(&mock_server)
            .await;

        let ranker = LangbaseRanker::new(
            create_test_client(&mock_server.uri(), 0),
            "intervention-ranker-v1",
        );
        let (ctx, candidates) = ranking_input();
        let ranked = ranker.rank(&ctx, &candidates).await.unwrap();
        assert_eq!(ranked.primary_id, "b");
        assert_eq!(ranked.secondary_id, "a");
        assert_eq!(ranked.reasoning, "b fits home");
    }

    #[tokio::test]
    async fn test_ranker_rejects_prose() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion("I would pick the walk."))
            .mount(&mock_server)
            .await;

        let ranker = LangbaseRanker::new(
            create_test_client(&mock_server.uri(), 0),
            "intervention-ranker-v1",
        );
        let (ctx, candidates) = ranking_input();
        let err = ranker.rank(&ctx, &candidates).await.unwrap_err();
        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_ranker_rejects_missing_fields() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion(r#"{"primary_id": "a"}"#))
            .mount(&mock_server)
            .await;

        let ranker = LangbaseRanker::new(
            create_test_client(&mock_server.uri(), 0),
            "intervention-ranker-v1",
        );
        let (ctx, candidates) = ranking_input();
        let err = ranker.rank(&ctx, &candidates).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse ranker response"));
    }
}
