use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ConversationHandle, Outbox, SharedState, FOLLOW_UP_NOTIFICATION};
use crate::conversation::{ConversationStep, Credentials, Session, TurnResponse, UnifiedDispatcher};
use crate::error::{AppError, ConversationError, RpcError, RpcResult};
use crate::storage::ChatMessage;

/// Parameters for `conversation/start`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    #[serde(default)]
    pub credentials: Credentials,
}

/// Parameters for `conversation/turn`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnParams {
    pub conversation_id: String,
    /// The step the client is answering.
    pub step: ConversationStep,
    #[serde(default)]
    pub input: String,
}

/// Parameters for `conversation/history`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub conversation_id: String,
}

/// Result of `conversation/start`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub conversation_id: String,
    /// Credentials with the resolved client id cached for the next launch.
    pub credentials: Credentials,
    pub session: Option<Session>,
    pub reply: TurnResponse,
}

/// Result of `conversation/turn` and the follow-up notification payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub conversation_id: String,
    pub reply: TurnResponse,
}

/// Result of `conversation/history`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResult {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Route a method call to its handler.
pub async fn handle_method(
    state: &SharedState,
    outbox: &Outbox,
    method: &str,
    params: Option<Value>,
) -> RpcResult<Value> {
    info!(method = %method, "Routing method call");

    match method {
        "conversation/start" => handle_start(state, params).await,
        "conversation/turn" => handle_turn(state, outbox, params).await,
        "conversation/history" => handle_history(state, params).await,
        _ => Err(RpcError::UnknownMethod {
            method: method.to_string(),
        }),
    }
}

/// Resolve the client and register a new conversation.
async fn handle_start(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    const METHOD: &str = "conversation/start";
    // Credentials are optional as a whole; resolution reports what is missing.
    let params: StartParams = match params {
        Some(p) => parse_arguments(METHOD, Some(p))?,
        None => StartParams::default(),
    };

    let mut dispatcher = UnifiedDispatcher::new(state.core.clone(), params.credentials);
    let reply = dispatcher
        .start()
        .await
        .map_err(|e| to_rpc_error(METHOD, e))?;

    state.evict_idle(state.idle_limit()).await;
    let conversation_id = Uuid::new_v4().to_string();
    let result = StartResult {
        conversation_id: conversation_id.clone(),
        credentials: dispatcher.credentials().clone(),
        session: dispatcher.session().cloned(),
        reply,
    };
    state.insert_conversation(&conversation_id, dispatcher).await;
    info!(conversation_id = %conversation_id, "Conversation started");

    typing_pause(state).await;
    serde_json::to_value(result).map_err(RpcError::Json)
}

/// Forward one client answer and schedule the check-in the reply asks for.
async fn handle_turn(state: &SharedState, outbox: &Outbox, params: Option<Value>) -> RpcResult<Value> {
    const METHOD: &str = "conversation/turn";
    let params: TurnParams = parse_arguments(METHOD, params)?;
    let handle = lookup(state, &params.conversation_id).await?;

    let reply = {
        let mut dispatcher = handle.lock().await;
        dispatcher
            .handle_turn(params.step, &params.input)
            .await
            .map_err(|e| to_rpc_error(METHOD, e))?
    };

    // Ended replies never carry a follow-up, so nothing is left to deliver.
    if reply.ended {
        state.remove_conversation(&params.conversation_id).await;
        info!(conversation_id = %params.conversation_id, "Conversation ended");
    } else if let Some(plan) = &reply.follow_up {
        schedule_follow_up(
            state,
            outbox.clone(),
            params.conversation_id.clone(),
            handle,
            Duration::from_secs(plan.delay_secs),
        );
    }

    typing_pause(state).await;
    serde_json::to_value(TurnResult {
        conversation_id: params.conversation_id,
        reply,
    })
    .map_err(RpcError::Json)
}

async fn handle_history(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    const METHOD: &str = "conversation/history";
    let params: HistoryParams = parse_arguments(METHOD, params)?;
    let handle = lookup(state, &params.conversation_id).await?;

    let messages = handle
        .lock()
        .await
        .history()
        .await
        .map_err(|e| to_rpc_error(METHOD, e))?;

    serde_json::to_value(HistoryResult {
        conversation_id: params.conversation_id,
        messages,
    })
    .map_err(RpcError::Json)
}

fn schedule_follow_up(
    state: &SharedState,
    outbox: Outbox,
    conversation_id: String,
    handle: ConversationHandle,
    delay: Duration,
) {
    state.scheduler.schedule(delay, async move {
        let outcome = handle.lock().await.follow_up().await;
        match outcome {
            Ok(Some(reply)) => {
                let payload = TurnResult {
                    conversation_id: conversation_id.clone(),
                    reply,
                };
                match serde_json::to_value(payload) {
                    Ok(params) => {
                        outbox.notify(FOLLOW_UP_NOTIFICATION, params);
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize follow-up"),
                }
            }
            Ok(None) => debug!(conversation_id = %conversation_id, "Follow-up no longer relevant"),
            Err(e) => warn!(error = %e, conversation_id = %conversation_id, "Follow-up failed"),
        }
    });
}

async fn lookup(state: &SharedState, conversation_id: &str) -> RpcResult<ConversationHandle> {
    state
        .conversation(conversation_id)
        .await
        .ok_or_else(|| RpcError::UnknownConversation {
            conversation_id: conversation_id.to_string(),
        })
}

/// Cosmetic pause so replies do not arrive instantly.
async fn typing_pause(state: &SharedState) {
    let delay = state.config.conversation.typing_delay_ms;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Client mistakes become invalid-params errors; the rest go through the
/// generic mapping.
fn to_rpc_error(method: &str, err: AppError) -> RpcError {
    match err {
        AppError::Conversation(
            e @ (ConversationError::Validation { .. } | ConversationError::InvalidStep { .. }),
        ) => RpcError::InvalidParameters {
            method: method.to_string(),
            message: e.to_string(),
        },
        other => RpcError::from(other),
    }
}

/// Parse method parameters into a typed struct.
fn parse_arguments<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> RpcResult<T> {
    match params {
        Some(args) => serde_json::from_value(args).map_err(|e| RpcError::InvalidParameters {
            method: method.to_string(),
            message: e.to_string(),
        }),
        None => Err(RpcError::InvalidParameters {
            method: method.to_string(),
            message: "Missing params".to_string(),
        }),
    }
}
