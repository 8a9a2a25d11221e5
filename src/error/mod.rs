use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Incident not found: {incident_id}")]
    IncidentNotFound { incident_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while driving an SOS conversation
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Unauthenticated: no access token, cached client or session resolved")]
    Unauthenticated,

    #[error("Incident creation failed: {message}")]
    IncidentCreationFailed { message: String },

    #[error("Persistence write failed for {field}: {message}")]
    PersistenceWriteFailed { field: String, message: String },

    #[error("Response generation failed at {step}: {message}")]
    GenerationFailed { step: String, message: String },

    #[error("No eligible interventions for location '{location}'")]
    NoEligibleInterventions { location: String },

    #[error("Malformed selector response: {message}")]
    MalformedSelectorResponse { message: String },

    #[error("Step {step} is not part of the {flow} flow")]
    InvalidStep { flow: String, step: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

impl ConversationError {
    /// Non-technical text shown to the client for errors that end a session early.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            ConversationError::Unauthenticated => Some(
                "We couldn't find your account. Please open the link your coach sent you and try again.",
            ),
            ConversationError::NoEligibleInterventions { .. } => Some(
                "Your coach hasn't set up any strategies for this yet. Please contact your coach so they can add some.",
            ),
            _ => None,
        }
    }
}

/// JSON-RPC boundary errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParameters { method: String, message: String },

    #[error("Unknown conversation: {conversation_id}")]
    UnknownConversation { conversation_id: String },

    #[error("{message}")]
    Unauthenticated { message: String },

    #[error("Execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidRequest { .. } => -32600,
            RpcError::UnknownMethod { .. } => -32601,
            RpcError::InvalidParameters { .. } | RpcError::UnknownConversation { .. } => -32602,
            RpcError::Unauthenticated { .. } => -32001,
            RpcError::ExecutionFailed { .. } | RpcError::Json(_) => -32603,
        }
    }
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conversation(ConversationError::Unauthenticated) => RpcError::Unauthenticated {
                message: ConversationError::Unauthenticated
                    .user_message()
                    .unwrap_or("Unauthenticated")
                    .to_string(),
            },
            other => RpcError::ExecutionFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for JSON-RPC operations
pub type RpcResult<T> = Result<T, RpcError>;
