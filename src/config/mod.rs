use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub conversation: ConversationConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe that phrases each coach turn.
    pub response: String,
    /// Pipe that ranks candidate interventions.
    pub ranker: String,
}

/// What a flow does when the response generator fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPolicy {
    /// Substitute the static fallback line for the step.
    Fallback,
    /// Abort the turn with `GenerationFailed`.
    Propagate,
}

impl FromStr for GenerationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fallback" => Ok(GenerationPolicy::Fallback),
            "propagate" => Ok(GenerationPolicy::Propagate),
            _ => Err(format!("Unknown generation policy: {}", s)),
        }
    }
}

/// Timing and policy knobs for SOS conversations
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Rolling window in which an unresolved incident is still "active".
    pub active_incident_window_minutes: i64,
    /// Cosmetic delay before a coach reply is emitted.
    pub typing_delay_ms: u64,
    /// One-shot follow-up delay after craving encouragement.
    pub craving_follow_up_secs: u64,
    /// One-shot follow-up delay after energy encouragement.
    pub energy_follow_up_secs: u64,
    /// Number of recent incidents whose intervention counts as "recently suggested".
    pub recent_suggestion_limit: u32,
    pub craving_generation_policy: GenerationPolicy,
    pub energy_generation_policy: GenerationPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/sos-coach.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_var("MAX_RETRIES", 3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            response: env::var("PIPE_RESPONSE").unwrap_or_else(|_| "sos-response-v1".to_string()),
            ranker: env::var("PIPE_RANKER")
                .unwrap_or_else(|_| "intervention-ranker-v1".to_string()),
        };

        let defaults = ConversationConfig::default();
        let conversation = ConversationConfig {
            active_incident_window_minutes: parse_var(
                "ACTIVE_INCIDENT_WINDOW_MINUTES",
                defaults.active_incident_window_minutes,
            ),
            typing_delay_ms: parse_var("TYPING_DELAY_MS", defaults.typing_delay_ms),
            craving_follow_up_secs: parse_var(
                "CRAVING_FOLLOW_UP_SECS",
                defaults.craving_follow_up_secs,
            ),
            energy_follow_up_secs: parse_var("ENERGY_FOLLOW_UP_SECS", defaults.energy_follow_up_secs),
            recent_suggestion_limit: parse_var(
                "RECENT_SUGGESTION_LIMIT",
                defaults.recent_suggestion_limit,
            ),
            craving_generation_policy: parse_var(
                "CRAVING_GENERATION_POLICY",
                defaults.craving_generation_policy,
            ),
            energy_generation_policy: parse_var(
                "ENERGY_GENERATION_POLICY",
                defaults.energy_generation_policy,
            ),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            conversation,
        })
    }
}

/// Read an env var and parse it, falling back to `default` when unset or malformed.
fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            response: "sos-response-v1".to_string(),
            ranker: "intervention-ranker-v1".to_string(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            active_incident_window_minutes: 60,
            typing_delay_ms: 1000,
            craving_follow_up_secs: 30,
            energy_follow_up_secs: 900,
            recent_suggestion_limit: 3,
            craving_generation_policy: GenerationPolicy::Fallback,
            energy_generation_policy: GenerationPolicy::Propagate,
        }
    }
}
