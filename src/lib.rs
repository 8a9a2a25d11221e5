//! # SOS Coach
//!
//! Backend for guided "SOS" conversations between a coached client and their
//! coach's voice. A client in a difficult moment (a food craving or a
//! low-energy slump) answers a short series of questions, is offered one of
//! their coach's interventions, and later rates how it went.
//!
//! ## Features
//!
//! - **Two flows**: craving and energy, each a static table of steps
//! - **Phrased replies**: every coach line is written by a Langbase pipe, with
//!   static fallbacks where the flow allows them
//! - **Intervention selection**: location filtering, recent-use rotation and
//!   AI ranking with a deterministic fallback
//! - **Incident log**: answers, messages and ratings persisted to SQLite
//! - **Follow-ups**: one delayed check-in after a suggestion is accepted
//!
//! ## Architecture
//!
//! ```text
//! Client app → JSON-RPC (stdio) → UnifiedDispatcher → Craving/Energy engine
//!                                        ↓                    ↓
//!                                 SQLite (incidents)   Langbase Pipes (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sos_coach::{AppState, Config, RpcServer};
//! use sos_coach::langbase::LangbaseClient;
//! use sos_coach::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let state = Arc::new(AppState::with_langbase(config, storage, langbase));
//!     RpcServer::serve_stdio(state).await?;
//!     Ok(())
//! }
//! ```

/// Command-line subcommands and catalog seeding.
pub mod cli;
/// Configuration management.
pub mod config;
/// Conversation flows, engines and the dispatcher.
pub mod conversation;
/// Error types and result aliases for the application.
pub mod error;
/// Coach line generation and intervention ranking.
pub mod generator;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// JSON-RPC server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, RpcServer, SharedState};
