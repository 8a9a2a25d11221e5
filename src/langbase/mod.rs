//! Langbase API client and types for pipe communication.
//!
//! Two pipes are used: one phrases each coach turn, the other ranks
//! candidate interventions and answers with strict JSON.

mod client;
mod types;


pub use client::LangbaseClient;
pub use types::*;
