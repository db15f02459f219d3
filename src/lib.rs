//! Mutual Fund Query Agent
//!
//! Answers natural-language questions about Indian mutual funds:
//! - Resolves each question into a closed Intent (search / lookup / compare)
//! - Fetches fund data concurrently, tolerating partial failures
//! - Writes the answer with a reasoning service, checked against the evidence
//! - Falls back to an evidence-only template when generation is unusable
//!
//! PIPELINE:
//! QUESTION → RESOLVE → EXECUTE → SYNTHESIZE → ANSWER

pub mod agent;
pub mod api;
pub mod audit;
pub mod budget;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod models;
pub mod reasoning;
pub mod resolver;
pub mod retry;
pub mod synthesis;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use agent::AgentOrchestrator;
pub use classifier::{Classification, QuestionClassifier};
pub use config::Settings;
pub use models::*;
