//! Natural-language question answering over SQL and DAX backends.
//!
//! [`SelfCorrectionEngine`] is the entry point: it turns a question into a
//! query, executes it, repairs failures within a bounded number of
//! attempts, and remembers what worked.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dialect;
pub mod error;
pub mod execution_loop;
pub mod generation;
pub mod knowledge;
pub mod llm;
pub mod safety_guardrails;
pub mod schema;
pub mod semantic;

pub use config::EngineConfig;
pub use dialect::Dialect;
pub use error::{EngineError, Result};
pub use execution_loop::{AnswerRequest, AnswerResult, Outcome, SelfCorrectionEngine};
