//! Triage pipeline.
//!
//! Every fetched message flows through:
//! 1. `Pipeline::process()`: dedup, classify, label, respond, record, draft
//! 2. `Orchestrator::run()`: roster × mailbox sessions × messages
//!
//! `rules` holds the keyword classifier used when no model is configured.

pub mod orchestrator;
pub mod processor;
pub mod rules;
pub mod types;

pub use orchestrator::{Orchestrator, RunSummary, SessionRegistry};
pub use processor::Pipeline;
pub use rules::KeywordClassifier;
