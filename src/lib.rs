//! Job triage: labels, counts and drafts replies for candidates' job mail.

pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod store;
