//! LLM integration for job-triage.
//!
//! One backend: any OpenAI-compatible `/chat/completions` endpoint, called
//! through reqwest. Classification and reply drafting sit on top of the
//! `LlmProvider` trait so tests can swap the model out.

pub mod classifier;
pub mod openai;
pub mod prompts;
pub mod provider;
pub mod responder;

pub use classifier::{Classifier, LlmClassifier};
pub use openai::OpenAiProvider;
pub use provider::*;
pub use responder::{LlmResponder, Responder, TemplateResponder};

use std::sync::Arc;

use secrecy::SecretString;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    tracing::info!("Using OpenAI-compatible endpoint {} (model: {})", config.base_url, config.model);
    Arc::new(OpenAiProvider::new(
        &config.base_url,
        config.api_key.clone(),
        config.model.clone(),
    ))
}
