//! Message classification.
//!
//! A `Classifier` returns a raw label. The pipeline owns the single
//! coercion into `Category`, so anything a classifier says outside the
//! closed set still lands on `Other` in one place.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::llm::prompts;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Category;

/// Temperature for classification (kept low for consistent labels).
const CLASSIFY_TEMPERATURE: f32 = 0.3;

/// A label is one word; leave a little room for drift.
const CLASSIFY_MAX_TOKENS: u32 = 50;

/// Maps message text to a category label.
///
/// Must not fail: internal errors resolve to `Category::Other`'s label.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> String;
}

/// Classifier backed by a chat-completion model.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, text: &str) -> String {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::classification_system_prompt()),
            ChatMessage::user(prompts::classification_user_prompt(text)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(response) => {
                debug!(
                    target: "ai_interactions",
                    operation = "classify",
                    model = self.llm.model_name(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    input = %text,
                    output = %response.content,
                    "Classification completed"
                );
                response.content
            }
            Err(e) => {
                warn!(error = %e, "Classification call failed, falling back to Other");
                debug!(
                    target: "ai_interactions",
                    operation = "classify",
                    model = self.llm.model_name(),
                    input = %text,
                    error = %e,
                    "Classification failed"
                );
                Category::Other.label().to_string()
            }
        }
    }
}
