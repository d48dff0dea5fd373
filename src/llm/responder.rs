//! Reply drafting.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::llm::prompts;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Category, ResponsePolicy};

const REPLY_TEMPERATURE: f32 = 0.7;
const REPLY_MAX_TOKENS: u32 = 500;

/// Maps (message text, category) to optional reply text.
///
/// Returns `None` for categories without a response policy.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, text: &str, category: Category) -> Option<String>;
}

/// Responder backed by a chat-completion model.
pub struct LlmResponder {
    llm: Arc<dyn LlmProvider>,
}

impl LlmResponder {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Responder for LlmResponder {
    async fn respond(&self, text: &str, category: Category) -> Option<String> {
        let policy = category.response_policy()?;

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::reply_system_prompt()),
            ChatMessage::user(prompts::reply_user_prompt(policy, text)),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(REPLY_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(response) => {
                debug!(
                    target: "ai_interactions",
                    operation = "respond",
                    category = %category,
                    model = self.llm.model_name(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    input = %text,
                    output = %response.content,
                    "Reply generated"
                );
                let reply = response.content.trim().to_string();
                if reply.is_empty() { None } else { Some(reply) }
            }
            Err(e) => {
                warn!(category = %category, error = %e, "Reply generation failed");
                None
            }
        }
    }
}

/// Fixed reply templates, used when no model is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateResponder;

impl TemplateResponder {
    pub fn template(policy: ResponsePolicy) -> &'static str {
        match policy {
            ResponsePolicy::ConfirmInterview => {
                "Dear Hiring Team,\n\n\
                 Thank you for the interview invitation. I confirm my availability for the \
                 proposed time and look forward to speaking with you. Please let me know if \
                 there is anything I should prepare in advance.\n\n\
                 Best regards"
            }
            ResponsePolicy::AcknowledgeOffer => {
                "Dear Hiring Team,\n\n\
                 Thank you very much for the offer. I am grateful for the opportunity and \
                 would appreciate two to three business days to review the details before \
                 getting back to you.\n\n\
                 Best regards"
            }
            ResponsePolicy::GraciousDecline => {
                "Dear Hiring Team,\n\n\
                 Thank you for letting me know and for the time you spent considering my \
                 application. I enjoyed learning about the team and would welcome the chance \
                 to be considered for future openings.\n\n\
                 Best regards"
            }
        }
    }
}

#[async_trait]
impl Responder for TemplateResponder {
    async fn respond(&self, _text: &str, category: Category) -> Option<String> {
        category
            .response_policy()
            .map(|policy| Self::template(policy).to_string())
    }
}
