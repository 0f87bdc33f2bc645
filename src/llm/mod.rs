pub mod json;
pub mod tensorzero;

use async_trait::async_trait;

pub use json::{JsonExtractError, extract_json_object, parse_json_object, strip_markdown_fence};
pub use tensorzero::{LlmClient, LlmConfig, LlmError, LlmMessage, LlmResponse};

/// Single-turn completion used by the category and aspect resolvers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError>;
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        LlmClient::chat(self, messages).await
    }
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}
