//! Seam between the pipeline and the model provider. The engine and the
//! context assembler only ever see this trait, which keeps them testable
//! with scripted models and makes "no credentials configured" an explicit
//! `None` rather than a client that fails on first use.

use async_trait::async_trait;
use pd_llm::{ChatMessage, ChatResponse, CompletionOptions, LlmClient};

#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> pd_llm::Result<ChatResponse>;

    async fn embed(&self, texts: &[String]) -> pd_llm::Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl DecisionModel for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> pd_llm::Result<ChatResponse> {
        LlmClient::complete(self, messages, opts).await
    }

    async fn embed(&self, texts: &[String]) -> pd_llm::Result<Vec<Vec<f32>>> {
        LlmClient::embed(self, texts).await
    }
}
