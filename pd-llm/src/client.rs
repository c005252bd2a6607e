use crate::anthropic::AnthropicClient;
use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, CompletionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSupport {
    Native,
    Unavailable,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Self {
        let provider = detect_provider(model);
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            client,
        }
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn embedding_support(&self) -> EmbeddingSupport {
        match self.provider {
            Provider::OpenAI => EmbeddingSupport::Native,
            Provider::Anthropic => EmbeddingSupport::Unavailable,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput("empty message list".to_string()));
        }
        match self.provider {
            Provider::OpenAI => {
                let c = OpenAiClient::new(self.client.clone(), &self.api_key, &self.model);
                c.complete(messages, opts).await
            }
            Provider::Anthropic => {
                let c = AnthropicClient::new(self.client.clone(), &self.api_key, &self.model);
                c.complete(messages, opts).await
            }
        }
    }

    /// Embed a batch of texts. Only available on the OpenAI provider;
    /// Anthropic has no embeddings endpoint, so callers should treat
    /// `Unsupported` as "skip semantic search", not as a failure.
    #[tracing::instrument(level = "info", skip_all, fields(texts = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.provider {
            Provider::OpenAI => {
                let c =
                    OpenAiClient::new(self.client.clone(), &self.api_key, &self.embedding_model);
                c.embed(texts).await
            }
            Provider::Anthropic => Err(LlmError::Unsupported(
                "anthropic provider has no embeddings endpoint".to_string(),
            )),
        }
    }
}

fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    Provider::OpenAI
}
