use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, CompletionOptions, Role, Usage};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<ChatResponse> {
        let req = AnthropicRequest::new(&self.model, messages, opts);

        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status("anthropic messages", status, &body));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
}

impl<'a> AnthropicRequest<'a> {
    /// System messages are hoisted into the dedicated `system` field;
    /// Anthropic rejects them inside the messages array.
    fn new(model: &'a str, messages: &'a [ChatMessage], opts: &CompletionOptions) -> Self {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut chat: Vec<AnthropicMessage<'a>> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => system_parts.push(&m.content),
                Role::User => chat.push(AnthropicMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => chat.push(AnthropicMessage {
                    role: "assistant",
                    content: &m.content,
                }),
            }
        }
        Self {
            model,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            messages: chat,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl TryFrom<AnthropicResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(value: AnthropicResponse) -> Result<Self> {
        let mut content = String::new();
        for block in &value.content {
            if let AnthropicContentBlock::Text { text } = block {
                content.push_str(text);
            }
        }
        if content.is_empty() {
            return Err(LlmError::ResponseFormat(
                "anthropic response has no text content".to_string(),
            ));
        }
        Ok(ChatResponse {
            content,
            usage: value
                .usage
                .map(|u| Usage {
                    prompt_tokens: u.input_tokens.unwrap_or(0) as u32,
                    completion_tokens: u.output_tokens.unwrap_or(0) as u32,
                })
                .unwrap_or_default(),
            finish_reason: value.stop_reason.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_messages_are_hoisted() {
        let messages = vec![
            ChatMessage::system("policy"),
            ChatMessage::user("decide"),
        ];
        let req = AnthropicRequest::new(
            "claude-sonnet-4-20250514",
            &messages,
            &CompletionOptions::default(),
        );
        let v = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(v["system"], "policy");
        assert_eq!(v["messages"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(v["messages"][0]["role"], "user");
    }

    #[test]
    fn response_text_blocks_are_concatenated() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "{\"shouldNotify\":" },
                { "type": "text", "text": "false}" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 50, "output_tokens": 8 }
        });
        let parsed: AnthropicResponse = serde_json::from_value(raw).expect("deserialize");
        let resp: ChatResponse = parsed.try_into().expect("convert");
        assert_eq!(resp.content, "{\"shouldNotify\":false}");
        assert_eq!(resp.usage.completion_tokens, 8);
    }

    #[test]
    fn empty_content_is_a_format_error() {
        let parsed: AnthropicResponse = serde_json::from_value(json!({
            "content": [],
            "stop_reason": "end_turn"
        }))
        .expect("deserialize");
        let err = ChatResponse::try_from(parsed).unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }
}
