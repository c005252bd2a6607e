use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, CompletionOptions, Role, Usage};
use serde::{Deserialize, Serialize};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
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
        let req = OpenAiChatRequest::new(&self.model, messages, opts);

        let response = self
            .http
            .post(OPENAI_CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status("openai chat", status, &body));
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .http
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_status("openai embeddings", status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        parse_embedding_response(parsed)
    }
}

/// The embeddings API does not guarantee response order matches input
/// order; items carry an index and must be sorted by it.
fn parse_embedding_response(json: serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmError::ResponseFormat("embedding response missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                LlmError::ResponseFormat("embedding item missing embedding array".to_string())
            })?;
        let mut vec = Vec::with_capacity(embedding.len());
        for value in embedding {
            let number = value.as_f64().ok_or_else(|| {
                LlmError::ResponseFormat("embedding value must be numeric".to_string())
            })?;
            vec.push(number as f32);
        }
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

impl<'a> OpenAiChatRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage], opts: &CompletionOptions) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            response_format: opts.json_output.then(|| OpenAiResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(value: OpenAiChatResponse) -> Result<Self> {
        let choice = value
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseFormat("openai response has no choices".to_string()))?;
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: value
                .usage
                .map(|u| Usage {
                    prompt_tokens: u.prompt_tokens.unwrap_or(0) as u32,
                    completion_tokens: u.completion_tokens.unwrap_or(0) as u32,
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_includes_json_response_format() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = OpenAiChatRequest::new("gpt-4o-mini", &messages, &CompletionOptions::default());
        let v = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(v["response_format"]["type"], "json_object");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hi");
    }

    #[test]
    fn chat_request_omits_response_format_when_disabled() {
        let messages = vec![ChatMessage::user("hi")];
        let opts = CompletionOptions {
            json_output: false,
            ..CompletionOptions::default()
        };
        let req = OpenAiChatRequest::new("gpt-4o-mini", &messages, &opts);
        let v = serde_json::to_value(&req).expect("serialize request");
        assert!(v.get("response_format").is_none());
    }

    #[test]
    fn parses_embeddings_in_index_order() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [2.0, 3.0] },
                { "index": 0, "embedding": [0.5, 1.5] }
            ]
        });
        let parsed = parse_embedding_response(json).expect("parse embeddings");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], vec![0.5, 1.5]);
        assert_eq!(parsed[1], vec![2.0, 3.0]);
    }

    #[test]
    fn chat_response_conversion() {
        let raw = json!({
            "choices": [{
                "message": { "content": "{\"shouldNotify\":true}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 18 }
        });
        let parsed: OpenAiChatResponse = serde_json::from_value(raw).expect("deserialize");
        let resp: ChatResponse = parsed.try_into().expect("convert");
        assert_eq!(resp.content, "{\"shouldNotify\":true}");
        assert_eq!(resp.usage.prompt_tokens, 120);
        assert_eq!(resp.finish_reason, "stop");
    }

    #[test]
    fn empty_choices_is_a_format_error() {
        let parsed: OpenAiChatResponse =
            serde_json::from_value(json!({ "choices": [] })).expect("deserialize");
        let err = ChatResponse::try_from(parsed).unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }
}
