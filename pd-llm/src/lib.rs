//! BYO-key LLM client for Pindrop.
//!
//! Non-streaming chat completions with structured (JSON) output, plus an
//! OpenAI-compatible embeddings endpoint. Pure HTTP, no provider SDKs.

mod anthropic;
mod client;
mod error;
mod openai;
mod types;

pub use client::{EmbeddingSupport, LlmClient, Provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, CompletionOptions, Role, Usage};
