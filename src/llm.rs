//! Chat-completion clients.
//!
//! [`ChatModel`] accepts an ordered list of role-tagged messages and returns
//! the generated text. Two HTTP backends are provided:
//!
//! | Config `llm.provider` | Endpoint |
//! |---|---|
//! | `ollama` | `POST {url}/api/chat` (non-streaming) |
//! | `openai` | `POST {url}/chat/completions`, key from `OPENAI_API_KEY` |
//!
//! Chat requests are not retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid llm response: {0}")]
    InvalidResponse(String),
    #[error("llm configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier sent to the backend.
    fn model_name(&self) -> &str;

    /// Send the conversation and return the assistant's reply text.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

fn build_client(config: &LlmConfig) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| LlmError::Config(format!("failed to build http client: {e}")))
}

async fn post_json(
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

// ============ Ollama ============

pub struct OllamaChat {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: build_client(config)?,
        })
    }

    fn build_request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        })
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "ollama chat request");

        let json = post_json(
            self.client
                .post(&url)
                .json(&self.build_request_body(messages)),
        )
        .await?;

        let parsed: OllamaChatResponse = serde_json::from_value(json)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.message.content)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiChat {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client: build_client(config)?,
        })
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        let json = post_json(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        parse_openai_chat(&json)
    }
}

/// Build the configured chat backend.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, LlmError> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => Err(LlmError::Config(format!("unknown llm provider: {other}"))),
    }
}
