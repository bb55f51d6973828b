//! AI-assistant collaborator
//!
//! The assistant is addressed like any other client identity. The router
//! hands the message content to `Assistant::complete` and routes the reply
//! back to the sender as an ordinary direct message.
//!
//! `ChatCompletionClient` speaks the OpenAI-compatible
//! `POST {base_url}/chat/completions` API (DeepSeek by default).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::error::BackendError;
use crate::shared::config::AssistantConfig;

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Produce a reply to `prompt`
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ChatTurn {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatTurn,
}

/// reqwest client for a chat-completion endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, BackendError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BackendError::state("assistant API key is not configured"))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Assistant for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![ChatTurn {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::collaborator(
                "assistant",
                format!("{} returned {}: {}", self.endpoint, status, body),
            ));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| BackendError::collaborator("assistant", "completion had no choices"))
    }
}
