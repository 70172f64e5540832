//! Thin retrying request/response facade over a chat-completion endpoint.
//!
//! The engine's driver and sub-LLM calls both go through this trait. The
//! concrete `OpenAiCompatibleClient` speaks the OpenAI chat-completions wire
//! format; `MockLLMClient` (in `testing`) drives tests deterministically.

use crate::error::{Result, RlmError};
use crate::types::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The result of one completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl CompletionResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// External collaborator contract: translate a message list into a driver
/// (or sub-LLM) response. Implementations own their own retries and
/// translate transport errors into `RlmError::Backend`.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(&self, messages: &[Message], model: &str) -> Result<CompletionResponse>;

    fn name(&self) -> &str;
}

pub type SharedLLMClient = Arc<dyn LLMClient>;

/// Execute an async operation with exponential backoff retry. Retries only
/// on transient network errors; non-retryable errors return immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    client_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_error = Some(e);
                if attempt < max_retries {
                    tracing::warn!(
                        client = client_name,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

/// Only transport/network failures are retried; application-level (4xx/5xx
/// already translated into `Backend`) errors are not.
fn is_retryable(error: &RlmError) -> bool {
    matches!(error, RlmError::Backend(msg) if msg.contains("transport"))
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(serde::Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn role_str(role: crate::types::Role) -> &'static str {
    match role {
        crate::types::Role::System => "system",
        crate::types::Role::User => "user",
        crate::types::Role::Assistant => "assistant",
    }
}

/// An OpenAI-chat-completions-compatible HTTP client.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_retries: 3,
        }
    }

    async fn complete_once(&self, messages: &[Message], model: &str) -> Result<CompletionResponse> {
        let body = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: role_str(m.role),
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RlmError::Backend(format!("transport error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RlmError::Backend(format!("{status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RlmError::Backend(format!("transport error: bad response body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RlmError::Backend("empty choices array".into()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
        })
    }
}

#[async_trait]
impl LLMClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[Message], model: &str) -> Result<CompletionResponse> {
        with_retry(self.max_retries, Duration::from_millis(500), self.name(), || {
            self.complete_once(messages, model)
        })
        .await
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
