//! A configurable mock [`LLMClient`] for testing without real API calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, RlmError};
use crate::llm_client::{CompletionResponse, LLMClient};
use crate::types::Message;

/// Queues responses to return in order, and captures every request made to
/// it for assertions. Mirrors the request-capture shape of the teacher's
/// enhanced mock backend, narrowed to the simple chat contract.
#[derive(Debug, Default)]
pub struct MockLLMClient {
    responses: Mutex<VecDeque<std::result::Result<CompletionResponse, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn with_response(self, content: impl Into<String>, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.responses.lock().unwrap().push_back(Ok(CompletionResponse {
            content: content.into(),
            prompt_tokens,
            completion_tokens,
        }));
        self
    }

    /// Queue a failing call.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn captured_requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn complete(&self, messages: &[Message], _model: &str) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(RlmError::Backend(message)),
            None => Err(RlmError::Backend("MockLLMClient: no queued response".to_string())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Convenience wrapper for handing a [`MockLLMClient`] to code expecting a
/// `SharedLLMClient`, while keeping a handle for assertions.
pub fn shared(client: MockLLMClient) -> Arc<MockLLMClient> {
    Arc::new(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_are_returned_in_queued_order() {
        let client = MockLLMClient::new().with_response("first", 1, 1).with_response("second", 1, 1);
        let a = client.complete(&[Message::user("hi")], "m").await.unwrap();
        let b = client.complete(&[Message::user("hi")], "m").await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(client.request_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_queue_returns_a_backend_error() {
        let client = MockLLMClient::new();
        let result = client.complete(&[Message::user("hi")], "m").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn queued_error_surfaces_as_backend_error() {
        let client = MockLLMClient::new().with_error("rate limited");
        let result = client.complete(&[Message::user("hi")], "m").await;
        assert!(matches!(result, Err(RlmError::Backend(msg)) if msg == "rate limited"));
    }
}
