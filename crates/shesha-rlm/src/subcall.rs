//! Translates sandbox `llm_query` / `llm_query_batched` requests into real
//! sub-LLM calls, wrapping untrusted content with the query's boundary.

use crate::boundary::{wrap_untrusted, Boundary};
use crate::llm_client::SharedLLMClient;
use crate::prompts::PromptLoader;
use crate::sandbox::InboundLlmHandler;
use crate::types::{Message, TraceStep, TraceStepType};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The mutable state shared between the engine's main loop and the inbound
/// sub-LLM handler: trace and token usage, guarded by one per-query mutex.
pub struct QueryState {
    pub trace: crate::types::Trace,
    pub token_usage: crate::types::TokenUsage,
    pub iteration: u32,
}

/// Bounded-parallelism degree for `llm_query_batched` dispatch.
const BATCH_PARALLELISM: usize = 4;

pub struct SubcallHandler {
    pub llm_client: SharedLLMClient,
    pub model: String,
    pub prompts: Arc<PromptLoader>,
    pub boundary: Boundary,
    pub max_subcall_content_chars: usize,
    pub state: Arc<Mutex<QueryState>>,
}

impl SubcallHandler {
    async fn run_one(&self, instruction: &str, content: &str) -> std::result::Result<String, String> {
        let rendered = if content.is_empty() {
            self.prompts.render_subcall(instruction, "")
        } else {
            if content.len() > self.max_subcall_content_chars {
                return Err(format!(
                    "sub-LLM content exceeds the {}-character limit",
                    self.max_subcall_content_chars
                ));
            }
            let wrapped = wrap_untrusted(content, &self.boundary);
            self.prompts.render_subcall(instruction, &wrapped)
        };

        let messages = vec![Message::user(rendered.clone())];

        let iteration = {
            let state = self.state.lock().await;
            state.iteration
        };

        {
            let mut state = self.state.lock().await;
            state.trace.push(TraceStep {
                step_type: TraceStepType::SubcallRequest,
                iteration,
                content: instruction.to_string(),
                timestamp: now_rfc3339(),
                prompt_tokens: None,
                completion_tokens: None,
                duration_ms: None,
            });
        }

        let start = std::time::Instant::now();
        let response = self
            .llm_client
            .complete(&messages, &self.model)
            .await
            .map_err(|e| e.to_string())?;
        let duration_ms = start.elapsed().as_millis() as u64;

        {
            let mut state = self.state.lock().await;
            state.token_usage.add(response.prompt_tokens, response.completion_tokens);
            state.trace.push(TraceStep {
                step_type: TraceStepType::SubcallResponse,
                iteration,
                content: response.content.clone(),
                timestamp: now_rfc3339(),
                prompt_tokens: Some(response.prompt_tokens),
                completion_tokens: Some(response.completion_tokens),
                duration_ms: Some(duration_ms),
            });
        }

        Ok(response.content)
    }
}

#[async_trait]
impl InboundLlmHandler for SubcallHandler {
    async fn handle_llm_query(&self, instruction: &str, content: &str) -> std::result::Result<String, String> {
        self.run_one(instruction, content).await
    }

    async fn handle_llm_query_batch(&self, prompts: &[String]) -> Vec<std::result::Result<String, String>> {
        use futures::stream::{self, StreamExt};

        // each prompt is a single string, treated entirely as untrusted
        // content wrapped under a fixed instruction; order is preserved
        // because `buffered` keeps the stream's input order regardless of
        // per-item completion time.
        stream::iter(prompts.iter().cloned().map(|p| async move {
            self.run_one("Answer the following.", &p).await
        }))
        .buffered(BATCH_PARALLELISM)
        .collect()
        .await
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
