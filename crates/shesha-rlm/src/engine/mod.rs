//! The RLM state machine: drives the LLM-writes-code-executes-repeat loop.

mod budget;
mod trace;


pub use budget::IterationBudget;
pub use trace::{ExecTraceData, IterationTraceData, QueryCompletionTraceData, QueryStartTraceData};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use crate::boundary::Boundary;
use crate::code_echo::format_code_echo;
use crate::error::Result;
use crate::llm_client::SharedLLMClient;
use crate::prompts::PromptLoader;
use crate::sandbox::{ContainerPool, InboundLlmHandler};
use crate::subcall::{QueryState, SubcallHandler};
use crate::types::{
    BudgetConfig, Document, ExecutionResult, Message, QueryResult, Trace, TraceStatus, TraceStep,
    TraceStepType,
};

/// Invoked after every trace step is appended. Must be non-blocking.
pub type ProgressCallback = Arc<dyn Fn(TraceStepType, u32, &str, u64) + Send + Sync>;

/// Any observable flag the caller can flip from another thread to request
/// cancellation at the next iteration or block boundary.
pub type CancelFlag = Arc<AtomicBool>;

fn is_cancelled(cancel: &Option<CancelFlag>) -> bool {
    cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Configuration fixed for the lifetime of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub budget: BudgetConfig,
}

/// Ties together the pool, the LLM client, and the prompt templates to run
/// full queries end to end.
pub struct Engine {
    llm_client: SharedLLMClient,
    pool: Arc<ContainerPool>,
    prompts: Arc<PromptLoader>,
    config: EngineConfig,
}

/// Rejects any inbound call made before a query's real handler is bound —
/// used only around the context-seeding exec, which must not call out.
struct NoCallbacksHandler;

#[async_trait]
impl InboundLlmHandler for NoCallbacksHandler {
    async fn handle_llm_query(&self, _instruction: &str, _content: &str) -> std::result::Result<String, String> {
        Err("sub-LLM calls are not available during context initialization".to_string())
    }

    async fn handle_llm_query_batch(&self, prompts: &[String]) -> Vec<std::result::Result<String, String>> {
        prompts
            .iter()
            .map(|_| Err("sub-LLM calls are not available during context initialization".to_string()))
            .collect()
    }
}

/// Builds the Python source that seeds the sandbox's `context` name from the
/// caller's documents, round-tripping through JSON so escaping matches the
/// wire protocol used everywhere else.
fn context_init_code(documents: &[Document], context_type: &str) -> Result<String> {
    let value = if context_type == "str" {
        serde_json::Value::String(documents.first().map(|d| d.content.clone()).unwrap_or_default())
    } else {
        serde_json::Value::Array(
            documents
                .iter()
                .map(|d| serde_json::Value::String(d.content.clone()))
                .collect(),
        )
    };
    let inner_json = serde_json::to_string(&value)?;
    let literal = serde_json::to_string(&inner_json)?;
    Ok(format!("import json as _json\ncontext = _json.loads({literal})"))
}

/// `context_lengths`: sizes of up to the first 100 documents, with a
/// `"... [k others]"` tail when there are more.
fn summarize_lengths(documents: &[Document]) -> (String, usize) {
    let total: usize = documents.iter().map(|d| d.content.len()).sum();
    let shown: Vec<String> = documents.iter().take(100).map(|d| d.content.len().to_string()).collect();
    let mut summary = shown.join(", ");
    if documents.len() > 100 {
        summary.push_str(&format!(", ... [{} others]", documents.len() - 100));
    }
    (summary, total)
}

fn code_block_regex() -> Regex {
    Regex::new(r"(?s)```repl\n(.*?)\n```").expect("static regex is valid")
}

fn extract_code_blocks(text: &str) -> Vec<String> {
    code_block_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Folds a sandbox error into the text shown back to the driver, so it can
/// correct course without the engine treating it as fatal.
fn render_exec_output(result: &ExecutionResult) -> String {
    match &result.error {
        Some(err) => format!("{}\n[{:?} error] {}", result.stdout, err.kind, err.message),
        None => result.stdout.clone(),
    }
}

fn notify(cb: &Option<ProgressCallback>, step_type: TraceStepType, iteration: u32, content: &str, tokens: u64) {
    if let Some(cb) = cb {
        cb(step_type, iteration, content, tokens);
    }
}

impl Engine {
    pub fn new(llm_client: SharedLLMClient, pool: Arc<ContainerPool>, prompts: Arc<PromptLoader>, config: EngineConfig) -> Self {
        Self {
            llm_client,
            pool,
            prompts,
            config,
        }
    }

    pub async fn query(
        &self,
        documents: &[Document],
        question: &str,
        on_progress: Option<ProgressCallback>,
        cancel: Option<CancelFlag>,
    ) -> Result<QueryResult> {
        let start = Instant::now();
        let budget_config = self.config.budget.clone();
        let boundary = Boundary::generate();

        let context_type = if documents.len() == 1 { "str" } else { "list" };
        let (context_lengths, context_total_length) = summarize_lengths(documents);

        let mut messages = vec![
            Message::system(self.prompts.render_system_prompt(Some(&boundary))),
            Message::assistant(self.prompts.render_context_metadata(context_type, context_total_length, &context_lengths)),
            Message::user(self.prompts.render_iteration_zero(question)),
        ];

        shesha_tracing::start_span_with_data(
            "shesha_query",
            &QueryStartTraceData {
                model: self.config.model.clone(),
                question_len: question.len(),
                doc_count: documents.len(),
                max_iterations: budget_config.max_iterations,
            },
        );

        let state = Arc::new(Mutex::new(QueryState {
            trace: Trace::new(question, self.config.model.clone(), now_rfc3339()),
            token_usage: crate::types::TokenUsage::default(),
            iteration: 0,
        }));

        let mut executor = Some(self.pool.acquire().await?);
        let init_code = context_init_code(documents, context_type)?;
        if let Err(e) = executor.as_mut().unwrap().exec(&init_code, &NoCallbacksHandler).await {
            self.pool.release(executor.take().unwrap()).await;
            shesha_tracing::end_span_error(&e.to_string());
            return Err(e);
        }

        let handler = SubcallHandler {
            llm_client: self.llm_client.clone(),
            model: self.config.model.clone(),
            prompts: self.prompts.clone(),
            boundary: boundary.clone(),
            max_subcall_content_chars: budget_config.max_subcall_content_chars,
            state: state.clone(),
        };

        let mut budget = IterationBudget::new(budget_config);
        let mut answer: Option<String> = None;
        let mut status = TraceStatus::Ok;

        'main: loop {
            if is_cancelled(&cancel) {
                status = TraceStatus::Interrupted;
                break;
            }
            if budget.iterations_exhausted() {
                tracing::debug!(error = %budget.as_exceeded_error(), "iteration budget exhausted, falling through to max-iter fallback");
                break;
            }

            let llm_start = Instant::now();
            let response = match self.llm_client.complete(&messages, &self.config.model).await {
                Ok(r) => r,
                Err(e) => {
                    answer = Some(format!("[error] {e}"));
                    status = TraceStatus::Error;
                    break;
                }
            };
            let llm_latency_ms = llm_start.elapsed().as_millis() as u64;

            let iteration = budget.iteration();
            let total_tokens = {
                let mut s = state.lock().await;
                s.token_usage.add(response.prompt_tokens, response.completion_tokens);
                s.trace.push(TraceStep {
                    step_type: TraceStepType::CodeGenerated,
                    iteration,
                    content: response.content.clone(),
                    timestamp: now_rfc3339(),
                    prompt_tokens: Some(response.prompt_tokens),
                    completion_tokens: Some(response.completion_tokens),
                    duration_ms: Some(llm_latency_ms),
                });
                s.token_usage.total()
            };
            notify(&on_progress, TraceStepType::CodeGenerated, iteration, &response.content, total_tokens);
            messages.push(Message::assistant(response.content.clone()));

            let blocks = extract_code_blocks(&response.content);
            shesha_tracing::start_span_with_data(
                "iteration",
                &IterationTraceData {
                    iteration,
                    code_blocks: blocks.len(),
                    llm_latency_ms,
                    prompt_tokens: response.prompt_tokens,
                    completion_tokens: response.completion_tokens,
                },
            );
            shesha_tracing::end_span_ok();

            if blocks.is_empty() && iteration > 0 {
                budget.record_no_code_response();
                if budget.no_code_tolerance_exhausted() {
                    break;
                }
                messages.push(Message::user(self.prompts.render_code_required()));
                budget.advance_iteration();
                state.lock().await.iteration = budget.iteration();
                continue;
            }
            budget.reset_no_code_streak();

            for block in &blocks {
                if is_cancelled(&cancel) {
                    status = TraceStatus::Interrupted;
                    break 'main;
                }

                let exec_started = Instant::now();
                let exec_result = match executor.as_mut().unwrap().exec(block, &handler).await {
                    Ok(r) => r,
                    Err(e) => {
                        state.lock().await.trace.push(TraceStep {
                            step_type: TraceStepType::Error,
                            iteration,
                            content: e.to_string(),
                            timestamp: now_rfc3339(),
                            prompt_tokens: None,
                            completion_tokens: None,
                            duration_ms: None,
                        });
                        self.pool.release(executor.take().unwrap()).await;
                        budget.record_dead_executor();
                        if budget.dead_executor_retries_exhausted() {
                            answer = Some("[Executor died — cannot continue]".to_string());
                            status = TraceStatus::Error;
                            break 'main;
                        }
                        let replacement = loop {
                            let mut candidate = self.pool.acquire().await?;
                            let init_code = context_init_code(documents, context_type)?;
                            if candidate.exec(&init_code, &NoCallbacksHandler).await.is_ok() {
                                break candidate;
                            }
                            self.pool.release(candidate).await;
                            budget.record_dead_executor();
                            if budget.dead_executor_retries_exhausted() {
                                answer = Some("[Executor died — cannot continue]".to_string());
                                status = TraceStatus::Error;
                                break 'main;
                            }
                        };
                        executor = Some(replacement);
                        continue;
                    }
                };
                shesha_tracing::start_span_with_data(
                    "exec",
                    &ExecTraceData {
                        iteration,
                        status: if exec_result.error.is_some() { "error" } else { "ok" },
                        duration_ms: exec_started.elapsed().as_millis() as u64,
                        truncated: exec_result.truncated,
                    },
                );
                shesha_tracing::end_span_ok();

                if exec_result.is_final() {
                    let final_text = exec_result
                        .final_answer
                        .clone()
                        .unwrap_or_else(|| exec_result.final_value.clone().unwrap_or_default());
                    let total_tokens = {
                        let mut s = state.lock().await;
                        s.trace.push(TraceStep {
                            step_type: TraceStepType::FinalAnswer,
                            iteration,
                            content: final_text.clone(),
                            timestamp: now_rfc3339(),
                            prompt_tokens: None,
                            completion_tokens: None,
                            duration_ms: None,
                        });
                        s.token_usage.total()
                    };
                    notify(&on_progress, TraceStepType::FinalAnswer, iteration, &final_text, total_tokens);
                    answer = Some(final_text);
                    break 'main;
                }

                let output = render_exec_output(&exec_result);
                let echo = format_code_echo(block, &output, &exec_result.vars, &boundary);
                let total_tokens = {
                    let mut s = state.lock().await;
                    s.trace.push(TraceStep {
                        step_type: TraceStepType::CodeOutput,
                        iteration,
                        content: echo.clone(),
                        timestamp: now_rfc3339(),
                        prompt_tokens: None,
                        completion_tokens: None,
                        duration_ms: None,
                    });
                    s.token_usage.total()
                };
                notify(&on_progress, TraceStepType::CodeOutput, iteration, &echo, total_tokens);
                messages.push(Message::user(echo));
            }

            if answer.is_some() {
                break;
            }

            messages.push(Message::user(self.prompts.render_iteration_continue(question)));
            budget.advance_iteration();
            state.lock().await.iteration = budget.iteration();
        }

        if answer.is_none() && status != TraceStatus::Interrupted {
            messages.push(Message::user(
                "Please provide a final answer to the user's question based on the information provided.",
            ));
            match self.llm_client.complete(&messages, &self.config.model).await {
                Ok(response) => {
                    let mut s = state.lock().await;
                    s.token_usage.add(response.prompt_tokens, response.completion_tokens);
                    let content = format!("[max-iter fallback] {}", response.content);
                    s.trace.push(TraceStep {
                        step_type: TraceStepType::FinalAnswer,
                        iteration: budget.iteration(),
                        content: content.clone(),
                        timestamp: now_rfc3339(),
                        prompt_tokens: Some(response.prompt_tokens),
                        completion_tokens: Some(response.completion_tokens),
                        duration_ms: None,
                    });
                    drop(s);
                    answer = Some(response.content);
                    status = TraceStatus::MaxIterations;
                }
                Err(e) => {
                    answer = Some(format!("[error] {e}"));
                    status = TraceStatus::Error;
                }
            }
        }

        if status == TraceStatus::Interrupted {
            answer = Some("[interrupted]".to_string());
        }

        if let Some(executor) = executor {
            self.pool.release(executor).await;
        }

        let final_answer = answer.unwrap_or_else(|| "[error] no answer produced".to_string());
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut s = state.lock().await;
        let token_usage = s.token_usage;
        s.trace.summary = Some(crate::types::TraceSummary {
            status,
            token_usage,
            iterations: budget.iteration(),
            duration_ms,
        });
        let trace = s.trace.clone();
        drop(s);

        shesha_tracing::record_event(
            "shesha_query_completion",
            Some(&QueryCompletionTraceData {
                termination_reason: format!("{status:?}"),
                iterations: budget.iteration(),
                tokens_used: token_usage.total(),
                duration_ms,
            }),
        );
        shesha_tracing::end_span_ok();

        Ok(QueryResult {
            answer: final_answer,
            trace,
            token_usage,
            execution_time_ms: duration_ms,
        })
    }
}
