//! Core data types shared across the RLM engine.

use serde::{Deserialize, Serialize};

/// An immutable document in the corpus handed to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub content: String,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// The role of a message author in the driver conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the ordered conversation passed to the driver LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text extracted from a driver response between ` ```repl ` fences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub code: String,
}

/// The kind of a sandboxed execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Runtime,
    Timeout,
}

/// A structured error produced by a sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// The status of one `exec` against the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// The result of a single code block execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_value: Option<String>,
    /// Variable name -> runtime type name, excluding builtins and `_`-prefixed names.
    #[serde(default)]
    pub vars: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn is_final(&self) -> bool {
        self.status == ExecutionStatus::Ok
            && (self.final_answer.is_some() || self.final_var.is_some())
    }
}

/// One entry in a query's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStepType {
    CodeGenerated,
    CodeOutput,
    SubcallRequest,
    SubcallResponse,
    FinalAnswer,
    Error,
    Verification,
    SemanticVerification,
}

/// A single structured trace event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    #[serde(rename = "type")]
    pub step_type: TraceStepType,
    pub iteration: u32,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// The terminal status of a query's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Interrupted,
    MaxIterations,
    Error,
}

/// Header metadata recorded at the start of a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHeader {
    pub question: String,
    pub model: String,
    pub started_at: String,
}

/// Summary recorded at the end of a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub status: TraceStatus,
    pub token_usage: TokenUsage,
    pub iterations: u32,
    pub duration_ms: u64,
}

/// The full structured record of one query, returned to the caller and
/// persisted as append-only JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub header: TraceHeader,
    pub steps: Vec<TraceStep>,
    pub summary: Option<TraceSummary>,
}

impl Trace {
    pub fn new(question: impl Into<String>, model: impl Into<String>, started_at: String) -> Self {
        Self {
            header: TraceHeader {
                question: question.into(),
                model: model.into(),
                started_at,
            },
            steps: Vec::new(),
            summary: None,
        }
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    /// The content of the last `final_answer` step, if any.
    pub fn final_answer(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.step_type == TraceStepType::FinalAnswer)
            .map(|s| s.content.as_str())
    }

    /// Flattens this trace into the on-disk JSONL record sequence: a header
    /// line, one line per step, and (once the query has finished) a summary
    /// line.
    pub fn to_records(&self) -> Vec<TraceRecord> {
        let mut records = Vec::with_capacity(self.steps.len() + 2);
        records.push(TraceRecord::Header(self.header.clone()));
        records.extend(self.steps.iter().cloned().map(TraceRecord::Step));
        if let Some(summary) = &self.summary {
            records.push(TraceRecord::Summary(summary.clone()));
        }
        records
    }
}

/// One line of the on-disk trace format. A query's records always appear in
/// this order: one `Header`, zero or more `Step`s, one `Summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum TraceRecord {
    Header(TraceHeader),
    Step(TraceStep),
    Summary(TraceSummary),
}

/// Cumulative token usage across all LLM calls made during a query.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.prompt_tokens += prompt_tokens as u64;
        self.completion_tokens += completion_tokens as u64;
    }
}

/// The outcome of a completed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub trace: Trace,
    pub token_usage: TokenUsage,
    pub execution_time_ms: u64,
}

/// Budget and tuning configuration for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_iterations: u32,
    pub max_output_chars: usize,
    pub execution_timeout_secs: u64,
    pub max_subcall_content_chars: usize,
    pub max_consecutive_no_code: u32,
    pub max_dead_executor_retries: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_output_chars: 8_000,
            execution_timeout_secs: 30,
            max_subcall_content_chars: 500_000,
            max_consecutive_no_code: 2,
            max_dead_executor_retries: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hi").role, Role::Assistant);
        assert_eq!(Message::system("hi").role, Role::System);
    }

    #[test]
    fn token_usage_total_sums_both_fields() {
        let mut usage = TokenUsage::default();
        usage.add(100, 50);
        usage.add(10, 5);
        assert_eq!(usage.total(), 165);
    }

    #[test]
    fn execution_result_is_final_requires_ok_status() {
        let mut result = ExecutionResult {
            status: ExecutionStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            final_answer: Some("blue".into()),
            final_var: None,
            final_value: None,
            vars: Default::default(),
            truncated: false,
        };
        assert!(!result.is_final());
        result.status = ExecutionStatus::Ok;
        assert!(result.is_final());
    }

    #[test]
    fn trace_final_answer_returns_last_matching_step() {
        let mut trace = Trace::new("q", "model", "t0".to_string());
        trace.push(TraceStep {
            step_type: TraceStepType::CodeGenerated,
            iteration: 0,
            content: "code".into(),
            timestamp: "t1".into(),
            prompt_tokens: None,
            completion_tokens: None,
            duration_ms: None,
        });
        trace.push(TraceStep {
            step_type: TraceStepType::FinalAnswer,
            iteration: 0,
            content: "blue".into(),
            timestamp: "t2".into(),
            prompt_tokens: None,
            completion_tokens: None,
            duration_ms: None,
        });
        assert_eq!(trace.final_answer(), Some("blue"));
    }

    #[test]
    fn budget_config_default_matches_spec_defaults() {
        let budget = BudgetConfig::default();
        assert_eq!(budget.max_subcall_content_chars, 500_000);
        assert_eq!(budget.max_consecutive_no_code, 2);
    }
}
