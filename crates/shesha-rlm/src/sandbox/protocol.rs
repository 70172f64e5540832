//! Wire types for the newline-delimited JSON protocol spoken with the
//! sandbox subprocess.

use crate::types::{ExecutionError, ExecutionResult};
use serde::{Deserialize, Serialize};

/// Frames the host sends to the sandbox.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostFrame {
    Exec { code: String },
    Reset,
    LlmResponse { result: String },
    LlmError { message: String },
    LlmBatchResponse { results: Vec<BatchSlot> },
}

/// One slot of a batched sub-LLM response: either the text result or an
/// error, carried back in the original request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSlot {
    Ok { result: String },
    Err { error: String },
}

/// Frames the sandbox sends to the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SandboxFrame {
    Result {
        status: String,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        error: Option<ExecutionError>,
        #[serde(default)]
        final_answer: Option<String>,
        #[serde(default)]
        final_var: Option<String>,
        #[serde(default)]
        final_value: Option<String>,
        #[serde(default)]
        vars: std::collections::BTreeMap<String, String>,
    },
    ResetOk,
    LlmQuery {
        instruction: String,
        #[serde(default)]
        content: String,
    },
    LlmQueryBatch {
        prompts: Vec<String>,
    },
}

impl SandboxFrame {
    pub fn into_execution_result(self, truncate: impl Fn(&str) -> (String, bool)) -> Option<ExecutionResult> {
        match self {
            SandboxFrame::Result {
                status,
                stdout,
                stderr,
                error,
                final_answer,
                final_var,
                final_value,
                vars,
            } => {
                let (stdout, stdout_trunc) = truncate(&stdout);
                let (stderr, stderr_trunc) = truncate(&stderr);
                Some(ExecutionResult {
                    status: if status == "ok" {
                        crate::types::ExecutionStatus::Ok
                    } else {
                        crate::types::ExecutionStatus::Error
                    },
                    stdout,
                    stderr,
                    error,
                    final_answer,
                    final_var,
                    final_value,
                    vars,
                    truncated: stdout_trunc || stderr_trunc,
                })
            }
            _ => None,
        }
    }
}

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// marker when truncation occurs. Truncation is always recorded, never
/// silently dropped.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("... [truncated]");
    (truncated, true)
}
