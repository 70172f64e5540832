//! Operator-facing `shesha_tracing` span data for the engine's main loop.
//!
//! This is distinct from [`crate::types::Trace`]/[`crate::types::TraceStep`],
//! the spec-mandated per-query structured record returned to callers. These
//! types feed the generic diagnostic span collector instead.

use serde::Serialize;

/// Captured once when a query begins.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStartTraceData {
    pub model: String,
    pub question_len: usize,
    pub doc_count: usize,
    pub max_iterations: u32,
}

/// Captured once per main-loop iteration, after the driver call returns.
#[derive(Debug, Clone, Serialize)]
pub struct IterationTraceData {
    pub iteration: u32,
    pub code_blocks: usize,
    pub llm_latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Captured once per sandbox `exec`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecTraceData {
    pub iteration: u32,
    pub status: &'static str,
    pub duration_ms: u64,
    pub truncated: bool,
}

/// Captured once when a query finishes, however it finishes.
#[derive(Debug, Clone, Serialize)]
pub struct QueryCompletionTraceData {
    pub termination_reason: String,
    pub iterations: u32,
    pub tokens_used: u64,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_start_trace_data_serializes() {
        let data = QueryStartTraceData {
            model: "test-model".to_string(),
            question_len: 42,
            doc_count: 1,
            max_iterations: 10,
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("test-model"));
        assert!(json.contains("42"));
    }

    #[test]
    fn query_completion_trace_data_serializes() {
        let data = QueryCompletionTraceData {
            termination_reason: "final_answer".to_string(),
            iterations: 1,
            tokens_used: 120,
            duration_ms: 500,
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("final_answer"));
        assert!(json.contains("120"));
    }
}
