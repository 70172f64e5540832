//! Error types for the RLM engine.

use thiserror::Error;

/// Result type alias for RLM operations.
pub type Result<T> = std::result::Result<T, RlmError>;

/// Errors that can leave the engine. Recoverable per-exec and per-subcall
/// failures are absorbed into the trace instead (see `ExecutionError`,
/// `ErrorKind`) and never surface here.
#[derive(Debug, Error)]
pub enum RlmError {
    /// A prompt template is missing or its placeholders don't match its schema.
    #[error("prompt validation error: {0}")]
    PromptValidation(String),

    /// The sandbox process could not be spawned, or its stdio stream broke.
    #[error("sandbox transport error: {0}")]
    SandboxTransport(String),

    /// An `exec` did not produce a `result` frame before the configured timeout.
    #[error("sandbox exec timed out after {0}ms")]
    SandboxTimeout(u64),

    /// The driver or a sub-LLM call failed after the client's own retries.
    #[error("backend error: {0}")]
    Backend(String),

    /// Iteration or depth budget exhausted. Used internally by callers that
    /// want to distinguish exhaustion from other errors; the engine itself
    /// treats exhaustion as the max-iterations fallback path, not this error.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetExceededError),

    /// Filesystem error (prompt directory, trace file).
    #[error("io error: {0}")]
    Io(String),

    /// Serialization/deserialization error (sandbox frames, trace records).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else that indicates a bug rather than an expected failure mode.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Details about which budget was exceeded.
#[derive(Debug, Clone)]
pub struct BudgetExceededError {
    pub budget_type: BudgetType,
    pub limit: u64,
    pub actual: u64,
}

impl std::fmt::Display for BudgetExceededError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} budget exceeded: {} > {}",
            self.budget_type, self.actual, self.limit
        )
    }
}

/// Types of budgets that can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetType {
    Tokens,
    Duration,
    Iterations,
    DeadExecutorRetries,
}

impl From<reqwest::Error> for RlmError {
    fn from(e: reqwest::Error) -> Self {
        RlmError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for RlmError {
    fn from(e: serde_json::Error) -> Self {
        RlmError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for RlmError {
    fn from(e: std::io::Error) -> Self {
        RlmError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let err = RlmError::Backend("connection reset".to_string());
        assert_eq!(err.to_string(), "backend error: connection reset");
    }

    #[test]
    fn budget_exceeded_display() {
        let err = BudgetExceededError {
            budget_type: BudgetType::Iterations,
            limit: 10,
            actual: 11,
        };
        assert_eq!(err.to_string(), "Iterations budget exceeded: 11 > 10");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RlmError = io_err.into();
        assert!(matches!(err, RlmError::Io(_)));
    }
}
