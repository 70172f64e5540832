//! shesha-rlm: the recursive language model engine.
//!
//! A driver LM iteratively writes short programs against a persistent
//! sandboxed namespace. Those programs can recurse into sub-LLM calls, fence
//! untrusted content behind a per-query boundary token, and terminate via
//! `FINAL`/`FINAL_VAR` sentinels caught and reported by the sandbox.

pub mod boundary;
pub mod code_echo;
pub mod engine;
pub mod error;
pub mod llm_client;
pub mod project;
pub mod prompts;
pub mod sandbox;
pub mod subcall;
pub mod types;

// Testing utilities - available in test builds
#[cfg(test)]
pub mod testing;

pub use boundary::{wrap_untrusted, Boundary};
pub use code_echo::format_code_echo;
pub use engine::{CancelFlag, Engine, EngineConfig, ProgressCallback};
pub use error::{BudgetExceededError, BudgetType, Result, RlmError};
pub use llm_client::{with_retry, CompletionResponse, LLMClient, OpenAiCompatibleClient, SharedLLMClient};
pub use project::{DocumentStore, Project, StaticDocumentStore};
pub use prompts::PromptLoader;
pub use sandbox::{ContainerPool, InboundLlmHandler, SandboxConfig, SandboxExecutor};
pub use types::{
    BudgetConfig, CodeBlock, Document, ErrorKind, ExecutionError, ExecutionResult, ExecutionStatus,
    Message, QueryResult, Role, TokenUsage, Trace, TraceHeader, TraceRecord, TraceStatus, TraceStep,
    TraceStepType, TraceSummary,
};
