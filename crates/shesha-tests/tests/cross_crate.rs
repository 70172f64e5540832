//! Cross-crate integration tests.
//!
//! Exercises `shesha-rlm`'s engine together with `shesha-tracing`'s generic
//! span collector, the way the `shesha` binary wires them: the engine emits
//! `shesha_tracing` spans for operator-facing diagnostics while also building
//! its own per-query `Trace` record for callers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shesha_rlm::{
    BudgetConfig, ContainerPool, Document, Engine, EngineConfig, ErrorKind, ExecutionError,
    ExecutionResult, ExecutionStatus, LLMClient, Message, PromptLoader, Project,
    Result as RlmResult, SandboxConfig, StaticDocumentStore, TraceStatus,
};

/// A fixture sandbox driver returning a fixed final answer on the first exec.
const FIXTURE_DRIVER: &str = r#"
import sys, json

while True:
    line = sys.stdin.readline()
    if not line:
        break
    frame = json.loads(line)
    action = frame.get("action")
    if action == "exec":
        code = frame["code"]
        if code == "final":
            print(json.dumps({"action": "result", "status": "ok", "stdout": "", "final_answer": "blue", "vars": {}}))
        else:
            print(json.dumps({"action": "result", "status": "ok", "stdout": code, "vars": {}}))
    elif action == "reset":
        print(json.dumps({"action": "reset_ok"}))
    sys.stdout.flush()
"#;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A single-response stub client, just enough to drive the engine to a
/// trivial `FINAL` without depending on shesha-rlm's internal test mocks
/// (which are private to that crate's own `#[cfg(test)]` build).
struct StubClient {
    response: String,
    calls: Mutex<u32>,
}

#[async_trait]
impl LLMClient for StubClient {
    async fn complete(&self, _messages: &[Message], _model: &str) -> RlmResult<shesha_rlm::CompletionResponse> {
        *self.calls.lock().unwrap() += 1;
        Ok(shesha_rlm::CompletionResponse {
            content: self.response.clone(),
            prompt_tokens: 12,
            completion_tokens: 4,
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

fn fixture_config() -> SandboxConfig {
    SandboxConfig {
        command: vec!["python3".to_string(), "-u".to_string(), "-c".to_string(), FIXTURE_DRIVER.to_string()],
        execution_timeout: Duration::from_secs(5),
        max_output_chars: 8_000,
    }
}

#[tokio::test]
async fn engine_query_emits_both_tracing_spans_and_its_own_trace_record() {
    if !python_available() {
        return;
    }

    let client = Arc::new(StubClient {
        response: "```repl\nfinal\n```".to_string(),
        calls: Mutex::new(0),
    });
    let pool = Arc::new(ContainerPool::new(fixture_config(), 1));
    let prompts = Arc::new(PromptLoader::embedded());
    let engine = Engine::new(
        client.clone(),
        pool,
        prompts,
        EngineConfig {
            model: "cross-crate-test".to_string(),
            budget: BudgetConfig::default(),
        },
    );
    let store = Arc::new(StaticDocumentStore::new(vec![Document::new("notes.txt", "the sky is blue")]));
    let project = Project::new(engine, store);

    let (query_result, operator_trace) =
        shesha_tracing::with_tracing(async { project.query("what color is the sky?", None, None, None).await.unwrap() }).await;

    assert_eq!(query_result.answer, "blue");
    assert_eq!(*client.calls.lock().unwrap(), 1);
    assert_eq!(query_result.trace.summary.as_ref().unwrap().status, TraceStatus::Ok);

    // the per-query record (callers' structured trace) saw the final answer step
    assert!(query_result.trace.final_answer().is_some());

    // the generic operator-facing span tree saw at least the top-level query span
    assert!(!operator_trace.spans.is_empty());
    assert!(operator_trace.spans.iter().any(|s| s.name == "shesha_query"));
}

#[tokio::test]
async fn a_failed_exec_result_is_never_reported_as_final() {
    let result = ExecutionResult {
        status: ExecutionStatus::Error,
        stdout: String::new(),
        stderr: String::new(),
        error: Some(ExecutionError {
            kind: ErrorKind::Runtime,
            message: "boom".to_string(),
            traceback: None,
        }),
        final_answer: None,
        final_var: None,
        final_value: None,
        vars: Default::default(),
        truncated: false,
    };
    assert!(!result.is_final());
}
