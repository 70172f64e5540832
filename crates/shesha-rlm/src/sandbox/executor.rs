//! One sandbox process and the framed protocol used to drive it.

use super::protocol::{truncate_with_marker, BatchSlot, HostFrame, SandboxFrame};
use crate::error::{Result, RlmError};
use crate::types::ExecutionResult;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;

/// Services the sandbox's inbound `llm_query` / `llm_query_batch` requests
/// for the duration of one `exec`. Bound to a single query and its boundary
/// by the engine before the exec begins.
#[async_trait]
pub trait InboundLlmHandler: Send + Sync {
    async fn handle_llm_query(&self, instruction: &str, content: &str) -> std::result::Result<String, String>;

    async fn handle_llm_query_batch(&self, prompts: &[String]) -> Vec<std::result::Result<String, String>>;
}

/// Configuration for spawning and driving a sandbox process.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// The interpreter companion process to spawn, e.g. `["python3", "-u", "sandbox_driver.py"]`.
    pub command: Vec<String>,
    pub execution_timeout: Duration,
    pub max_output_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["shesha-sandbox-driver".to_string()],
            execution_timeout: Duration::from_secs(30),
            max_output_chars: 8_000,
        }
    }
}

/// One running (or dead) sandbox process.
pub struct SandboxExecutor {
    config: SandboxConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<Lines<BufReader<ChildStdout>>>,
    alive: bool,
}

impl SandboxExecutor {
    /// Spawn a fresh sandbox process.
    pub fn spawn(config: SandboxConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| RlmError::Config("sandbox command must not be empty".into()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| RlmError::SandboxTransport(format!("failed to spawn sandbox: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RlmError::SandboxTransport("sandbox stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RlmError::SandboxTransport("sandbox stdout unavailable".into()))?;
        let reader = BufReader::new(stdout).lines();

        Ok(Self {
            config,
            child: Some(child),
            stdin: Some(stdin),
            reader: Some(reader),
            alive: true,
        })
    }

    /// Whether this executor's process is still believed to be running and
    /// its stream healthy.
    pub fn is_alive(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                _ => {
                    self.alive = false;
                    false
                }
            },
            None => false,
        }
    }

    fn mark_dead(&mut self) {
        self.alive = false;
    }

    async fn write_frame(&mut self, frame: &HostFrame) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RlmError::SandboxTransport("no stdin".into()))?;
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RlmError::SandboxTransport(e.to_string()))?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<SandboxFrame> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| RlmError::SandboxTransport("no stdout".into()))?;
        let line = reader
            .next_line()
            .await
            .map_err(|e| RlmError::SandboxTransport(e.to_string()))?
            .ok_or_else(|| RlmError::SandboxTransport("unexpected EOF from sandbox".into()))?;
        serde_json::from_str(&line).map_err(|e| RlmError::SandboxTransport(format!("bad frame: {e}")))
    }

    /// Run `code` against the persistent namespace, servicing inbound
    /// `llm_query`/`llm_query_batch` frames with `handler` until the
    /// matching `result` frame arrives or the timeout expires.
    pub async fn exec(&mut self, code: &str, handler: &dyn InboundLlmHandler) -> Result<ExecutionResult> {
        let timeout_duration = self.config.execution_timeout;
        match timeout(timeout_duration, self.exec_inner(code, handler)).await {
            Ok(inner) => inner.map(|mut r| {
                r.vars.retain(|k, _| !k.starts_with('_'));
                r
            }),
            Err(_) => {
                self.mark_dead();
                Err(RlmError::SandboxTimeout(timeout_duration.as_millis() as u64))
            }
        }
    }

    async fn exec_inner(&mut self, code: &str, handler: &dyn InboundLlmHandler) -> Result<ExecutionResult> {
        self.write_frame(&HostFrame::Exec { code: code.to_string() }).await?;
        let max_chars = self.config.max_output_chars;
        loop {
            let frame = match self.read_frame().await {
                Ok(f) => f,
                Err(e) => {
                    self.mark_dead();
                    return Err(e);
                }
            };
            match frame {
                SandboxFrame::Result { .. } => {
                    let exec_result = frame
                        .into_execution_result(|s| truncate_with_marker(s, max_chars))
                        .expect("Result variant always converts");
                    return Ok(exec_result);
                }
                SandboxFrame::LlmQuery { instruction, content } => {
                    match handler.handle_llm_query(&instruction, &content).await {
                        Ok(result) => self.write_frame(&HostFrame::LlmResponse { result }).await?,
                        Err(message) => self.write_frame(&HostFrame::LlmError { message }).await?,
                    }
                }
                SandboxFrame::LlmQueryBatch { prompts } => {
                    let responses = handler.handle_llm_query_batch(&prompts).await;
                    let results = responses
                        .into_iter()
                        .map(|r| match r {
                            Ok(result) => BatchSlot::Ok { result },
                            Err(error) => BatchSlot::Err { error },
                        })
                        .collect();
                    self.write_frame(&HostFrame::LlmBatchResponse { results }).await?;
                }
                SandboxFrame::ResetOk => {
                    self.mark_dead();
                    return Err(RlmError::SandboxTransport(
                        "unexpected reset_ok during exec".into(),
                    ));
                }
            }
        }
    }

    /// Clear all user-created names, keeping builtins and `context`.
    pub async fn reset(&mut self) -> Result<()> {
        self.write_frame(&HostFrame::Reset).await?;
        match self.read_frame().await {
            Ok(SandboxFrame::ResetOk) => Ok(()),
            Ok(_) => {
                self.mark_dead();
                Err(RlmError::SandboxTransport("expected reset_ok".into()))
            }
            Err(e) => {
                self.mark_dead();
                Err(e)
            }
        }
    }

    /// Stop the process. Idempotent; safe to call on an already-stopped or
    /// dead executor.
    pub async fn stop(&mut self) {
        self.alive = false;
        self.stdin = None;
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

impl Drop for SandboxExecutor {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl InboundLlmHandler for NoopHandler {
        async fn handle_llm_query(&self, _: &str, _: &str) -> std::result::Result<String, String> {
            Ok("noop".to_string())
        }

        async fn handle_llm_query_batch(&self, prompts: &[String]) -> Vec<std::result::Result<String, String>> {
            prompts.iter().map(|_| Ok("noop".to_string())).collect()
        }
    }

    /// A minimal Python driver that speaks just enough of the protocol for
    /// these tests: `exec` echoes the code back as stdout and reports a
    /// `FINAL` call if the code is exactly `final`; `reset` always succeeds.
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
        elif code == "ask":
            print(json.dumps({"action": "llm_query", "instruction": "summarize", "content": ""}))
            sys.stdout.flush()
            reply = json.loads(sys.stdin.readline())
            print(json.dumps({"action": "result", "status": "ok", "stdout": reply.get("result", ""), "vars": {}}))
        else:
            print(json.dumps({"action": "result", "status": "ok", "stdout": code, "vars": {}}))
    elif action == "reset":
        print(json.dumps({"action": "reset_ok"}))
    sys.stdout.flush()
"#;

    fn fixture_config() -> SandboxConfig {
        SandboxConfig {
            command: vec!["python3".to_string(), "-u".to_string(), "-c".to_string(), FIXTURE_DRIVER.to_string()],
            execution_timeout: Duration::from_secs(5),
            max_output_chars: 8_000,
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn exec_echoes_stdout() {
        if !python_available() {
            return;
        }
        let mut executor = SandboxExecutor::spawn(fixture_config()).unwrap();
        let result = executor.exec("hello", &NoopHandler).await.unwrap();
        assert_eq!(result.stdout, "hello");
        assert!(!result.is_final());
    }

    #[tokio::test]
    async fn exec_reports_final_answer() {
        if !python_available() {
            return;
        }
        let mut executor = SandboxExecutor::spawn(fixture_config()).unwrap();
        let result = executor.exec("final", &NoopHandler).await.unwrap();
        assert!(result.is_final());
        assert_eq!(result.final_answer.as_deref(), Some("blue"));
    }

    #[tokio::test]
    async fn exec_services_inbound_llm_query() {
        if !python_available() {
            return;
        }
        let mut executor = SandboxExecutor::spawn(fixture_config()).unwrap();
        let result = executor.exec("ask", &NoopHandler).await.unwrap();
        assert_eq!(result.stdout, "noop");
    }

    #[tokio::test]
    async fn reset_then_is_alive_round_trips() {
        if !python_available() {
            return;
        }
        let mut executor = SandboxExecutor::spawn(fixture_config()).unwrap();
        executor.reset().await.unwrap();
        assert!(executor.is_alive());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        if !python_available() {
            return;
        }
        let mut executor = SandboxExecutor::spawn(fixture_config()).unwrap();
        executor.stop().await;
        executor.stop().await;
        assert!(!executor.is_alive());
    }

    #[tokio::test]
    async fn exec_after_process_exit_marks_dead() {
        // a command that exits immediately never answers the exec frame
        let config = SandboxConfig {
            command: vec!["true".to_string()],
            execution_timeout: Duration::from_millis(500),
            max_output_chars: 8_000,
        };
        let mut executor = SandboxExecutor::spawn(config).unwrap();
        let result = executor.exec("anything", &NoopHandler).await;
        assert!(result.is_err());
        assert!(!executor.is_alive());
    }
}
