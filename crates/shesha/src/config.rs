//! Configuration file support for Shesha.
//!
//! All shesha data is stored in a `.shesha/` directory:
//! - `.shesha/config.toml` - Configuration file
//! - `.shesha/traces/` - Structured trace output (daily rotation)
//!
//! Config discovery searches for `.shesha/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::path::{Path, PathBuf};

/// The shesha data directory name.
pub const SHESHA_DIR: &str = ".shesha";
/// The config file name within the shesha directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shesha_rlm::BudgetConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Driver and sub-LLM provider settings.
    pub llm: LlmConfig,
    /// Sandbox process pool settings.
    pub sandbox: SandboxConfig,
    /// Iteration and retry budget.
    pub budget: BudgetFields,
    /// Where prompt templates and trace output live on disk.
    pub storage: StorageConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat-completions-compatible API base URL.
    pub base_url: String,
    /// Model name passed to the driver and sub-LLM calls.
    pub model: String,
    /// API key. Falls back to the `SHESHA_API_KEY` environment variable when unset.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from config, falling back to the environment.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("SHESHA_API_KEY").ok())
            .context("no API key configured: set [llm] api_key or SHESHA_API_KEY")
    }
}

/// Sandbox pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command used to spawn each sandbox process.
    pub command: Vec<String>,
    /// Number of warm executors kept in the pool.
    pub pool_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["shesha-sandbox-driver".to_string()],
            pool_size: 4,
        }
    }
}

/// Iteration and retry budget configuration, mirroring `shesha_rlm::BudgetConfig`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetFields {
    pub max_iterations: u32,
    pub max_output_chars: usize,
    pub execution_timeout_secs: u64,
    pub max_subcall_content_chars: usize,
    pub max_consecutive_no_code: u32,
    pub max_dead_executor_retries: u32,
}

impl Default for BudgetFields {
    fn default() -> Self {
        let defaults = BudgetConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            max_output_chars: defaults.max_output_chars,
            execution_timeout_secs: defaults.execution_timeout_secs,
            max_subcall_content_chars: defaults.max_subcall_content_chars,
            max_consecutive_no_code: defaults.max_consecutive_no_code,
            max_dead_executor_retries: defaults.max_dead_executor_retries,
        }
    }
}

impl From<BudgetFields> for BudgetConfig {
    fn from(fields: BudgetFields) -> Self {
        Self {
            max_iterations: fields.max_iterations,
            max_output_chars: fields.max_output_chars,
            execution_timeout_secs: fields.execution_timeout_secs,
            max_subcall_content_chars: fields.max_subcall_content_chars,
            max_consecutive_no_code: fields.max_consecutive_no_code,
            max_dead_executor_retries: fields.max_dead_executor_retries,
        }
    }
}

/// Filesystem layout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory to write JSONL trace files into. Relative to the `.shesha/` directory
    /// unless absolute.
    pub trace_path: PathBuf,
    /// Directory of on-disk prompt template overrides. When unset, embedded defaults are used.
    pub prompt_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            trace_path: PathBuf::from("traces"),
            prompt_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from the current directory or a parent.
    ///
    /// Searches for `.shesha/config.toml` starting from the current directory
    /// and walking up to parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let shesha_dir = dir.join(SHESHA_DIR);
            let config_path = shesha_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, shesha_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Load configuration or fall back to defaults.
    pub fn load_or_default() -> Self {
        match Self::find_and_load() {
            Ok(Some((config, path))) => {
                tracing::info!("loaded config from {}", path.display());
                config
            }
            Ok(None) => {
                tracing::debug!("no .shesha/config.toml found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!("failed to load config: {e}, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve the trace output path relative to a discovered `.shesha` directory.
    pub fn resolve_trace_path(&self, shesha_dir: Option<&Path>) -> PathBuf {
        if self.storage.trace_path.is_absolute() {
            self.storage.trace_path.clone()
        } else if let Some(dir) = shesha_dir {
            dir.join(&self.storage.trace_path)
        } else {
            PathBuf::from(SHESHA_DIR).join(&self.storage.trace_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_rlm_budget_defaults() {
        let config = Config::default();
        assert_eq!(config.budget.max_iterations, BudgetConfig::default().max_iterations);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.sandbox.pool_size, 4);
    }

    #[test]
    fn parse_minimal_config_keeps_other_defaults() {
        let toml = r#"
[llm]
model = "custom-model"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.llm.model, "custom-model");
        assert_eq!(config.sandbox.pool_size, 4);
    }

    #[test]
    fn resolve_trace_path_joins_shesha_dir() {
        let config = Config::default();
        let shesha_dir = PathBuf::from("/project/.shesha");
        let resolved = config.resolve_trace_path(Some(&shesha_dir));
        assert_eq!(resolved, PathBuf::from("/project/.shesha/traces"));
    }

    #[test]
    fn resolve_api_key_prefers_config_over_env() {
        let mut config = Config::default();
        config.llm.api_key = Some("from-config".to_string());
        assert_eq!(config.llm.resolve_api_key().unwrap(), "from-config");
    }

    #[test]
    fn find_and_load_from_walks_up_to_a_parent_shesha_dir() {
        let root = tempfile::tempdir().unwrap();
        let shesha_dir = root.path().join(".shesha");
        std::fs::create_dir_all(&shesha_dir).unwrap();
        std::fs::write(
            shesha_dir.join(CONFIG_FILE),
            r#"
[llm]
model = "from-parent-dir"
"#,
        )
        .unwrap();

        let nested = root.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, found_dir) = Config::find_and_load_from(&nested).unwrap().expect("config should be found");
        assert_eq!(config.llm.model, "from-parent-dir");
        assert_eq!(found_dir, shesha_dir);
    }

    #[test]
    fn find_and_load_from_returns_none_with_no_shesha_dir_anywhere_up() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("x").join("y");
        std::fs::create_dir_all(&nested).unwrap();

        let found = Config::find_and_load_from(&nested).unwrap();
        assert!(found.is_none());
    }
}
