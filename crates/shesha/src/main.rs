//! shesha: run recursive-language-model queries over a document corpus.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shesha_rlm::{
    BudgetConfig, ContainerPool, Document, Engine, EngineConfig, OpenAiCompatibleClient,
    PromptLoader, Project, SandboxConfig as RlmSandboxConfig, StaticDocumentStore, TraceRecord,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;

#[derive(Parser)]
#[command(name = "shesha")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file, overriding the `.shesha/config.toml` search
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against a set of documents
    Query {
        /// The question to ask the driver model
        #[arg(long)]
        question: String,

        /// Paths to documents to load into the query's context
        documents: Vec<PathBuf>,

        /// Append the resulting trace's JSONL records to this file instead of
        /// the configured/discovered trace directory
        #[arg(long)]
        trace_out: Option<PathBuf>,
    },

    /// Pretty-print a JSONL trace file
    Trace {
        /// Path to a trace file written by `shesha query --trace-out`
        path: PathBuf,
    },

    /// Write a default `.shesha/config.toml` in the current directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

fn load_config(override_path: Option<&PathBuf>) -> (Config, Option<PathBuf>) {
    if let Some(path) = override_path {
        match Config::from_file(path) {
            Ok(config) => return (config, path.parent().map(Path::to_path_buf)),
            Err(e) => {
                tracing::warn!("failed to load {}: {e}, using defaults", path.display());
                return (Config::default(), None);
            }
        }
    }

    match Config::find_and_load() {
        Ok(Some((config, dir))) => (config, Some(dir)),
        Ok(None) => (Config::default(), None),
        Err(e) => {
            tracing::warn!("error searching for config: {e}, using defaults");
            (Config::default(), None)
        }
    }
}

fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    paths
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read document: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Document::new(name, content))
        })
        .collect()
}

fn build_engine(config: &Config) -> Result<Engine> {
    let api_key = config.llm.resolve_api_key()?;
    let client = Arc::new(OpenAiCompatibleClient::new(config.llm.base_url.clone(), api_key));

    let sandbox_config = RlmSandboxConfig {
        command: config.sandbox.command.clone(),
        execution_timeout: std::time::Duration::from_secs(config.budget.execution_timeout_secs),
        max_output_chars: config.budget.max_output_chars,
    };
    let pool = Arc::new(ContainerPool::new(sandbox_config, config.sandbox.pool_size));

    let prompts = Arc::new(match &config.storage.prompt_dir {
        Some(dir) => PromptLoader::from_dir(dir)?,
        None => PromptLoader::embedded(),
    });

    let budget: BudgetConfig = config.budget.clone().into();
    Ok(Engine::new(
        client,
        pool,
        prompts,
        EngineConfig {
            model: config.llm.model.clone(),
            budget,
        },
    ))
}

async fn run_query(
    config: &Config,
    shesha_dir: Option<&Path>,
    question: &str,
    doc_paths: &[PathBuf],
    trace_out: Option<&PathBuf>,
) -> Result<()> {
    let documents = load_documents(doc_paths)?;
    let store = Arc::new(StaticDocumentStore::new(documents));
    let engine = build_engine(config)?;
    let project = Project::new(engine, store);
    let result = project.query(question, None, None, None).await?;

    println!("{}", result.answer);
    tracing::info!(
        iterations = result.trace.summary.as_ref().map(|s| s.iterations).unwrap_or_default(),
        tokens = result.token_usage.total(),
        duration_ms = result.execution_time_ms,
        "query complete"
    );

    let trace_path = match trace_out {
        Some(path) => path.clone(),
        None => config.resolve_trace_path(shesha_dir).join(format!("{}.jsonl", result.trace.header.started_at.replace(':', "-"))),
    };
    append_trace_records(&trace_path, &result.trace.to_records())?;

    Ok(())
}

/// Appends one JSONL line per record to `path`: a header record, one per
/// `TraceStep`, then a summary record, matching the on-disk trace format.
fn append_trace_records(path: &Path, records: &[TraceRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
    }
    Ok(())
}

fn print_trace_file(path: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read trace file: {}", path.display()))?;

    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: TraceRecord = serde_json::from_str(line)
            .with_context(|| format!("failed to parse trace record {} in {}", i + 1, path.display()))?;
        match record {
            TraceRecord::Header(header) => {
                println!("=== {} ({}) ===", header.question, header.started_at);
            }
            TraceRecord::Step(step) => {
                println!("[{:?} | iter {}] {}", step.step_type, step.iteration, truncate(&step.content, 200));
            }
            TraceRecord::Summary(summary) => {
                println!(
                    "status={:?} iterations={} tokens={} duration_ms={}",
                    summary.status,
                    summary.iterations,
                    summary.token_usage.total(),
                    summary.duration_ms
                );
                println!();
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

fn write_default_config(force: bool) -> Result<()> {
    let dir = PathBuf::from(config::SHESHA_DIR);
    let path = dir.join(config::CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(&dir)?;
    let toml = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&path, toml)?;
    println!("wrote {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            question,
            documents,
            trace_out,
        } => {
            let (config, shesha_dir) = load_config(cli.config.as_ref());
            run_query(&config, shesha_dir.as_deref(), &question, &documents, trace_out.as_ref()).await
        }
        Commands::Trace { path } => print_trace_file(&path),
        Commands::Init { force } => write_default_config(force),
    }
}
