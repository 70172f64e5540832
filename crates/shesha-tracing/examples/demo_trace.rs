//! Demo of the tracing system simulating a query -> engine iteration -> sub-LLM flow.

use serde::Serialize;
use shesha_tracing::{
    TraceWriter, WriterConfig, end_span_ok, record_event, start_span, start_span_with_data,
    with_tracing,
};
use std::time::Duration;

// Domain-specific trace data (similar to what the engine module defines)
#[derive(Serialize)]
struct QueryStartData {
    question_len: usize,
    doc_count: usize,
}

#[derive(Serialize)]
struct IterationData {
    iteration: u32,
    code_blocks: usize,
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Serialize)]
struct SubcallData {
    instruction_len: usize,
    wrapped: bool,
    duration_ms: u64,
}

async fn simulate_subcall(instruction: &str, wrapped: bool) {
    let data = SubcallData {
        instruction_len: instruction.len(),
        wrapped,
        duration_ms: 40,
    };
    start_span_with_data("subcall", &data);
    std::thread::sleep(Duration::from_millis(5));
    end_span_ok();
}

async fn simulate_iteration(iteration: u32) {
    let data = IterationData {
        iteration,
        code_blocks: 1,
        prompt_tokens: 900,
        completion_tokens: 120,
    };
    start_span_with_data("iteration", &data);

    simulate_subcall("Summarize this passage", true).await;

    end_span_ok();
}

async fn simulate_query() -> String {
    let start_data = QueryStartData {
        question_len: 42,
        doc_count: 3,
    };
    start_span_with_data("query", &start_data);

    simulate_iteration(0).await;
    simulate_iteration(1).await;

    record_event(
        "query_completion",
        Some(&serde_json::json!({
            "status": "ok",
            "iterations": 2,
            "tokens_used": 2400
        })),
    );
    end_span_ok();

    "blue".to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = WriterConfig::new(".shesha/traces");
    let writer = TraceWriter::new(config)?;

    let (result, trace) = with_tracing(simulate_query()).await;

    writer.write(&trace)?;

    println!("Query answer: {}", result);
    println!("\nTrace ID: {}", trace.trace_id);
    println!("Duration: {}ms", trace.duration_ms.unwrap_or(0));
    println!("Spans: {}", trace.spans.len());

    println!("\n--- Full Trace JSON ---");
    println!("{}", serde_json::to_string_pretty(&trace)?);

    println!(
        "\n--- Trace written to {} ---",
        writer.current_file_path().display()
    );

    Ok(())
}
