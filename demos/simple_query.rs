//! Simple query example
//!
//! Demonstrates running one task through the agent loop orchestrator with
//! streamed token output.

use opta_agent_core::{AgentLoopOrchestrator, AgentOptions, OrchestratorCallbacks, OrchestratorConfig};
use std::io::Write;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .max_tokens(500)
        .build()?;

    let callbacks = OrchestratorCallbacks::new().on_token(|token| {
        print!("{token}");
        let _ = std::io::stdout().flush();
    });

    let config = OrchestratorConfig::new("You are a helpful assistant.", "simple-query-demo")
        .callbacks(callbacks);

    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;

    println!("Sending query to model...\n");
    print!("Response: ");
    let result = orchestrator
        .run("What's the capital of France? Please be brief.")
        .await?;

    println!("\n\nQuery complete! ({:?}, {} tool calls)", result.completion_status, result.tool_call_count);

    Ok(())
}
