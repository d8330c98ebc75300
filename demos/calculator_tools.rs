//! Calculator with Tools Example
//!
//! Demonstrates registering tools on `AgentOptions` and letting the agent
//! loop orchestrator dispatch and execute them automatically.

use opta_agent_core::{AgentLoopOrchestrator, AgentOptions, OrchestratorCallbacks, OrchestratorConfig, tool};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let add_tool = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a + b}))
        });

    let subtract_tool = tool("subtract", "Subtract two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a - b}))
        });

    let multiply_tool = tool("multiply", "Multiply two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a * b}))
        });

    let divide_tool = tool("divide", "Divide two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            if b == 0.0 {
                return Ok(json!({"error": "Cannot divide by zero"}));
            }
            Ok(json!({"result": a / b}))
        });

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .tools(vec![add_tool, subtract_tool, multiply_tool, divide_tool])
        .temperature(0.1)
        .build()?;

    let callbacks = OrchestratorCallbacks::new()
        .on_tool_start(|name, _id, args| println!("  \u{1f527} Tool call: {name} {args}"))
        .on_tool_end(|name, _id, result| println!("  Result ({name}): {result}"));

    let queries = [
        "What is 25 plus 17?",
        "Calculate 144 divided by 12",
        "What's 7 times 8, then add 5?",
    ];

    println!("{}", "=".repeat(70));
    println!("CALCULATOR TOOLS EXAMPLE");
    println!("{}", "=".repeat(70));
    println!();

    for query in queries {
        println!("User: {query}");
        println!("{}", "-".repeat(50));

        let config = OrchestratorConfig::new(
            "You are a helpful calculator assistant. Use the provided tools to \
             perform calculations. Always show your work and explain the result.",
            format!("calculator-demo-{query}"),
        )
        .callbacks(callbacks.clone());

        let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
        orchestrator.run(query).await?;

        println!();
    }

    println!("{}", "=".repeat(70));
    println!("Example complete!");

    Ok(())
}
