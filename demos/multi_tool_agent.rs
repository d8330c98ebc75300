//! Multi-Tool Agent Example
//!
//! Demonstrates a complex agent with multiple tools, safety hooks, and
//! automatic dispatch through the agent loop orchestrator.
//!
//! This agent can:
//! - Perform calculations
//! - Get current date/time
//! - Convert units
//! - Search (mock)
//! - Format data
//!
//! Shows realistic usage with safety hooks and logging.
//!
//! Usage:
//!   cargo run --example multi_tool_agent
//!
//! Requires:
//!   - Ollama running on localhost:11434
//!   - qwen3:8b model (or adjust model name)

use opta_agent_core::{
    AgentLoopOrchestrator, AgentOptions, HookDecision, Hooks, OrchestratorCallbacks, OrchestratorConfig,
    PostToolUseEvent, PreToolUseEvent, tool,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("MULTI-TOOL AGENT DEMO");
    println!("Realistic agent with 5+ tools, hooks, and auto-execution");
    println!("{}", "=".repeat(70));
    println!();

    let execution_log = Arc::new(Mutex::new(Vec::new()));

    let calculator = tool("calculate", "Perform arithmetic")
        .param("operation", "string")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let op = args["operation"].as_str().unwrap_or("");
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);

            let result = match op {
                "add" => a + b,
                "subtract" => a - b,
                "multiply" => a * b,
                "divide" => {
                    if b == 0.0 {
                        return Err(opta_agent_core::Error::tool("Division by zero"));
                    }
                    a / b
                }
                _ => return Err(opta_agent_core::Error::tool("Unknown operation")),
            };

            Ok(json!({"result": result, "operation": op}))
        });

    let datetime = tool("get_datetime", "Get current date and time")
        .param("format", "string")
        .build(|args| async move {
            let format = args["format"].as_str().unwrap_or("unix");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs();

            let formatted = match format {
                "unix" => now.to_string(),
                _ => format!("Unix timestamp: {now}"),
            };

            Ok(json!({"datetime": formatted, "format": format}))
        });

    let converter = tool("convert_units", "Convert between units")
        .param("value", "number")
        .param("from_unit", "string")
        .param("to_unit", "string")
        .build(|args| async move {
            let value = args["value"].as_f64().unwrap_or(0.0);
            let from = args["from_unit"].as_str().unwrap_or("");
            let to = args["to_unit"].as_str().unwrap_or("");

            let result = match (from, to) {
                ("km", "miles") => value * 0.621371,
                ("miles", "km") => value / 0.621371,
                ("kg", "lbs") => value * 2.20462,
                ("lbs", "kg") => value / 2.20462,
                ("celsius", "fahrenheit") => (value * 9.0 / 5.0) + 32.0,
                ("fahrenheit", "celsius") => (value - 32.0) * 5.0 / 9.0,
                _ => return Err(opta_agent_core::Error::tool("Unsupported conversion")),
            };

            Ok(json!({
                "result": result,
                "from": from,
                "to": to,
                "original_value": value
            }))
        });

    let search = tool("search", "Search for information")
        .param("query", "string")
        .build(|args| async move {
            let query = args["query"].as_str().unwrap_or("");

            Ok(json!({
                "results": [
                    {"title": format!("Result for: {}", query), "relevance": 0.95},
                    {"title": "Related information", "relevance": 0.80},
                ],
                "query": query
            }))
        });

    let formatter = tool("format_data", "Format data as table/list")
        .param("data", "object")
        .param("format", "string")
        .build(|args| async move {
            let format = args["format"].as_str().unwrap_or("list");

            Ok(json!({
                "formatted": format!("Data formatted as: {format}"),
                "format": format
            }))
        });

    let log_clone = execution_log.clone();
    let hooks = Hooks::new()
        .add_pre_tool_use(|event: PreToolUseEvent| async move {
            println!("\u{1f50d} PreToolUse: {}", event.tool_name);

            if event.tool_name == "delete" || event.tool_name == "modify_system" {
                println!("   \u{1f6d1} BLOCKED: Dangerous operation");
                return Some(HookDecision::block("Safety policy violation"));
            }

            if event.tool_name == "calculate" {
                if let Some(op) = event.tool_input.get("operation").and_then(|v| v.as_str()) {
                    if op == "divide" {
                        if let Some(b) = event.tool_input.get("b").and_then(|v| v.as_f64()) {
                            if b == 0.0 {
                                println!("   \u{1f6d1} BLOCKED: Division by zero");
                                return Some(HookDecision::block("Division by zero prevented"));
                            }
                        }
                    }
                }
            }

            println!("   \u{2705} Allowed");
            Some(HookDecision::continue_())
        })
        .add_post_tool_use(move |event: PostToolUseEvent| {
            let log = log_clone.clone();
            async move {
                println!("\u{2728} PostToolUse: {} completed", event.tool_name);

                let timestamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_secs();

                log.lock().unwrap().push(format!(
                    "[{}] {} -> {}",
                    timestamp,
                    event.tool_name,
                    serde_json::to_string(&event.tool_result).unwrap_or_default()
                ));

                None
            }
        });

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .tool(calculator)
        .tool(datetime)
        .tool(converter)
        .tool(search)
        .tool(formatter)
        .auto_execute_tools(true)
        .max_tool_iterations(10)
        .temperature(0.3)
        .build()?;

    let callbacks = OrchestratorCallbacks::new()
        .on_token(|token| print!("{token}"))
        .on_tool_end(|name, _id, result| println!("\n  [{name}] -> {result}"));

    const ROLE_DESCRIPTION: &str = "You are a helpful multi-tool assistant. You have access to: \
         calculator, datetime, unit converter, search, and data formatter. \
         Use these tools to help answer questions. \
         Always use tools for calculations and conversions.";

    println!("Agent configured with:");
    println!("- 5 tools: calculator, datetime, converter, search, formatter");
    println!("- Auto-execution: ENABLED (dispatcher runs tool calls automatically)");
    println!("- Hooks: PreToolUse (safety), PostToolUse (logging)");
    println!();
    println!("{}", "-".repeat(70));
    println!();

    let queries = [
        "What's 15 kilometers in miles?",
        "Calculate 25 divided by 5, then multiply by 3",
        "What's the current Unix timestamp?",
        "Search for information about Rust programming",
    ];

    let mut final_message_count = 0;

    for (i, query) in queries.iter().enumerate() {
        println!("Query {}: {query}", i + 1);
        println!();

        let config = OrchestratorConfig::new(ROLE_DESCRIPTION, format!("multi-tool-agent-demo-{i}"))
            .hooks(hooks.clone())
            .callbacks(callbacks.clone());
        let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
        let result = orchestrator.run(*query).await?;
        final_message_count = orchestrator.messages().len();

        println!(
            "\n\nCompleted with status {:?}, {} tool calls",
            result.completion_status, result.tool_call_count
        );
        println!();
        println!("{}", "-".repeat(70));
        println!();
    }

    println!("Execution Log:");
    println!("{}", "=".repeat(70));
    for entry in execution_log.lock().unwrap().iter() {
        println!("{entry}");
    }
    println!("{}", "=".repeat(70));
    println!();

    println!("Last run's conversation history: {final_message_count} messages");
    println!();

    println!("{}", "=".repeat(70));
    println!("DEMO COMPLETE");
    println!("{}", "=".repeat(70));
    println!();
    println!("Key Features Demonstrated:");
    println!("\u{2705} Multiple specialized tools working together");
    println!("\u{2705} Auto-execution mode (tools dispatched automatically)");
    println!("\u{2705} PreToolUse hooks (safety validation)");
    println!("\u{2705} PostToolUse hooks (logging)");
    println!("\u{2705} Error handling (division by zero prevention)");
    println!();
    println!("This example shows a production-ready agent configuration!");
    println!("{}", "=".repeat(70));

    Ok(())
}
