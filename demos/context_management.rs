//! Context Management Examples
//!
//! This demonstrates how conversation history is bounded and compacted across
//! a multi-turn run, and how to read the low-level context utilities the
//! conversation store is built on.
//!
//! Patterns demonstrated:
//! 1. Stateless agents (recommended for single-task work)
//! 2. Multi-turn orchestrator reuse with automatic compaction
//! 3. Token budget inspection via the context utilities

use opta_agent_core::{
    AgentLoopOrchestrator, AgentOptions, OrchestratorConfig, estimate_tokens, is_approaching_limit,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("CONTEXT MANAGEMENT EXAMPLES");
    println!("{}", "=".repeat(70));
    println!();

    pattern_1_stateless().await?;
    pattern_2_multi_turn_compaction().await?;
    pattern_3_token_monitoring().await?;

    Ok(())
}

// ============================================================================
// Pattern 1: Stateless Agents (Recommended)
// ============================================================================
// Best for: single-task agents (copy editor, code formatter, etc.)

async fn pattern_1_stateless() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Pattern 1: Stateless Agents ===");
    println!("Best for: single-task agents with no shared context needed");
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .build()?;

    let tasks = ["Explain Rust", "Explain Python", "Explain JavaScript"];

    for (i, task) in tasks.iter().enumerate() {
        let config = OrchestratorConfig::new("You are a helpful assistant", format!("stateless-{i}"));
        let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;

        orchestrator.run(*task).await?;

        println!("Task: {task}");
        println!("History size: {} messages", orchestrator.messages().len());
        println!("Estimated tokens: {}", estimate_tokens(orchestrator.messages()));
        println!();
    }
    // Orchestrator dropped after each task, fresh context for the next one.

    println!("{}", "-".repeat(70));
    println!();

    Ok(())
}

// ============================================================================
// Pattern 2: Multi-Turn Orchestrator Reuse with Automatic Compaction
// ============================================================================
// Best for: multi-turn conversations that need shared context across turns

async fn pattern_2_multi_turn_compaction() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Pattern 2: Multi-Turn Reuse with Automatic Compaction ===");
    println!("Best for: conversations with task boundaries but shared context");
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .build()?;

    // A small token limit exaggerates compaction for this demo; the
    // conversation store recomputes recentCount and summarizes the older
    // half of history whenever the margin is crossed.
    let config = OrchestratorConfig::new("You are a helpful coding assistant", "multi-turn-demo")
        .token_limit(2_000);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;

    println!("Task 1: analyzing a function...");
    orchestrator
        .run("Analyze this: def add(a, b): return a + b")
        .await?;
    println!("After task 1: {} messages", orchestrator.messages().len());

    println!("\nTask 2: writing tests for it...");
    orchestrator.run("Write unit tests for the add function").await?;
    println!("After task 2: {} messages", orchestrator.messages().len());

    println!();
    println!("{}", "-".repeat(70));
    println!();

    Ok(())
}

// ============================================================================
// Pattern 3: Token Budget Monitoring
// ============================================================================
// Best for: long-running conversations where you want visibility into the
// budget the conversation store is managing on your behalf.

async fn pattern_3_token_monitoring() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Pattern 3: Token Budget Monitoring ===");
    println!("Best for: long-running conversations with token limits");
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .build()?;

    let token_limit = 1_000; // Example limit, much lower than production for this demo
    let config = OrchestratorConfig::new("You are a helpful assistant", "token-monitor-demo")
        .token_limit(token_limit);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;

    let interactions = [
        "What is Rust?",
        "Explain ownership",
        "What are lifetimes?",
        "How do traits work?",
        "Explain async/await",
    ];

    let margin = 0.8; // 80% threshold, matching the conversation store's default order of magnitude

    for (i, prompt) in interactions.iter().enumerate() {
        println!("Interaction {}: {prompt}", i + 1);

        let current_tokens = estimate_tokens(orchestrator.messages());
        println!("  Current tokens: {current_tokens}");

        if is_approaching_limit(orchestrator.messages(), token_limit, margin) {
            println!("  \u{26a0}\u{fe0f}  Approaching token limit; the conversation store will compact on the next turn.");
        }

        orchestrator.run(*prompt).await?;

        println!();
    }

    println!("Final history size: {} messages", orchestrator.messages().len());
    println!("Final token count: {}", estimate_tokens(orchestrator.messages()));

    println!();
    println!("{}", "-".repeat(70));
    println!();

    Ok(())
}
