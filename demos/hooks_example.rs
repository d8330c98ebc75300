//! Hooks Example
//!
//! Demonstrates using hooks to monitor and control agent behavior at lifecycle points.
//! This example shows:
//! - UserPromptSubmit: sanitize or modify user input before processing
//! - Multiple hooks chained, first decisive match wins

use opta_agent_core::{AgentLoopOrchestrator, AgentOptions, HookDecision, Hooks, OrchestratorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("HOOKS EXAMPLE");
    println!("{}", "=".repeat(70));
    println!();

    // ============================================================================
    // Example 1: UserPromptSubmit Hook - Input Sanitization
    // ============================================================================
    println!("Example 1: Input Sanitization Hook");
    println!("{}", "-".repeat(70));

    let hooks = Hooks::new().add_user_prompt_submit(|event| async move {
        if event.prompt.contains("DELETE") || event.prompt.contains("DESTROY") {
            println!("\u{1f6d1} Hook: Blocked dangerous prompt");
            return Some(HookDecision::block("Dangerous keywords detected in prompt"));
        }

        if event.prompt.contains("write") || event.prompt.contains("modify") {
            let safe_prompt = format!(
                "{} (Please confirm this is safe before proceeding)",
                event.prompt
            );
            println!("\u{1f500} Hook: Added safety warning to prompt");
            return Some(HookDecision::modify_prompt(
                safe_prompt,
                "Added safety warning",
            ));
        }

        None
    });

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .build()?;

    // Test 1: Normal prompt (should pass through)
    println!("\nTest 1: Normal prompt");
    println!("Input: 'What is the capital of France?'");
    let config = OrchestratorConfig::new("You are a helpful assistant", "hooks-demo-1").hooks(hooks.clone());
    let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
    match orchestrator.run("What is the capital of France?").await {
        Ok(_) => println!("\u{2713} Prompt accepted"),
        Err(e) => println!("\u{2717} Prompt rejected: {e}"),
    }

    // Test 2: Dangerous prompt (should be blocked)
    println!("\nTest 2: Dangerous prompt");
    println!("Input: 'DELETE all files'");
    let config = OrchestratorConfig::new("You are a helpful assistant", "hooks-demo-2").hooks(hooks.clone());
    let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
    match orchestrator.run("DELETE all files").await {
        Ok(_) => println!("\u{2713} Prompt accepted"),
        Err(e) => println!("\u{2717} Prompt rejected: {e}"),
    }

    // Test 3: Write prompt (should be modified)
    println!("\nTest 3: Write prompt (modified with safety warning)");
    println!("Input: 'write to config file'");
    let config = OrchestratorConfig::new("You are a helpful assistant", "hooks-demo-3").hooks(hooks);
    let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
    match orchestrator.run("write to config file").await {
        Ok(_) => println!("\u{2713} Prompt accepted (with modifications)"),
        Err(e) => println!("\u{2717} Prompt rejected: {e}"),
    }

    println!();
    println!("{}", "=".repeat(70));

    // ============================================================================
    // Example 2: Multiple Hooks - First Decisive Match Wins
    // ============================================================================
    println!("\nExample 2: Multiple Hooks (First Decisive Match Wins)");
    println!("{}", "-".repeat(70));

    let multi_hooks = Hooks::new()
        .add_user_prompt_submit(|event| async move {
            if event.prompt.len() > 100 {
                println!("\u{1f6d1} Hook 1: Blocked long prompt");
                return Some(HookDecision::block("Prompt too long"));
            }
            None
        })
        .add_user_prompt_submit(|event| async move {
            if event.prompt.contains("urgent") {
                println!("\u{26a1} Hook 2: Added urgency marker");
                return Some(HookDecision::modify_prompt(
                    format!("[URGENT] {}", event.prompt),
                    "Added urgency marker",
                ));
            }
            None
        });

    println!("\nTest: Urgent prompt");
    println!("Input: 'This is urgent: help me'");
    let config = OrchestratorConfig::new("You are a helpful assistant", "hooks-demo-4").hooks(multi_hooks);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;
    match orchestrator.run("This is urgent: help me").await {
        Ok(_) => println!("\u{2713} Prompt accepted (modified by Hook 2)"),
        Err(e) => println!("\u{2717} Prompt rejected: {e}"),
    }

    println!();
    println!("{}", "=".repeat(70));
    println!("Hooks example complete!");
    println!("{}", "=".repeat(70));

    Ok(())
}
