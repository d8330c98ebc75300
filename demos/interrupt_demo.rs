//! Interrupt Capability Demo
//!
//! This example demonstrates how to cancel a running turn via the
//! orchestrator's cancel handle:
//!
//! 1. Timeout-based interruption
//! 2. Conditional interruption (based on streamed content)
//! 3. Concurrent interruption (simulated cancel button)
//! 4. Interrupt and retry
//!
//! Note: This example uses Ollama. Make sure Ollama is running at
//! http://localhost:11434 with a model loaded before running.

use opta_agent_core::{AgentLoopOrchestrator, AgentOptions, OrchestratorCallbacks, OrchestratorConfig};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

// ============================================================================
// Example 1: Timeout-based Interruption
// ============================================================================
async fn timeout_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 1: Timeout-based Interruption");
    println!("{}", "=".repeat(60));
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .build()?;

    let received = Arc::new(Mutex::new(String::new()));
    let received_cb = Arc::clone(&received);
    let callbacks = OrchestratorCallbacks::new().on_token(move |token| {
        print!("{token}");
        received_cb.lock().unwrap().push_str(token);
    });

    let config = OrchestratorConfig::new("You are a helpful assistant. Be verbose.", "interrupt-timeout")
        .callbacks(callbacks);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;
    let cancel = orchestrator.cancel_handle();

    println!("Starting run (will time out after 3 seconds)...\n");

    let result = timeout(
        Duration::from_secs(3),
        orchestrator.run("Write a detailed 1000-word essay about quantum computing"),
    )
    .await;

    match result {
        Ok(_) => println!("\n\nResponse completed within timeout"),
        Err(_) => {
            cancel.store(true, Ordering::SeqCst);
            println!("\n\n\u{26a0}\u{fe0f}  Operation timed out and was interrupted!");
            println!(
                "Received {} characters before timeout\n",
                received.lock().unwrap().len()
            );
        }
    }

    Ok(())
}

// ============================================================================
// Example 2: Conditional Interruption
// ============================================================================
async fn conditional_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 2: Conditional Interruption");
    println!("{}", "=".repeat(60));
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .build()?;

    let full_text = Arc::new(Mutex::new(String::new()));
    let text_cb = Arc::clone(&full_text);
    let cancel_flag = Arc::new(Mutex::new(None::<Arc<std::sync::atomic::AtomicBool>>));
    let cancel_flag_cb = Arc::clone(&cancel_flag);

    let callbacks = OrchestratorCallbacks::new().on_token(move |token| {
        print!("{token}");
        let mut text = text_cb.lock().unwrap();
        text.push_str(token);

        if text.to_lowercase().contains("neural network") {
            if let Some(handle) = cancel_flag_cb.lock().unwrap().as_ref() {
                handle.store(true, Ordering::SeqCst);
                println!("\n\n\u{26a0}\u{fe0f}  Found keyword 'neural network' - interrupting!");
            }
        }
    });

    let config = OrchestratorConfig::new("You are a helpful assistant.", "interrupt-conditional").callbacks(callbacks);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;
    *cancel_flag.lock().unwrap() = Some(orchestrator.cancel_handle());

    println!("Receiving response (will stop if we see 'neural network')...\n");
    orchestrator.run("Tell me about machine learning").await?;

    println!(
        "\nReceived {} characters before interrupt\n",
        full_text.lock().unwrap().len()
    );

    Ok(())
}

// ============================================================================
// Example 3: Concurrent Interruption
// ============================================================================
async fn concurrent_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 3: Concurrent Interruption (Simulated User Cancel)");
    println!("{}", "=".repeat(60));
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .build()?;

    let full_text = Arc::new(Mutex::new(String::new()));
    let text_cb = Arc::clone(&full_text);
    let callbacks = OrchestratorCallbacks::new().on_token(move |token| {
        print!("{token}");
        text_cb.lock().unwrap().push_str(token);
    });

    let config = OrchestratorConfig::new("You are a helpful assistant.", "interrupt-concurrent").callbacks(callbacks);
    let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;
    let cancel = orchestrator.cancel_handle();

    println!("Receiving response...\n");

    let cancel_handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        println!("\n\n\u{1f6d1} User clicked cancel button!");
        cancel.store(true, Ordering::SeqCst);
    });

    orchestrator.run("Explain artificial intelligence in detail").await?;
    let _ = cancel_handle.await;

    println!(
        "\n\nReceived {} characters before interrupt\n",
        full_text.lock().unwrap().len()
    );

    Ok(())
}

// ============================================================================
// Example 4: Interrupt and Retry
// ============================================================================
async fn retry_example() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Example 4: Interrupt and Retry");
    println!("{}", "=".repeat(60));
    println!();

    let options = AgentOptions::builder()
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .build()?;

    let count = Arc::new(Mutex::new(0u32));
    let count_cb = Arc::clone(&count);
    let cancel_flag = Arc::new(Mutex::new(None::<Arc<std::sync::atomic::AtomicBool>>));
    let cancel_flag_cb = Arc::clone(&cancel_flag);

    let callbacks = OrchestratorCallbacks::new().on_token(move |_token| {
        let mut c = count_cb.lock().unwrap();
        *c += 1;
        if *c == 3 {
            if let Some(handle) = cancel_flag_cb.lock().unwrap().as_ref() {
                handle.store(true, Ordering::SeqCst);
                println!("\n\u{26a0}\u{fe0f}  Oops, that was too broad. Interrupting...\n");
            }
        }
    });

    let config = OrchestratorConfig::new("You are a helpful assistant.", "interrupt-retry-1").callbacks(callbacks);
    let mut orchestrator = AgentLoopOrchestrator::new(options.clone(), config)?;
    *cancel_flag.lock().unwrap() = Some(orchestrator.cancel_handle());

    println!("First query (will be interrupted)...\n");
    let result = orchestrator
        .run("Tell me everything about the history of computing")
        .await?;
    println!("First run ended with status: {:?}", result.completion_status);

    println!("Retrying with more specific query...\n");
    let retry_callbacks = OrchestratorCallbacks::new().on_token(|token| print!("{token}"));
    let retry_config = OrchestratorConfig::new("You are a helpful assistant.", "interrupt-retry-2").callbacks(retry_callbacks);
    let mut retry_orchestrator = AgentLoopOrchestrator::new(options, retry_config)?;
    let result = retry_orchestrator
        .run("Tell me about Alan Turing in 2 sentences")
        .await?;

    println!(
        "\n\nSuccess! Query completed after retry ({:?}).\n",
        result.completion_status
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n{}", "=".repeat(60));
    println!("INTERRUPT CAPABILITY DEMO");
    println!("{}", "=".repeat(60));
    println!();

    println!("This demo requires Ollama running at http://localhost:11434");
    println!("with a model loaded (e.g., qwen3:8b)\n");

    println!("Running examples...\n");

    if let Err(e) = timeout_example().await {
        eprintln!("Timeout example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = conditional_example().await {
        eprintln!("Conditional example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = concurrent_example().await {
        eprintln!("Concurrent example error: {e}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = retry_example().await {
        eprintln!("Retry example error: {e}");
    }

    println!("{}", "=".repeat(60));
    println!("All examples completed!");
    println!("{}", "=".repeat(60));

    Ok(())
}
