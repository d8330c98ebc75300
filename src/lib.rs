//! # Opta Agent Core - Rust Implementation
//!
//! A production-ready, streaming-first Rust SDK for building autonomous coding
//! agents against local OpenAI-compatible servers.
//!
//! ## Overview
//!
//! This SDK provides a clean, ergonomic API for working with local LLM servers such as:
//! - LM Studio
//! - Ollama
//! - llama.cpp
//! - vLLM
//!
//! ## Key Features
//!
//! - **Zero API Costs**: Run models on your own hardware
//! - **Privacy-First**: All data stays local on your machine
//! - **High Performance**: Native async/await with Tokio runtime
//! - **Streaming Responses**: Real-time token-by-token streaming with duplex/unary reconnect
//! - **Tool Calling**: Define and execute tools with automatic schema generation
//! - **Bounded-Parallel Dispatch**: Execute approved tool calls concurrently, in original order
//! - **Policy & Permission Gate**: Allow/gate/deny tool calls, with interactive approval
//! - **Browser Session Coordination**: Route browser tool calls through risk-scored session routing
//! - **Autonomy Circuit Breaker**: Per-level warn/pause/hard-stop thresholds and runtime budgets
//! - **Supervisor**: A secondary model watching trajectory for loops and hallucinated tool results
//! - **Lifecycle Hooks**: Intercept and control execution at key points
//! - **Interrupts**: Gracefully cancel long-running operations
//! - **Context Compaction**: Token estimation, masked history, and LLM-summarized compaction
//! - **Retry Logic**: Exponential backoff with jitter for reliability
//!
//! ## Running a Task
//!
//! The [`orchestrator::AgentLoopOrchestrator`] is the entry point: it drives a
//! full agent session (streaming, gating, dispatch, compaction, autonomy) to
//! completion for one task.
//!
//! ```rust,no_run
//! use opta_agent_core::{AgentLoopOrchestrator, AgentOptions, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let config = OrchestratorConfig::new("You are a careful coding agent.", "session-1")
//!         .autonomy_level(2);
//!
//!     let mut orchestrator = AgentLoopOrchestrator::new(options, config)?;
//!     let result = orchestrator.run("List the files in the current directory").await?;
//!
//!     println!("ended with {:?} after {} tool calls", result.completion_status, result.tool_call_count);
//!     Ok(())
//! }
//! ```
//!
//! Lower-level building blocks ([`transport`], [`pipeline`], [`collector`],
//! [`conversation`]) are also public for callers assembling a narrower turn
//! loop than the full orchestrator (e.g. a sub-agent spawner).
//!
//! ## Architecture
//!
//! The SDK is organized into several modules, each with a specific responsibility:
//!
//! - **orchestrator**: Composes every collaborator below into one per-task agent loop
//! - **transport**: Duplex/unary stream adapters over the provider chat API
//! - **pipeline**: Reconnect-with-dedup wrapper around the transport adapters
//! - **collector**: Accumulates stream chunks into visible text, tool calls, and usage
//! - **conversation**: Conversation history, masking, and LLM-driven compaction
//! - **prompt**: Capability manifest and system prompt construction
//! - **policy**: Policy engine, permission map, and interactive approval gate
//! - **browser**: Browser session routing and risk scoring for browser tool calls
//! - **dispatcher**: Bounded-parallel tool execution with ordered result reassembly
//! - **autonomy**: Per-level circuit breaker, runtime budget, and stage checkpoints
//! - **supervisor**: Secondary-model trajectory supervisor ("Atpo")
//! - **types**: Data structures for messages, content blocks, and configuration
//! - **tools**: Tool definition system with automatic JSON schema generation
//! - **hooks**: Lifecycle event system for intercepting execution
//! - **config**: Provider-specific configuration helpers
//! - **error**: Comprehensive error types and conversions
//! - **context**: Token estimation and message truncation utilities
//! - **retry**: Exponential backoff retry logic with jitter
//! - **utils**: Internal utilities for SSE parsing and tool aggregation

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless explicitly
// re-exported through `pub use` statements below.

/// Per-level autonomy circuit breaker, runtime budget, and stage checkpoints.
mod autonomy;

/// Browser session coordination and risk scoring for browser-automation tool calls.
mod browser;

/// Accumulates normalized stream chunks into visible text, tool calls, and usage.
mod collector;

/// Provider configuration helpers for LM Studio, Ollama, llama.cpp, and vLLM.
/// Simplifies endpoint and model name resolution with environment variable support.
mod config;

/// Context window management utilities for token estimation and history truncation.
/// Provides manual control over conversation memory to prevent context overflow.
mod context;

/// Conversation history storage, masking of older tool output, and compaction.
mod conversation;

/// Bounded-parallel tool dispatcher with ordered result reassembly.
mod dispatcher;

/// Error types and conversions for comprehensive error handling throughout the SDK.
/// Defines the `Error` enum and `Result<T>` type alias used across all public APIs.
mod error;

/// Lifecycle hooks system for intercepting and controlling execution at key points.
/// Enables security gates, audit logging, input/output modification, and compliance checks.
mod hooks;

/// Composes every other module into one per-task agent loop.
mod orchestrator;

/// Reconnect-with-dedup wrapper around the duplex/unary transport adapters.
mod pipeline;

/// Policy engine, permission map, and interactive approval gate for tool calls.
mod policy;

/// Capability manifest and system prompt construction.
mod prompt;

/// Secondary-model trajectory supervisor ("Atpo").
mod supervisor;

/// Tool definition and execution system with automatic JSON schema generation.
/// Allows LLMs to call Rust functions with type-safe parameter handling.
mod tools;

/// Duplex/unary stream adapters over the provider chat API.
mod transport;

/// Core type definitions for messages, content blocks, and agent configuration.
/// Includes builder patterns for ergonomic configuration and OpenAI API serialization.
mod types;

/// Internal utilities for Server-Sent Events (SSE) parsing and tool call aggregation.
/// Handles the low-level details of streaming response parsing.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================
// These items form the public API of the SDK. Everything else is internal.

/// Retry utilities with exponential backoff and jitter.
/// Made public as a module so users can access retry configuration and functions
/// for their own operations that need retry logic.
pub mod retry;

// --- Agent Loop Orchestrator ---

pub use orchestrator::{
    AgentLoopOrchestrator, AgentLoopResult, CompletionStatus, OrchestratorCallbacks,
    OrchestratorConfig, RecoveryCheckpointSink,
};

// --- Streaming building blocks (for callers assembling a narrower turn loop) ---

pub use collector::{ChunkCollector, CollectedTurn};
pub use conversation::ConversationStore;
pub use pipeline::{DuplexAvailability, RecoverableStreamPipeline};
pub use transport::{ChunkStream, StreamChunk, ToolCallDelta, TransportKind, Usage};

// --- Policy, browser, dispatch, autonomy, and supervisor ---

pub use autonomy::{AutonomyState, BreakerOutcome, LevelConfig};
pub use browser::{BrowserApprovalEvent, BrowserCoordinator, BrowserSession, RiskPolicy, SpawnMode};
pub use dispatcher::{DispatchCallbacks, DispatchItem, DispatchResult, LearningSink, ToolDispatcher};
pub use policy::{
    Actor, ApprovalCallback, ApprovalOutcome, Permission, PermissionMap, PolicyEngine,
    PolicyGate, PolicyVerdict, ToolDecision,
};
pub use prompt::{AgentMode, CapabilityManifest, SystemPromptBuilder};
pub use supervisor::{Supervisor, SupervisorState, SupervisorThresholds};

// --- Provider Configuration ---

pub use config::{Provider, get_autonomy_level, get_base_url, get_max_parallel_tools, get_model};

// --- Context Management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Lifecycle Hooks ---

pub use hooks::{
    CompactEvent, ErrorEvent, HOOK_COMPACT, HOOK_ERROR, HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE,
    HOOK_SESSION_END, HOOK_SESSION_START, HOOK_USER_PROMPT_SUBMIT, HookDecision, Hooks,
    PostToolUseEvent, PreToolUseEvent, SessionEndEvent, SessionStartEvent, UserPromptSubmitEvent,
};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, tool};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ContentBlock, ImageBlock, ImageDetail, Message,
    MessageRole, OpenAIContent, OpenAIContentPart, TextBlock, ToolResultBlock, ToolUseBlock,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use opta_agent_core::prelude::*;` to get everything you need for typical usage.
///
/// This includes:
/// - Configuration: AgentOptions, AgentOptionsBuilder, OrchestratorConfig
/// - Orchestration: AgentLoopOrchestrator, AgentLoopResult, CompletionStatus
/// - Content: ContentBlock, TextBlock, ToolUseBlock
/// - Tools: Tool, tool()
/// - Hooks: Hooks, HookDecision, hook event types
/// - Errors: Error, Result
pub mod prelude {
    pub use crate::{
        AgentLoopOrchestrator, AgentLoopResult, AgentOptions, AgentOptionsBuilder,
        CompletionStatus, ContentBlock, Error, HookDecision, Hooks, OrchestratorCallbacks,
        OrchestratorConfig, PostToolUseEvent, PreToolUseEvent, Result, TextBlock, Tool,
        ToolUseBlock, UserPromptSubmitEvent, tool,
    };
}
