//! Hooks system for intercepting and controlling agent execution
//!
//! This module provides a hooks system for monitoring and controlling agent
//! behavior at key lifecycle points.
//!
//! # Examples
//!
//! ```rust,no_run
//! use opta_agent_core::{PreToolUseEvent, HookDecision};
//!
//! async fn approve_tool(event: PreToolUseEvent) -> Option<HookDecision> {
//!     if event.tool_name == "delete_file" {
//!         return Some(HookDecision {
//!             continue_execution: false,
//!             modified_input: None,
//!             modified_prompt: None,
//!             reason: Some("Dangerous operation blocked".to_string()),
//!         });
//!     }
//!     None // Continue normally
//! }
//! ```

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Event fired before tool execution
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    /// Name of the tool about to be executed
    pub tool_name: String,
    /// Input parameters for the tool
    pub tool_input: Value,
    /// Unique identifier for this tool use
    pub tool_use_id: String,
    /// Snapshot of conversation history (read-only)
    pub history: Vec<Value>,
}

impl PreToolUseEvent {
    pub fn new(
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        history: Vec<Value>,
    ) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
            history,
        }
    }
}

/// Event fired after tool execution
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    /// Name of the tool that was executed
    pub tool_name: String,
    /// Input parameters that were used
    pub tool_input: Value,
    /// Unique identifier for this tool use
    pub tool_use_id: String,
    /// Result returned by the tool (success or error)
    pub tool_result: Value,
    /// Snapshot of conversation history (read-only)
    pub history: Vec<Value>,
}

impl PostToolUseEvent {
    pub fn new(
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        tool_result: Value,
        history: Vec<Value>,
    ) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
            tool_result,
            history,
        }
    }
}

/// Event fired before processing user input
#[derive(Debug, Clone)]
pub struct UserPromptSubmitEvent {
    /// The user's input prompt
    pub prompt: String,
    /// Snapshot of conversation history (read-only)
    pub history: Vec<Value>,
}

impl UserPromptSubmitEvent {
    pub fn new(prompt: String, history: Vec<Value>) -> Self {
        Self { prompt, history }
    }
}

/// Decision returned by hook handler to control execution
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    /// Whether to continue execution (default: true)
    pub continue_execution: bool,
    /// For PreToolUse - modified tool input (overrides original)
    pub modified_input: Option<Value>,
    /// For UserPromptSubmit - modified prompt (overrides original)
    pub modified_prompt: Option<String>,
    /// Optional explanation for logging/debugging
    pub reason: Option<String>,
}

impl HookDecision {
    /// Create a decision to continue execution normally
    pub fn continue_() -> Self {
        Self {
            continue_execution: true,
            modified_input: None,
            modified_prompt: None,
            reason: None,
        }
    }

    /// Create a decision to block execution
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: false,
            modified_input: None,
            modified_prompt: None,
            reason: Some(reason.into()),
        }
    }

    /// Create a decision to modify tool input
    pub fn modify_input(input: Value, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_input: Some(input),
            modified_prompt: None,
            reason: Some(reason.into()),
        }
    }

    /// Create a decision to modify prompt
    pub fn modify_prompt(prompt: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_input: None,
            modified_prompt: Some(prompt.into()),
            reason: Some(reason.into()),
        }
    }
}

/// Event fired once when a session begins.
#[derive(Debug, Clone)]
pub struct SessionStartEvent {
    pub session_id: String,
}

impl SessionStartEvent {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }
}

/// Event fired once when a session ends, successfully or not.
#[derive(Debug, Clone)]
pub struct SessionEndEvent {
    pub session_id: String,
    pub status: String,
    pub tool_call_count: u32,
}

impl SessionEndEvent {
    pub fn new(session_id: String, status: String, tool_call_count: u32) -> Self {
        Self {
            session_id,
            status,
            tool_call_count,
        }
    }
}

/// Event fired whenever the conversation store compacts history.
#[derive(Debug, Clone)]
pub struct CompactEvent {
    pub messages_before: usize,
    pub messages_after: usize,
    pub summary: String,
}

impl CompactEvent {
    pub fn new(messages_before: usize, messages_after: usize, summary: String) -> Self {
        Self {
            messages_before,
            messages_after,
            summary,
        }
    }
}

/// Event fired when a fatal runtime error is about to terminate the loop.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub message: String,
    pub history: Vec<Value>,
}

impl ErrorEvent {
    pub fn new(message: String, history: Vec<Value>) -> Self {
        Self { message, history }
    }
}

/// Type alias for hook handler functions
///
/// Hook handlers are async functions that take an event and return an optional decision.
///
/// Returns:
/// - `None`: Continue normally with no modifications
/// - `Some(HookDecision)`: Control execution (continue/skip/modify)
///
/// Raising an error will abort execution entirely.
pub type PreToolUseHandler = Arc<
    dyn Fn(PreToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

pub type PostToolUseHandler = Arc<
    dyn Fn(PostToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

pub type UserPromptSubmitHandler = Arc<
    dyn Fn(UserPromptSubmitEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

/// Notification-only handlers: session lifecycle, compaction, and fatal
/// errors don't gate execution, so there is no decision to return.
pub type SessionStartHandler =
    Arc<dyn Fn(SessionStartEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub type SessionEndHandler =
    Arc<dyn Fn(SessionEndEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub type CompactHandler =
    Arc<dyn Fn(CompactEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub type ErrorHandler =
    Arc<dyn Fn(ErrorEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Container for all hook types
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_tool_use: Vec<PreToolUseHandler>,
    pub post_tool_use: Vec<PostToolUseHandler>,
    pub user_prompt_submit: Vec<UserPromptSubmitHandler>,
    pub session_start: Vec<SessionStartHandler>,
    pub session_end: Vec<SessionEndHandler>,
    pub compact: Vec<CompactHandler>,
    pub error: Vec<ErrorHandler>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PreToolUse hook
    pub fn add_pre_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PreToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.pre_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a PostToolUse hook
    pub fn add_post_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PostToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.post_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a UserPromptSubmit hook
    pub fn add_user_prompt_submit<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(UserPromptSubmitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.user_prompt_submit
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a SessionStart hook
    pub fn add_session_start<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(SessionStartEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.session_start
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a SessionEnd hook
    pub fn add_session_end<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(SessionEndEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.session_end
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a Compact hook
    pub fn add_compact<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CompactEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.compact
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add an Error hook
    pub fn add_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Execute PreToolUse hooks and return the first non-None decision
    pub async fn execute_pre_tool_use(&self, event: PreToolUseEvent) -> Option<HookDecision> {
        for handler in &self.pre_tool_use {
            if let Some(decision) = handler(event.clone()).await {
                return Some(decision);
            }
        }
        None
    }

    /// Execute PostToolUse hooks and return the first non-None decision
    pub async fn execute_post_tool_use(&self, event: PostToolUseEvent) -> Option<HookDecision> {
        for handler in &self.post_tool_use {
            if let Some(decision) = handler(event.clone()).await {
                return Some(decision);
            }
        }
        None
    }

    /// Execute UserPromptSubmit hooks and return the first non-None decision
    pub async fn execute_user_prompt_submit(
        &self,
        event: UserPromptSubmitEvent,
    ) -> Option<HookDecision> {
        for handler in &self.user_prompt_submit {
            if let Some(decision) = handler(event.clone()).await {
                return Some(decision);
            }
        }
        None
    }

    /// Fire all SessionStart hooks; notification-only, no decision to return.
    pub async fn execute_session_start(&self, event: SessionStartEvent) {
        for handler in &self.session_start {
            handler(event.clone()).await;
        }
    }

    /// Fire all SessionEnd hooks; notification-only, no decision to return.
    pub async fn execute_session_end(&self, event: SessionEndEvent) {
        for handler in &self.session_end {
            handler(event.clone()).await;
        }
    }

    /// Fire all Compact hooks; notification-only, no decision to return.
    pub async fn execute_compact(&self, event: CompactEvent) {
        for handler in &self.compact {
            handler(event.clone()).await;
        }
    }

    /// Fire all Error hooks; notification-only, no decision to return.
    pub async fn execute_error(&self, event: ErrorEvent) {
        for handler in &self.error {
            handler(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field(
                "pre_tool_use",
                &format!("{} handlers", self.pre_tool_use.len()),
            )
            .field(
                "post_tool_use",
                &format!("{} handlers", self.post_tool_use.len()),
            )
            .field(
                "user_prompt_submit",
                &format!("{} handlers", self.user_prompt_submit.len()),
            )
            .field(
                "session_start",
                &format!("{} handlers", self.session_start.len()),
            )
            .field(
                "session_end",
                &format!("{} handlers", self.session_end.len()),
            )
            .field("compact", &format!("{} handlers", self.compact.len()))
            .field("error", &format!("{} handlers", self.error.len()))
            .finish()
    }
}

/// Hook event name constants
pub const HOOK_PRE_TOOL_USE: &str = "pre_tool_use";
pub const HOOK_POST_TOOL_USE: &str = "post_tool_use";
pub const HOOK_USER_PROMPT_SUBMIT: &str = "user_prompt_submit";
pub const HOOK_SESSION_START: &str = "session_start";
pub const HOOK_SESSION_END: &str = "session_end";
pub const HOOK_COMPACT: &str = "compact";
pub const HOOK_ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_session_lifecycle_hooks_fire() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let started = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let started_clone = started.clone();
        let ended_clone = ended.clone();

        let hooks = Hooks::new()
            .add_session_start(move |_event| {
                let started = started_clone.clone();
                async move {
                    started.store(true, Ordering::SeqCst);
                }
            })
            .add_session_end(move |_event| {
                let ended = ended_clone.clone();
                async move {
                    ended.store(true, Ordering::SeqCst);
                }
            });

        hooks
            .execute_session_start(SessionStartEvent::new("sess-1".to_string()))
            .await;
        hooks
            .execute_session_end(SessionEndEvent::new("sess-1".to_string(), "completed".to_string(), 3))
            .await;

        assert!(started.load(Ordering::SeqCst));
        assert!(ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_compact_and_error_hooks_fire() {
        let hooks = Hooks::new()
            .add_compact(|_event| async move {})
            .add_error(|_event| async move {});

        hooks
            .execute_compact(CompactEvent::new(20, 5, "summary".to_string()))
            .await;
        hooks
            .execute_error(ErrorEvent::new("boom".to_string(), vec![]))
            .await;
    }

    #[tokio::test]
    async fn test_hook_decision_builders() {
        let continue_dec = HookDecision::continue_();
        assert!(continue_dec.continue_execution);
        assert!(continue_dec.reason.is_none());

        let block_dec = HookDecision::block("test");
        assert!(!block_dec.continue_execution);
        assert_eq!(block_dec.reason, Some("test".to_string()));

        let modify_dec = HookDecision::modify_input(json!({"test": 1}), "modified");
        assert!(modify_dec.continue_execution);
        assert!(modify_dec.modified_input.is_some());
    }

    #[tokio::test]
    async fn test_pre_tool_use_hook() {
        let hooks = Hooks::new().add_pre_tool_use(|event| async move {
            if event.tool_name == "dangerous" {
                return Some(HookDecision::block("blocked"));
            }
            None
        });

        let event = PreToolUseEvent::new(
            "dangerous".to_string(),
            json!({}),
            "id1".to_string(),
            vec![],
        );

        let decision = hooks.execute_pre_tool_use(event).await;
        assert!(decision.is_some());
        assert!(!decision.unwrap().continue_execution);
    }

    #[tokio::test]
    async fn test_post_tool_use_hook() {
        let hooks = Hooks::new().add_post_tool_use(|_event| async move { None });

        let event = PostToolUseEvent::new(
            "test".to_string(),
            json!({}),
            "id1".to_string(),
            json!({"result": "ok"}),
            vec![],
        );

        // Should not panic
        hooks.execute_post_tool_use(event).await;
    }

    #[tokio::test]
    async fn test_user_prompt_submit_hook() {
        let hooks = Hooks::new().add_user_prompt_submit(|event| async move {
            if event.prompt.contains("DELETE") {
                return Some(HookDecision::block("dangerous prompt"));
            }
            None
        });

        let event = UserPromptSubmitEvent::new("DELETE all files".to_string(), vec![]);

        let decision = hooks.execute_user_prompt_submit(event).await;
        assert!(decision.is_some());
        assert!(!decision.unwrap().continue_execution);
    }
}
