//! Error types for the Opta Agent Core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent execution core.
///
/// Most variants are recoverable at the orchestrator level (see the `is_terminal`
/// helper); a handful represent a session that cannot continue.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// The operation was cancelled by the caller or by a cancellation token firing.
    #[error("Cancelled")]
    Cancellation,

    /// A stream failed to open at all (before any chunk was yielded). Retryable
    /// per the open-retry policy in `pipeline`.
    #[error("Failed to open stream: {0}")]
    TransportOpen(String),

    /// A stream failed after at least one chunk had already been yielded.
    /// Recoverable via mid-stream reconnect in `pipeline`.
    #[error("Stream failed mid-flight: {0}")]
    TransportMid(String),

    /// The assistant emitted pseudo tool-call markup instead of a real tool call.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The declarative policy engine denied a tool call.
    #[error("Policy denied tool '{tool}': {reason}")]
    PolicyDeny {
        /// Name of the denied tool.
        tool: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The per-tool permission map denied a tool call.
    #[error("Permission denied for tool '{tool}'")]
    PermissionDeny {
        /// Name of the denied tool.
        tool: String,
    },

    /// The user (or sub-agent resolution) denied an approval prompt.
    #[error("User denied tool '{tool}': {reason}")]
    UserDeny {
        /// Name of the denied tool.
        tool: String,
        /// Reason given, if any.
        reason: String,
    },

    /// A pre-tool-use hook blocked execution.
    #[error("Hook denied tool '{tool}': {reason}")]
    HookDeny {
        /// Name of the denied tool.
        tool: String,
        /// Reason returned by the hook.
        reason: String,
    },

    /// Context compaction failed. Non-terminal: the conversation is left unchanged.
    #[error("Compaction failed: {0}")]
    Compaction(String),

    /// The supervisor ("Atpo") failed to produce or parse a correction.
    /// Non-terminal: the supervisor simply does not intervene this turn.
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    /// The session's total runtime budget was exceeded.
    #[error("Runtime budget exceeded ({elapsed_secs}s elapsed)")]
    RuntimeBudgetExceeded {
        /// Elapsed session time in seconds when the budget fired.
        elapsed_secs: u64,
    },

    /// The circuit breaker's hard-stop tool-call threshold was reached.
    #[error("Circuit breaker hard stop at {tool_call_count} tool calls")]
    HardStop {
        /// Tool call count at the time of the hard stop.
        tool_call_count: u32,
    },

    /// The circuit breaker's pause threshold was reached in a non-interactive
    /// session that does not permit headless continuation.
    #[error("Paused at {tool_call_count} tool calls awaiting confirmation")]
    Paused {
        /// Tool call count at the time of the pause.
        tool_call_count: u32,
    },

    /// Any other uncaught error that forces the agent loop to terminate.
    #[error("Fatal runtime error: {0}")]
    Fatal(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a transport-open error
    pub fn transport_open(msg: impl Into<String>) -> Self {
        Error::TransportOpen(msg.into())
    }

    /// Create a transport-mid error
    pub fn transport_mid(msg: impl Into<String>) -> Self {
        Error::TransportMid(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a policy-deny error
    pub fn policy_deny(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PolicyDeny {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a permission-deny error
    pub fn permission_deny(tool: impl Into<String>) -> Self {
        Error::PermissionDeny { tool: tool.into() }
    }

    /// Create a user-deny error
    pub fn user_deny(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UserDeny {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a hook-deny error
    pub fn hook_deny(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::HookDeny {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a compaction error
    pub fn compaction(msg: impl Into<String>) -> Self {
        Error::Compaction(msg.into())
    }

    /// Create a supervisor error
    pub fn supervisor(msg: impl Into<String>) -> Self {
        Error::Supervisor(msg.into())
    }

    /// Create a runtime-budget-exceeded error
    pub fn runtime_budget_exceeded(elapsed_secs: u64) -> Self {
        Error::RuntimeBudgetExceeded { elapsed_secs }
    }

    /// Create a hard-stop error
    pub fn hard_stop(tool_call_count: u32) -> Self {
        Error::HardStop { tool_call_count }
    }

    /// Create a paused error
    pub fn paused(tool_call_count: u32) -> Self {
        Error::Paused { tool_call_count }
    }

    /// Create a fatal runtime error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }

    /// Whether this error should end the session outright rather than being
    /// absorbed and recovered from at the orchestrator level.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Cancellation
                | Error::RuntimeBudgetExceeded { .. }
                | Error::HardStop { .. }
                | Error::Paused { .. }
                | Error::Fatal(_)
        )
    }
}
