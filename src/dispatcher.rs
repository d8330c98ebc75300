//! Tool Dispatcher: executes approved tool decisions with bounded
//! concurrency, preserving original call order when recording results, per
//! §4.8.

use crate::policy::ToolDecision;
use crate::tools::Tool;
use crate::types::ToolUseBlock;
use crate::{Error, Result};
use futures::stream::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Looks tools up by name; the adapter between the `AgentOptions` tool roster
/// (`&[Arc<Tool>]`) and the dispatcher's by-name execution contract.
pub struct ToolRegistry<'a> {
    tools: &'a [Arc<Tool>],
}

impl<'a> ToolRegistry<'a> {
    pub fn new(tools: &'a [Arc<Tool>]) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().map(|t| t.as_ref()).find(|t| t.name() == name)
    }

    async fn execute(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::tool(format!("unknown tool: {name}")))?;
        tool.execute(arguments).await
    }
}

/// Lifecycle callbacks the dispatcher fires around each call; §6's
/// `onToolStart`/`onToolEnd`.
pub struct DispatchCallbacks {
    pub on_tool_start: Option<Box<dyn Fn(&str, &str, &Value) + Send + Sync>>,
    pub on_tool_end: Option<Box<dyn Fn(&str, &str, &str) + Send + Sync>>,
}

impl Default for DispatchCallbacks {
    fn default() -> Self {
        Self {
            on_tool_start: None,
            on_tool_end: None,
        }
    }
}

/// A call to dispatch, already resolved by the policy/browser gates.
pub struct DispatchItem {
    pub tool_use: ToolUseBlock,
    pub decision: ToolDecision,
}

/// One result keyed back to the originating call, in dispatch order.
pub struct DispatchResult {
    pub tool_use_id: String,
    pub tool_name: String,
    pub content: String,
}

const FILE_MODIFYING_TOOLS: &[&str] = &["edit_file", "write_file"];

/// Names matching a verification-style shell run, used to classify a
/// successful exit-0 shell result as a `solution` learning capture.
const VERIFICATION_COMMAND_MARKERS: &[&str] = &["test", "build", "typecheck", "lint"];

/// A fire-and-forget sink for problem/solution learning captures. Never
/// blocks dispatch; failures to record are simply dropped.
pub trait LearningSink: Send + Sync {
    fn capture_problem(&self, tool_name: &str, detail: &str);
    fn capture_solution(&self, tool_name: &str, detail: &str);
}

/// Dispatches approved tool calls with a bounded concurrency of
/// `max_parallel_tools`, preserving dispatch order on reassembly.
pub struct ToolDispatcher<'a> {
    registry: ToolRegistry<'a>,
    max_parallel_tools: usize,
    callbacks: DispatchCallbacks,
    learning: Option<Arc<dyn LearningSink>>,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: ToolRegistry<'a>, max_parallel_tools: usize) -> Self {
        Self {
            registry,
            max_parallel_tools: max_parallel_tools.max(1),
            callbacks: DispatchCallbacks::default(),
            learning: None,
        }
    }

    pub fn with_callbacks(mut self, callbacks: DispatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_learning_sink(mut self, sink: Arc<dyn LearningSink>) -> Self {
        self.learning = Some(sink);
        self
    }

    /// Dispatches every item. Emits all tool-start events up front in
    /// original order (invariant §8.4: every `onToolStart` precedes any
    /// `onToolEnd`), then runs approved calls concurrently bounded by
    /// `max_parallel_tools` on this same task (no OS threads spawned, per
    /// §5's cooperative-single-task model), then reassembles results in the
    /// original order regardless of completion order. If `cancelled` flips
    /// while calls are in flight, already-running tool futures still
    /// complete (tools are not preemptible) but any call not yet past its
    /// semaphore acquire is denied instead of executed.
    pub async fn dispatch(
        &self,
        items: Vec<DispatchItem>,
        cancelled: &AtomicBool,
    ) -> Result<Vec<DispatchResult>> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancellation);
        }

        for item in &items {
            if let Some(cb) = &self.callbacks.on_tool_start {
                let args = match &item.decision {
                    ToolDecision::Approved { arguments } => arguments.clone(),
                    ToolDecision::Denied { .. } => Value::Null,
                };
                cb(&item.tool_use.name, &item.tool_use.id, &args);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_tools));
        let indexed: Vec<(usize, DispatchItem)> = items.into_iter().enumerate().collect();

        let mut completed: Vec<(usize, DispatchResult)> = futures::stream::iter(indexed)
            .map(|(index, item)| {
                let semaphore = semaphore.clone();
                async move {
                    let tool_use_id = item.tool_use.id.clone();
                    let tool_name = item.tool_use.name.clone();

                    let content = match item.decision {
                        ToolDecision::Denied { reason } => format!("Error: {reason}"),
                        ToolDecision::Approved { arguments } => {
                            if cancelled.load(Ordering::SeqCst) {
                                "Error: cancelled before dispatch".to_string()
                            } else {
                                let result = self.run_one(&semaphore, &tool_name, arguments).await;
                                let content = match result {
                                    Ok(value) => {
                                        self.record_learning(&tool_name, true, &value);
                                        value.to_string()
                                    }
                                    Err(e) => {
                                        self.record_learning(
                                            &tool_name,
                                            false,
                                            &serde_json::json!(e.to_string()),
                                        );
                                        format!("Error: {e}")
                                    }
                                };
                                if let Some(cb) = &self.callbacks.on_tool_end {
                                    cb(&tool_name, &tool_use_id, &content);
                                }
                                content
                            }
                        }
                    };

                    (
                        index,
                        DispatchResult {
                            tool_use_id,
                            tool_name,
                            content,
                        },
                    )
                }
            })
            .buffer_unordered(self.max_parallel_tools)
            .collect()
            .await;

        completed.sort_by_key(|(index, _)| *index);
        Ok(completed.into_iter().map(|(_, result)| result).collect())
    }

    async fn run_one(&self, semaphore: &Semaphore, tool_name: &str, arguments: Value) -> Result<Value> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| Error::other("tool semaphore closed"))?;
        self.registry.execute(tool_name, arguments).await
    }

    fn record_learning(&self, tool_name: &str, success: bool, value: &Value) {
        let Some(sink) = &self.learning else { return };
        if success {
            let is_verification =
                VERIFICATION_COMMAND_MARKERS.iter().any(|m| tool_name.contains(m));
            if is_verification {
                sink.capture_solution(tool_name, &value.to_string());
            }
        } else {
            sink.capture_problem(tool_name, &value.to_string());
        }
    }

    pub fn requires_recovery_checkpoint(tool_name: &str) -> bool {
        FILE_MODIFYING_TOOLS.contains(&tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool;
    use serde_json::json;

    fn echo_tool() -> Arc<Tool> {
        Arc::new(
            tool("echo", "echoes input")
                .param("value", "string")
                .build(|args: Value| async move { Ok(args) }),
        )
    }

    #[tokio::test]
    async fn dispatches_approved_calls_and_preserves_order() {
        let tools = vec![echo_tool()];
        let registry = ToolRegistry::new(&tools);
        let dispatcher = ToolDispatcher::new(registry, 2);
        let cancelled = AtomicBool::new(false);

        let items = vec![
            DispatchItem {
                tool_use: ToolUseBlock::new("call_1", "echo", json!({"value": "a"})),
                decision: ToolDecision::Approved {
                    arguments: json!({"value": "a"}),
                },
            },
            DispatchItem {
                tool_use: ToolUseBlock::new("call_2", "echo", json!({"value": "b"})),
                decision: ToolDecision::Approved {
                    arguments: json!({"value": "b"}),
                },
            },
        ];

        let results = dispatcher.dispatch(items, &cancelled).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_use_id, "call_1");
        assert_eq!(results[1].tool_use_id, "call_2");
    }

    #[tokio::test]
    async fn denied_calls_surface_reason_as_error_content() {
        let tools = vec![echo_tool()];
        let registry = ToolRegistry::new(&tools);
        let dispatcher = ToolDispatcher::new(registry, 2);
        let cancelled = AtomicBool::new(false);

        let items = vec![DispatchItem {
            tool_use: ToolUseBlock::new("call_1", "echo", json!({})),
            decision: ToolDecision::Denied {
                reason: "not allowed".to_string(),
            },
        }];

        let results = dispatcher.dispatch(items, &cancelled).await.unwrap();
        assert_eq!(results[0].content, "Error: not allowed");
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_content_not_panic() {
        let tools: Vec<Arc<Tool>> = vec![];
        let registry = ToolRegistry::new(&tools);
        let dispatcher = ToolDispatcher::new(registry, 2);
        let cancelled = AtomicBool::new(false);

        let items = vec![DispatchItem {
            tool_use: ToolUseBlock::new("call_1", "missing", json!({})),
            decision: ToolDecision::Approved { arguments: json!({}) },
        }];

        let results = dispatcher.dispatch(items, &cancelled).await.unwrap();
        assert!(results[0].content.starts_with("Error:"));
    }

    #[test]
    fn file_modifying_tools_require_checkpoint() {
        assert!(ToolDispatcher::requires_recovery_checkpoint("edit_file"));
        assert!(ToolDispatcher::requires_recovery_checkpoint("write_file"));
        assert!(!ToolDispatcher::requires_recovery_checkpoint("search"));
    }
}
