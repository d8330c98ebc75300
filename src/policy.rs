//! Policy & Permission Gate: resolves what happens to a proposed tool call
//! before it reaches the dispatcher, through the ordered checks in §4.6 —
//! shell/browser-automation guard, policy engine, per-tool permission map,
//! interactive approval, and the pre-tool hook.

use crate::hooks::{HookDecision, Hooks, PreToolUseEvent};
use serde_json::Value;
use std::collections::HashMap;

/// Who is proposing the tool call. Sub-agents cannot prompt for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Agent,
    SubAgent,
}

/// Coarse-grained verdict the policy engine hands back for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Gate,
    Deny,
}

/// Per-tool entry in the persistent permission map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    Ask,
    Deny,
}

/// Outcome of an interactive approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Once,
    Always,
    Deny,
}

/// A callback that resolves an approval prompt for one proposed call.
/// Returns `None` when the caller cannot or did not answer (treated as deny).
pub type ApprovalCallback =
    std::sync::Arc<dyn Fn(&str, &Value) -> Option<ApprovalOutcome> + Send + Sync>;

/// Declares allow/gate/deny for an action given its actor and autonomy mode.
/// The default engine allows everything for the primary agent and denies
/// gated/asked actions for sub-agents, matching §4.6's "sub-agents cannot
/// prompt" rule; callers replace `rules` to express a real declarative policy.
pub struct PolicyEngine {
    rules: HashMap<String, PolicyVerdict>,
    default_verdict: PolicyVerdict,
}

impl PolicyEngine {
    pub fn new(default_verdict: PolicyVerdict) -> Self {
        Self {
            rules: HashMap::new(),
            default_verdict,
        }
    }

    pub fn with_rule(mut self, action: impl Into<String>, verdict: PolicyVerdict) -> Self {
        self.rules.insert(action.into(), verdict);
        self
    }

    pub fn evaluate(&self, action: &str) -> PolicyVerdict {
        self.rules.get(action).copied().unwrap_or(self.default_verdict)
    }
}

/// Persistent map of per-tool permissions, mutated only on an "always" approval.
#[derive(Debug, Clone, Default)]
pub struct PermissionMap {
    entries: HashMap<String, Permission>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tool: impl Into<String>, permission: Permission) {
        self.entries.insert(tool.into(), permission);
    }

    pub fn get(&self, tool: &str) -> Permission {
        self.entries.get(tool).copied().unwrap_or(Permission::Ask)
    }
}

/// Final outcome of running a proposed tool call through the gate.
#[derive(Debug, Clone)]
pub enum ToolDecision {
    /// The call may proceed, with `arguments` possibly rewritten along the way
    /// (e.g. by the browser coordinator injecting a session id).
    Approved { arguments: Value },
    /// The call was denied; `reason` is surfaced as the tool result content.
    Denied { reason: String },
}

/// Substrings that mark a shell command as GUI automation against a browser;
/// per §4.6 these are denied unconditionally regardless of policy/permission,
/// directing the caller to the dedicated browser tools instead.
const BROWSER_AUTOMATION_MARKERS: &[&str] = &[
    "xdotool",
    "osascript -e",
    "applescript",
    "automator",
    "appium",
];

fn is_shell_browser_automation(tool_name: &str, arguments: &Value) -> bool {
    if tool_name != "run_command" && tool_name != "shell" {
        return false;
    }
    let command = arguments
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or("");
    let lower = command.to_lowercase();
    BROWSER_AUTOMATION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// The gate itself. Holds the policy engine, the permission map, and (if set)
/// an approval callback and pre-tool hooks to consult.
pub struct PolicyGate {
    engine: PolicyEngine,
    permissions: PermissionMap,
    approval: Option<ApprovalCallback>,
    hooks: Hooks,
}

impl PolicyGate {
    pub fn new(engine: PolicyEngine, permissions: PermissionMap) -> Self {
        Self {
            engine,
            permissions,
            approval: None,
            hooks: Hooks::new(),
        }
    }

    pub fn with_approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval = Some(callback);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn permissions(&self) -> &PermissionMap {
        &self.permissions
    }

    /// Resolves the decision for one proposed call, per the ordered checks in
    /// §4.6. `history` is a read-only snapshot passed through to the pre-tool
    /// hook. `force_gate` lets an upstream collaborator (the browser
    /// coordinator, per §4.7) require interactive approval for a call the
    /// policy engine and permission map would otherwise let through, without
    /// the gate needing to know why.
    pub async fn resolve(
        &mut self,
        tool_name: &str,
        tool_use_id: &str,
        arguments: Value,
        actor: Actor,
        history: Vec<Value>,
        force_gate: bool,
    ) -> ToolDecision {
        if is_shell_browser_automation(tool_name, &arguments) {
            return ToolDecision::Denied {
                reason: format!(
                    "{tool_name} looks like GUI automation against a browser; use the \
                     dedicated browser tools instead of shelling out."
                ),
            };
        }

        let verdict = self.engine.evaluate(tool_name);
        if verdict == PolicyVerdict::Deny {
            return ToolDecision::Denied {
                reason: format!("policy denied {tool_name}"),
            };
        }

        let permission = self.permissions.get(tool_name);
        if permission == Permission::Deny {
            return ToolDecision::Denied {
                reason: format!("permission denied for {tool_name}"),
            };
        }

        let needs_approval =
            verdict == PolicyVerdict::Gate || permission == Permission::Ask || force_gate;
        if needs_approval {
            if actor == Actor::SubAgent {
                return ToolDecision::Denied {
                    reason: format!("sub-agents cannot request approval for {tool_name}"),
                };
            }

            match self.approval.as_ref().and_then(|cb| cb(tool_name, &arguments)) {
                Some(ApprovalOutcome::Once) => {}
                Some(ApprovalOutcome::Always) => {
                    self.permissions.set(tool_name, Permission::Allow);
                }
                Some(ApprovalOutcome::Deny) | None => {
                    return ToolDecision::Denied {
                        reason: format!("user denied {tool_name}"),
                    };
                }
            }
        }

        let event = PreToolUseEvent::new(
            tool_name.to_string(),
            arguments.clone(),
            tool_use_id.to_string(),
            history,
        );
        if let Some(decision) = self.hooks.execute_pre_tool_use(event).await {
            if !decision.continue_execution {
                return ToolDecision::Denied {
                    reason: decision
                        .reason
                        .unwrap_or_else(|| format!("pre-tool hook blocked {tool_name}")),
                };
            }
            if let Some(modified) = decision.modified_input {
                return ToolDecision::Approved { arguments: modified };
            }
        }

        ToolDecision::Approved { arguments }
    }
}
