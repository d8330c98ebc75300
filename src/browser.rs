//! Browser Session Coordinator: invoked for tool calls with browser
//! semantics, per §4.7. Scans the current set of open sessions once per
//! turn, auto-spawns or auto-injects a session id when a call is missing one,
//! backfills a target URL from the chosen session, and consults a risk
//! evaluator before marking a call as approval-required.

use serde_json::Value;

/// Minimal snapshot of one open browser session, as reported by the runtime
/// collaborator (§6 "Browser runtime collaborator").
#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub id: String,
    pub current_url: Option<String>,
}

/// How a freshly auto-spawned session should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Isolated,
    Attach,
}

/// Risk verdict for one proposed browser action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVerdict {
    Allow,
    Gate,
    Deny,
}

/// One entry appended to the approval event log for every browser-tool
/// decision, approved or denied.
#[derive(Debug, Clone)]
pub struct BrowserApprovalEvent {
    pub tool: String,
    pub session_id: Option<String>,
    pub risk: RiskVerdict,
    pub target: Option<String>,
    pub reason: String,
}

/// Configured allow/deny lists the risk evaluator checks proposed navigation
/// and action targets against.
#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    pub allowed_hosts: Vec<String>,
    pub blocked_origins: Vec<String>,
    pub sensitive_actions: Vec<String>,
}

impl RiskPolicy {
    fn evaluate(&self, tool_name: &str, target: Option<&str>) -> RiskVerdict {
        if let Some(target) = target {
            if self
                .blocked_origins
                .iter()
                .any(|origin| target.starts_with(origin))
            {
                return RiskVerdict::Deny;
            }
            if !self.allowed_hosts.is_empty()
                && !self
                    .allowed_hosts
                    .iter()
                    .any(|host| target.contains(host.as_str()))
            {
                return RiskVerdict::Gate;
            }
        }
        if self.sensitive_actions.iter().any(|a| a == tool_name) {
            return RiskVerdict::Gate;
        }
        RiskVerdict::Allow
    }
}

/// Result of routing one browser-tool call through the coordinator.
#[derive(Debug, Clone)]
pub enum BrowserDecision {
    /// The call may proceed, with `arguments` (possibly rewritten to inject a
    /// session id or backfill a URL) and whether approval is still required.
    Proceed {
        arguments: Value,
        requires_approval: bool,
    },
    Denied {
        reason: String,
    },
}

fn is_browser_tool(tool_name: &str) -> bool {
    tool_name.starts_with("browser_")
}

/// Marks a rewritten argument set as having passed through the approval-
/// required branch of the coordinator, per literal scenario 6.
fn mark_approved(arguments: &mut Value) {
    if let Value::Object(map) = arguments {
        map.insert("__browser_approved".to_string(), Value::Bool(true));
    }
}

/// Coordinates browser-tool calls for one turn. Construct fresh per turn
/// after a session scan, since session state is only read once per turn
/// (§5 "Shared resources").
pub struct BrowserCoordinator {
    sessions: Vec<BrowserSession>,
    spawn_mode: SpawnMode,
    risk_policy: RiskPolicy,
    events: Vec<BrowserApprovalEvent>,
}

impl BrowserCoordinator {
    pub fn new(sessions: Vec<BrowserSession>, spawn_mode: SpawnMode, risk_policy: RiskPolicy) -> Self {
        Self {
            sessions,
            spawn_mode,
            risk_policy,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[BrowserApprovalEvent] {
        &self.events
    }

    /// Routes one tool call. Returns `None` (pass-through, unmodified) for
    /// calls that aren't browser tools at all.
    pub fn route(&mut self, tool_name: &str, mut arguments: Value) -> Option<BrowserDecision> {
        if !is_browser_tool(tool_name) {
            return None;
        }

        if tool_name == "browser_open" {
            mark_approved(&mut arguments);
            let decision = BrowserDecision::Proceed {
                arguments,
                requires_approval: true,
            };
            self.log(tool_name, None, RiskVerdict::Gate, None, "browser_open always requires approval");
            return Some(decision);
        }

        let explicit_session = arguments
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let (session_id, requires_approval_for_session) = match explicit_session {
            Some(id) => (id, false),
            None => {
                if let Some(first) = self.sessions.first() {
                    (first.id.clone(), true)
                } else {
                    let spawned = self.spawn_session_id();
                    (spawned, true)
                }
            }
        };

        if let Value::Object(map) = &mut arguments {
            map.insert("session_id".to_string(), Value::String(session_id.clone()));
        }

        let needs_url_backfill = matches!(tool_name, "browser_click" | "browser_type")
            && arguments.get("url").and_then(Value::as_str).is_none();
        if needs_url_backfill {
            if let Some(session) = self.sessions.iter().find(|s| s.id == session_id) {
                if let Some(url) = &session.current_url {
                    if let Value::Object(map) = &mut arguments {
                        map.insert("url".to_string(), Value::String(url.clone()));
                    }
                }
            }
        }

        let target = arguments.get("url").and_then(Value::as_str).map(str::to_string);
        let risk = self.risk_policy.evaluate(tool_name, target.as_deref());

        if risk == RiskVerdict::Deny {
            let reason = format!("browser risk evaluator denied {tool_name} against {target:?}");
            self.log(tool_name, Some(session_id.clone()), risk, target, &reason);
            return Some(BrowserDecision::Denied { reason });
        }

        let requires_approval =
            requires_approval_for_session || risk == RiskVerdict::Gate;

        if requires_approval {
            mark_approved(&mut arguments);
        }

        self.log(
            tool_name,
            Some(session_id),
            risk,
            target,
            if requires_approval {
                "routed, approval required"
            } else {
                "routed"
            },
        );

        Some(BrowserDecision::Proceed {
            arguments,
            requires_approval,
        })
    }

    fn spawn_session_id(&self) -> String {
        match self.spawn_mode {
            SpawnMode::Isolated => format!("isolated-{}", self.sessions.len() + 1),
            SpawnMode::Attach => format!("attach-{}", self.sessions.len() + 1),
        }
    }

    fn log(
        &mut self,
        tool: &str,
        session_id: Option<String>,
        risk: RiskVerdict,
        target: Option<String>,
        reason: &str,
    ) {
        self.events.push(BrowserApprovalEvent {
            tool: tool.to_string(),
            session_id,
            risk,
            target,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn browser_open_always_requires_approval() {
        let mut coordinator =
            BrowserCoordinator::new(vec![], SpawnMode::Isolated, RiskPolicy::default());
        let decision = coordinator.route("browser_open", json!({})).unwrap();
        assert!(matches!(
            decision,
            BrowserDecision::Proceed { requires_approval: true, .. }
        ));
    }

    #[test]
    fn auto_spawns_session_when_none_open_and_none_given() {
        let mut coordinator =
            BrowserCoordinator::new(vec![], SpawnMode::Isolated, RiskPolicy::default());
        let decision = coordinator.route("browser_click", json!({})).unwrap();
        let BrowserDecision::Proceed { arguments, requires_approval } = decision else {
            panic!("expected proceed")
        };
        assert!(requires_approval);
        assert_eq!(arguments["session_id"], "isolated-1");
    }

    #[test]
    fn auto_injects_first_session_when_none_given() {
        let sessions = vec![BrowserSession {
            id: "sess-1".to_string(),
            current_url: Some("https://example.com".to_string()),
        }];
        let mut coordinator =
            BrowserCoordinator::new(sessions, SpawnMode::Isolated, RiskPolicy::default());
        let decision = coordinator.route("browser_click", json!({})).unwrap();
        let BrowserDecision::Proceed { arguments, requires_approval } = decision else {
            panic!("expected proceed")
        };
        assert!(requires_approval);
        assert_eq!(arguments["session_id"], "sess-1");
        assert_eq!(arguments["url"], "https://example.com");
    }

    #[test]
    fn explicit_session_id_skips_approval_for_session_selection() {
        let sessions = vec![BrowserSession {
            id: "sess-1".to_string(),
            current_url: None,
        }];
        let mut coordinator =
            BrowserCoordinator::new(sessions, SpawnMode::Isolated, RiskPolicy::default());
        let decision = coordinator
            .route("browser_navigate", json!({"session_id": "sess-1", "url": "https://ok.example"}))
            .unwrap();
        assert!(matches!(
            decision,
            BrowserDecision::Proceed { requires_approval: false, .. }
        ));
    }

    #[test]
    fn blocked_origin_is_denied() {
        let risk_policy = RiskPolicy {
            blocked_origins: vec!["https://evil.example".to_string()],
            ..Default::default()
        };
        let sessions = vec![BrowserSession {
            id: "sess-1".to_string(),
            current_url: None,
        }];
        let mut coordinator = BrowserCoordinator::new(sessions, SpawnMode::Isolated, risk_policy);
        let decision = coordinator
            .route(
                "browser_navigate",
                json!({"session_id": "sess-1", "url": "https://evil.example/login"}),
            )
            .unwrap();
        assert!(matches!(decision, BrowserDecision::Denied { .. }));
    }

    #[test]
    fn approval_required_calls_are_marked_browser_approved() {
        let mut coordinator =
            BrowserCoordinator::new(vec![], SpawnMode::Isolated, RiskPolicy::default());
        let decision = coordinator.route("browser_open", json!({})).unwrap();
        let BrowserDecision::Proceed { arguments, .. } = decision else {
            panic!("expected proceed")
        };
        assert_eq!(arguments["__browser_approved"], true);
    }

    #[test]
    fn non_browser_tool_is_not_routed() {
        let mut coordinator =
            BrowserCoordinator::new(vec![], SpawnMode::Isolated, RiskPolicy::default());
        assert!(coordinator.route("search", json!({})).is_none());
    }
}
