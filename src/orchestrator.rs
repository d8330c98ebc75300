//! Agent Loop Orchestrator: the externally-exposed per-turn agent loop, per
//! §4.11. Composes the compactor, the recoverable stream pipeline, the chunk
//! collector, the policy/browser gates, the dispatcher, and the autonomy
//! circuit breaker into one `run()` call per user task.

use crate::autonomy::{self, AutonomyState, BreakerOutcome};
use crate::browser::{BrowserCoordinator, BrowserDecision, BrowserSession, RiskPolicy, SpawnMode};
use crate::collector::ChunkCollector;
use crate::conversation::ConversationStore;
use crate::dispatcher::{
    DispatchCallbacks, DispatchItem, LearningSink, ToolDispatcher, ToolRegistry,
};
use crate::hooks::{CompactEvent, ErrorEvent, Hooks, SessionEndEvent, SessionStartEvent, UserPromptSubmitEvent};
use crate::pipeline::{DuplexAvailability, RecoverableStreamPipeline};
use crate::policy::{Actor, ApprovalCallback, PermissionMap, PolicyEngine, PolicyGate, PolicyVerdict, ToolDecision};
use crate::prompt::{AgentMode, CapabilityManifest, SystemPromptBuilder};
use crate::retry::RetryConfig;
use crate::supervisor::{self, Supervisor, SupervisorState, SupervisorThresholds};
use crate::transport::{self, Usage};
use crate::types::{
    AgentOptions, ContentBlock, Message, MessageRole, OpenAIContent, OpenAIFunction, OpenAIMessage,
    OpenAIToolCall, TextBlock, ToolResultBlock,
};
use crate::{Error, Result};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Substrings marking assistant text that imitates a tool call instead of
/// issuing a real one, per §4.11 step 8.
const PSEUDO_TOOL_MARKERS: &[&str] = &[
    "<execute_command",
    "<run_command",
    "<tool_call",
    "<function_call",
    "<invoke",
    "```tool_code",
];

fn contains_pseudo_tool_markup(text: &str) -> bool {
    let lower = text.to_lowercase();
    PSEUDO_TOOL_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn render_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts one internal [`Message`] into the wire-format [`OpenAIMessage`],
/// following the `Some(OpenAIContent::Text(..))` pattern already used by
/// `transport`/`conversation`/`supervisor` rather than `client.rs`'s stale
/// direct-field construction.
fn message_to_openai(message: &Message) -> OpenAIMessage {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    if message.role == MessageRole::Tool {
        if let Some(ContentBlock::ToolResult(result)) = message.content.first() {
            return OpenAIMessage {
                role: role.to_string(),
                content: Some(OpenAIContent::Text(render_tool_result(&result.content))),
                tool_calls: None,
                tool_call_id: Some(result.tool_use_id.clone()),
            };
        }
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text(t) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t.text);
            }
            ContentBlock::ToolUse(tool_use) => {
                tool_calls.push(OpenAIToolCall {
                    id: tool_use.id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: tool_use.name.clone(),
                        arguments: tool_use.input.to_string(),
                    },
                });
            }
            ContentBlock::Image(_) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str("[image omitted from replay]");
            }
            ContentBlock::ToolResult(result) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&render_tool_result(&result.content));
            }
        }
    }

    OpenAIMessage {
        role: role.to_string(),
        content: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(OpenAIContent::Text(text))
        },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn to_openai_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
    messages.iter().map(message_to_openai).collect()
}

/// How one `run()` call ended. Distinct from [`Error`]: these are session
/// outcomes the loop reaches deliberately, never propagated as an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Stopped,
    HardStop,
    Paused,
    RuntimeBudgetReached,
}

impl CompletionStatus {
    fn label(self) -> &'static str {
        match self {
            CompletionStatus::Completed => "completed",
            CompletionStatus::Stopped => "stopped",
            CompletionStatus::HardStop => "hard_stop",
            CompletionStatus::Paused => "paused",
            CompletionStatus::RuntimeBudgetReached => "runtime_budget_reached",
        }
    }
}

/// Result of one `agentLoop` invocation, per §6.
#[derive(Debug, Clone)]
pub struct AgentLoopResult {
    pub messages: Vec<Message>,
    pub tool_call_count: u32,
    pub completion_status: CompletionStatus,
}

/// External collaborator that persists conversation history and periodic
/// recovery checkpoints under a session-keyed namespace, per §6's "persisted
/// state" and §4.11 step 11. The core only decides when to call it.
pub trait RecoveryCheckpointSink: Send + Sync {
    fn save(&self, session_id: &str, checkpoint_number: u32, messages: &[Message]);
    fn clear(&self, session_id: &str);
}

/// Lifecycle callbacks the orchestrator fires during a run; §6's `onStream`
/// callback set, narrowed to what this core owns (sub-agent callbacks belong
/// to the sub-agent spawner collaborator and are out of scope here).
#[derive(Clone, Default)]
pub struct OrchestratorCallbacks {
    pub on_token: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_thinking: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_tool_start: Option<Arc<dyn Fn(&str, &str, &Value) + Send + Sync>>,
    pub on_tool_end: Option<Arc<dyn Fn(&str, &str, &str) + Send + Sync>>,
    pub on_usage: Option<Arc<dyn Fn(Usage) + Send + Sync>>,
    pub on_atpo_state: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_browser_event: Option<Arc<dyn Fn(&crate::browser::BrowserApprovalEvent) + Send + Sync>>,
}

impl OrchestratorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_token(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Arc::new(f));
        self
    }

    pub fn on_thinking(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_thinking = Some(Arc::new(f));
        self
    }

    pub fn on_tool_start(mut self, f: impl Fn(&str, &str, &Value) + Send + Sync + 'static) -> Self {
        self.on_tool_start = Some(Arc::new(f));
        self
    }

    pub fn on_tool_end(mut self, f: impl Fn(&str, &str, &str) + Send + Sync + 'static) -> Self {
        self.on_tool_end = Some(Arc::new(f));
        self
    }

    pub fn on_usage(mut self, f: impl Fn(Usage) + Send + Sync + 'static) -> Self {
        self.on_usage = Some(Arc::new(f));
        self
    }

    pub fn on_atpo_state(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_atpo_state = Some(Arc::new(f));
        self
    }

    pub fn on_browser_event(
        mut self,
        f: impl Fn(&crate::browser::BrowserApprovalEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_browser_event = Some(Arc::new(f));
        self
    }
}

/// Everything needed to construct an [`AgentLoopOrchestrator`] beyond the
/// shared [`AgentOptions`]. Fluent setters mirror the rest of the crate's
/// builder idiom.
pub struct OrchestratorConfig {
    role_description: String,
    working_directory: Option<String>,
    project_context: Option<String>,
    export_map: Option<Vec<(String, String)>>,
    tool_compatibility_warning: Option<String>,
    mode: Option<AgentMode>,
    profile: Option<String>,
    autonomy_level: u8,
    ceo_mode: bool,
    headless_continue: bool,
    token_limit: usize,
    session_id: String,
    actor: Actor,
    policy_engine: PolicyEngine,
    permissions: PermissionMap,
    approval_callback: Option<ApprovalCallback>,
    browser_sessions: Vec<BrowserSession>,
    browser_spawn_mode: SpawnMode,
    browser_risk_policy: RiskPolicy,
    hooks: Hooks,
    supervisor_thresholds: SupervisorThresholds,
    recovery_checkpoint_every: u32,
    recovery_sink: Option<Arc<dyn RecoveryCheckpointSink>>,
    learning_sink: Option<Arc<dyn LearningSink>>,
    callbacks: OrchestratorCallbacks,
}

impl OrchestratorConfig {
    pub fn new(role_description: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            role_description: role_description.into(),
            working_directory: None,
            project_context: None,
            export_map: None,
            tool_compatibility_warning: None,
            mode: None,
            profile: None,
            autonomy_level: 1,
            ceo_mode: false,
            headless_continue: false,
            token_limit: 32_000,
            session_id: session_id.into(),
            actor: Actor::Agent,
            policy_engine: PolicyEngine::new(PolicyVerdict::Allow),
            permissions: PermissionMap::new(),
            approval_callback: None,
            browser_sessions: Vec::new(),
            browser_spawn_mode: SpawnMode::Isolated,
            browser_risk_policy: RiskPolicy::default(),
            hooks: Hooks::new(),
            supervisor_thresholds: SupervisorThresholds::default(),
            recovery_checkpoint_every: 10,
            recovery_sink: None,
            learning_sink: None,
            callbacks: OrchestratorCallbacks::default(),
        }
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn project_context(mut self, context: impl Into<String>) -> Self {
        self.project_context = Some(context.into());
        self
    }

    pub fn export_map(mut self, entries: Vec<(String, String)>) -> Self {
        self.export_map = Some(entries);
        self
    }

    pub fn tool_compatibility_warning(mut self, warning: impl Into<String>) -> Self {
        self.tool_compatibility_warning = Some(warning.into());
        self
    }

    pub fn mode(mut self, mode: AgentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn autonomy_level(mut self, level: u8) -> Self {
        self.autonomy_level = level;
        self
    }

    pub fn ceo_mode(mut self, enabled: bool) -> Self {
        self.ceo_mode = enabled;
        self
    }

    pub fn headless_continue(mut self, enabled: bool) -> Self {
        self.headless_continue = enabled;
        self
    }

    pub fn token_limit(mut self, limit: usize) -> Self {
        self.token_limit = limit;
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn policy_engine(mut self, engine: PolicyEngine) -> Self {
        self.policy_engine = engine;
        self
    }

    pub fn permissions(mut self, permissions: PermissionMap) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval_callback = Some(callback);
        self
    }

    pub fn browser_sessions(mut self, sessions: Vec<BrowserSession>) -> Self {
        self.browser_sessions = sessions;
        self
    }

    pub fn browser_spawn_mode(mut self, mode: SpawnMode) -> Self {
        self.browser_spawn_mode = mode;
        self
    }

    pub fn browser_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.browser_risk_policy = policy;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn supervisor_thresholds(mut self, thresholds: SupervisorThresholds) -> Self {
        self.supervisor_thresholds = thresholds;
        self
    }

    pub fn recovery_checkpoint_every(mut self, every: u32) -> Self {
        self.recovery_checkpoint_every = every;
        self
    }

    pub fn recovery_sink(mut self, sink: Arc<dyn RecoveryCheckpointSink>) -> Self {
        self.recovery_sink = Some(sink);
        self
    }

    pub fn learning_sink(mut self, sink: Arc<dyn LearningSink>) -> Self {
        self.learning_sink = Some(sink);
        self
    }

    pub fn callbacks(mut self, callbacks: OrchestratorCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Drives one agent session: a sequence of turns against a tool-using model,
/// gated by policy and autonomy, until the conversation completes, is
/// stopped, or a circuit-breaker/runtime-budget threshold ends it. See §4.11.
pub struct AgentLoopOrchestrator {
    options: AgentOptions,
    http_client: reqwest::Client,
    conversation: ConversationStore,
    pipeline: RecoverableStreamPipeline,
    autonomy: AutonomyState,
    supervisor: Supervisor,
    supervisor_state: SupervisorState,
    policy_gate: PolicyGate,
    browser_sessions: Vec<BrowserSession>,
    browser_spawn_mode: SpawnMode,
    browser_risk_policy: RiskPolicy,
    hooks: Hooks,
    callbacks: OrchestratorCallbacks,
    learning_sink: Option<Arc<dyn LearningSink>>,
    recovery_sink: Option<Arc<dyn RecoveryCheckpointSink>>,
    recovery_checkpoint_every: u32,
    working_directory: Option<String>,
    cancelled: Arc<AtomicBool>,
    session_id: String,
    actor: Actor,
    cycle: u32,
    stage_index: usize,
    tool_call_count: u32,
    checkpoint_count: u32,
    protocol_retry_used: bool,
}

impl AgentLoopOrchestrator {
    pub fn new(options: AgentOptions, config: OrchestratorConfig) -> Result<Self> {
        let http_client = transport::build_http_client(options.timeout())?;

        // Env overrides take priority over the builder-supplied defaults,
        // matching every other provider setting resolved in `config.rs`.
        let autonomy_level = crate::config::get_autonomy_level(config.autonomy_level);

        let manifest = CapabilityManifest {
            mode: config.mode,
            autonomy_level,
            ceo_mode: config.ceo_mode,
            profile: config.profile.clone(),
            tool_count: options.tools().len(),
            research_enabled: config.mode == Some(AgentMode::Research),
            browser_enabled: true,
            learning_enabled: config.learning_sink.is_some(),
            policy_enabled: true,
        };

        let mut builder = SystemPromptBuilder::new(config.role_description.clone()).manifest(manifest);
        if let Some(dir) = &config.working_directory {
            builder = builder.working_directory(dir.clone());
        }
        if let Some(context) = &config.project_context {
            builder = builder.project_context(context.clone());
        }
        if let Some(entries) = &config.export_map {
            builder = builder.export_map(entries.clone());
        }
        if let Some(warning) = &config.tool_compatibility_warning {
            builder = builder.tool_compatibility_warning(warning.clone());
        }
        let system_prompt = builder.build(None);

        let mut level_config = autonomy::level_config(autonomy_level);
        if config.ceo_mode {
            level_config = autonomy::apply_ceo_mode(level_config);
        }
        level_config.max_parallel_tools =
            crate::config::get_max_parallel_tools(level_config.max_parallel_tools);

        // spec §4.4: recentCount = clamp(contextLimit / 4000, 6, 20)
        let recent_count = (config.token_limit / 4000).clamp(6, 20);
        let mut conversation = ConversationStore::new(config.token_limit)
            .with_recent_count(recent_count)
            .with_compaction_margin(level_config.compaction_ratio);
        conversation.push(Message::system(system_prompt));

        let pipeline = RecoverableStreamPipeline::new(
            RetryConfig::default(),
            RetryConfig::default(),
            DuplexAvailability::new(),
        );

        let autonomy_state = AutonomyState::new(level_config).with_headless_continue(config.headless_continue);

        let mut policy_gate = PolicyGate::new(config.policy_engine, config.permissions)
            .with_hooks(config.hooks.clone());
        if let Some(callback) = config.approval_callback {
            policy_gate = policy_gate.with_approval_callback(callback);
        }

        let supervisor = Supervisor::new(options.clone(), config.supervisor_thresholds);

        Ok(Self {
            options,
            http_client,
            conversation,
            pipeline,
            autonomy: autonomy_state,
            supervisor,
            supervisor_state: SupervisorState::default(),
            policy_gate,
            browser_sessions: config.browser_sessions,
            browser_spawn_mode: config.browser_spawn_mode,
            browser_risk_policy: config.browser_risk_policy,
            hooks: config.hooks,
            callbacks: config.callbacks,
            learning_sink: config.learning_sink,
            recovery_sink: config.recovery_sink,
            recovery_checkpoint_every: config.recovery_checkpoint_every.max(1),
            working_directory: config.working_directory,
            cancelled: Arc::new(AtomicBool::new(false)),
            session_id: config.session_id,
            actor: config.actor,
            cycle: 1,
            stage_index: 0,
            tool_call_count: 0,
            checkpoint_count: 0,
            protocol_retry_used: false,
        })
    }

    /// A working directory counts as a versioned repo when it (or an
    /// ancestor) contains a `.git` entry. Sub-agents and callers that never
    /// set a working directory are treated as unversioned.
    fn is_versioned_repo(&self) -> bool {
        let Some(dir) = &self.working_directory else {
            return false;
        };
        std::path::Path::new(dir).ancestors().any(|p| p.join(".git").exists())
    }

    /// A handle the caller can flip to request cancellation; checked at the
    /// top of every turn and inside the stream pipeline and dispatcher.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count
    }

    fn history_snapshot(&self) -> Vec<Value> {
        self.conversation
            .messages()
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect()
    }

    fn advance_stage(&mut self) {
        self.stage_index += 1;
        if self.stage_index % 7 == 0 {
            self.cycle += 1;
        }
    }

    /// Runs one task to completion (or to whatever terminal status ends the
    /// session first), per §6's `agentLoop`.
    pub async fn run(&mut self, task: impl Into<String>) -> Result<AgentLoopResult> {
        self.hooks
            .execute_session_start(SessionStartEvent::new(self.session_id.clone()))
            .await;

        let prompt_event = UserPromptSubmitEvent::new(task.into(), self.history_snapshot());
        let mut prompt = prompt_event.prompt.clone();
        if let Some(decision) = self.hooks.execute_user_prompt_submit(prompt_event).await {
            if !decision.continue_execution {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "prompt blocked by hook".to_string());
                self.hooks
                    .execute_session_end(SessionEndEvent::new(
                        self.session_id.clone(),
                        "blocked".to_string(),
                        self.tool_call_count,
                    ))
                    .await;
                return Err(Error::hook_deny("user_prompt_submit", reason));
            }
            if let Some(modified) = decision.modified_prompt {
                prompt = modified;
            }
        }
        self.conversation.push(Message::user(prompt));

        let status = loop {
            match self.step().await {
                Ok(ControlFlow::Continue(())) => continue,
                Ok(ControlFlow::Break(status)) => break status,
                Err(e) => {
                    self.hooks
                        .execute_error(ErrorEvent::new(e.to_string(), self.history_snapshot()))
                        .await;
                    self.hooks
                        .execute_session_end(SessionEndEvent::new(
                            self.session_id.clone(),
                            "error".to_string(),
                            self.tool_call_count,
                        ))
                        .await;
                    return Err(e);
                }
            }
        };

        if status == CompletionStatus::Completed {
            if let Some(sink) = &self.recovery_sink {
                sink.clear(&self.session_id);
            }
        }

        self.hooks
            .execute_session_end(SessionEndEvent::new(
                self.session_id.clone(),
                status.label().to_string(),
                self.tool_call_count,
            ))
            .await;

        Ok(AgentLoopResult {
            messages: self.conversation.messages().to_vec(),
            tool_call_count: self.tool_call_count,
            completion_status: status,
        })
    }

    /// Runs the eleven steps of §4.11 for one turn. `Ok(Continue)` means the
    /// loop should run another turn; `Ok(Break(status))` ends the session
    /// with that status; `Err` is a genuine failure the caller must propagate.
    async fn step(&mut self) -> Result<ControlFlow<CompletionStatus, ()>> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancellation);
        }

        match self
            .supervisor
            .maybe_intervene(&self.http_client, &mut self.supervisor_state, self.conversation.messages())
            .await
        {
            Ok(Some(correction)) => {
                if let Some(cb) = &self.callbacks.on_atpo_state {
                    cb(&correction);
                }
                self.conversation.push(supervisor::correction_message(&correction));
                return Ok(ControlFlow::Continue(()));
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("supervisor pass failed, continuing without intervention: {e}");
            }
        }

        if self.autonomy.runtime_budget_exceeded() {
            return Ok(ControlFlow::Break(CompletionStatus::RuntimeBudgetReached));
        }

        if self.conversation.is_approaching_limit() {
            let before = self.conversation.messages().len();
            match self.conversation.compact(&self.http_client, &self.options).await {
                Ok(()) => {
                    let after = self.conversation.messages().len();
                    self.hooks
                        .execute_compact(CompactEvent::new(before, after, "context compacted".to_string()))
                        .await;
                }
                Err(e) => {
                    log::warn!("compaction failed, continuing with uncompacted history: {e}");
                }
            }
        }

        let checkpoint = autonomy::render_stage_checkpoint(self.cycle, self.stage_index);
        self.conversation.push(Message::system(checkpoint));

        let masked = self.conversation.masked_view();
        let request_messages = to_openai_messages(&masked);

        let chunks = self
            .pipeline
            .run_turn(&self.http_client, &self.options, &request_messages, &self.cancelled)
            .await?;

        let mut collector = ChunkCollector::new();
        if let Some(cb) = self.callbacks.on_thinking.clone() {
            collector = collector.with_thinking_sink(move |t| cb(t));
        }

        let mut last_usage = None;
        for chunk in chunks {
            if let Some(content) = &chunk.content {
                if let Some(cb) = &self.callbacks.on_token {
                    cb(content);
                }
            }
            last_usage = chunk.usage.or(last_usage);
            collector.push(chunk)?;
        }
        let turn = collector.finish()?;

        if let Some(usage) = turn.usage.or(last_usage) {
            if let Some(cb) = &self.callbacks.on_usage {
                cb(usage);
            }
        }
        if turn.finish_reason.as_deref() == Some("length") {
            log::warn!("turn truncated at max_tokens (finish_reason=length)");
        }

        if turn.tool_calls.is_empty() {
            if contains_pseudo_tool_markup(&turn.visible_text) {
                if !self.protocol_retry_used {
                    self.protocol_retry_used = true;
                    self.conversation.push(Message::assistant(turn.into_content_blocks()));
                    self.conversation.push(Message::system(
                        "That looked like tool-call markup instead of a real tool call. Call \
                         one of the registered tools directly, or respond in plain text if no \
                         tool is needed."
                            .to_string(),
                    ));
                    self.advance_stage();
                    return Ok(ControlFlow::Continue(()));
                }

                self.conversation.push(Message::assistant(vec![ContentBlock::Text(TextBlock::new(
                    "I couldn't issue a valid tool call for this step, so I'm stopping here \
                     rather than repeat the same mistake.",
                ))]));
                return Ok(ControlFlow::Break(CompletionStatus::Stopped));
            }

            self.protocol_retry_used = false;
            self.conversation.push(Message::assistant(turn.into_content_blocks()));

            if self.autonomy.maybe_force_reassessment() {
                self.advance_stage();
                return Ok(ControlFlow::Continue(()));
            }

            return Ok(ControlFlow::Break(CompletionStatus::Completed));
        }

        self.protocol_retry_used = false;
        let tool_calls = turn.tool_calls.clone();
        self.conversation.push(Message::assistant(turn.into_content_blocks()));

        let history_snapshot = self.history_snapshot();
        let mut browser_coordinator = BrowserCoordinator::new(
            self.browser_sessions.clone(),
            self.browser_spawn_mode,
            self.browser_risk_policy.clone(),
        );

        let mut items = Vec::with_capacity(tool_calls.len());
        for tool_use in tool_calls {
            let decision = match browser_coordinator.route(&tool_use.name, tool_use.input.clone()) {
                Some(BrowserDecision::Denied { reason }) => ToolDecision::Denied { reason },
                Some(BrowserDecision::Proceed { arguments, requires_approval }) => {
                    self.policy_gate
                        .resolve(
                            &tool_use.name,
                            &tool_use.id,
                            arguments,
                            self.actor,
                            history_snapshot.clone(),
                            requires_approval,
                        )
                        .await
                }
                None => {
                    self.policy_gate
                        .resolve(
                            &tool_use.name,
                            &tool_use.id,
                            tool_use.input.clone(),
                            self.actor,
                            history_snapshot.clone(),
                            false,
                        )
                        .await
                }
            };
            items.push(DispatchItem { tool_use, decision });
        }

        for event in browser_coordinator.events() {
            if let Some(cb) = &self.callbacks.on_browser_event {
                cb(event);
            }
        }

        let registry = ToolRegistry::new(self.options.tools());
        let on_start = self.callbacks.on_tool_start.clone();
        let on_end = self.callbacks.on_tool_end.clone();
        let mut dispatcher = ToolDispatcher::new(registry, self.autonomy.config().max_parallel_tools)
            .with_callbacks(DispatchCallbacks {
                on_tool_start: on_start.map(|cb| -> Box<dyn Fn(&str, &str, &Value) + Send + Sync> {
                    Box::new(move |name, id, args| cb(name, id, args))
                }),
                on_tool_end: on_end.map(|cb| -> Box<dyn Fn(&str, &str, &str) + Send + Sync> {
                    Box::new(move |name, id, result| cb(name, id, result))
                }),
            });
        if let Some(sink) = &self.learning_sink {
            dispatcher = dispatcher.with_learning_sink(sink.clone());
        }

        let results = dispatcher.dispatch(items, &self.cancelled).await?;

        let mut checkpoint_due = false;
        for result in &results {
            let was_error = result.content.starts_with("Error:");
            self.supervisor_state.record_tool_result(was_error);
            self.conversation.push(Message::new(
                MessageRole::Tool,
                vec![ContentBlock::ToolResult(ToolResultBlock::new(
                    result.tool_use_id.clone(),
                    Value::String(result.content.clone()),
                ))],
            ));
            if ToolDispatcher::requires_recovery_checkpoint(&result.tool_name) {
                checkpoint_due = true;
            }
        }

        let before_count = self.tool_call_count;
        self.autonomy.record_tool_calls(results.len() as u32);
        self.tool_call_count = self.autonomy.tool_call_count();

        let crossed_periodic_checkpoint = self.tool_call_count / self.recovery_checkpoint_every
            > before_count / self.recovery_checkpoint_every;

        // spec §4.8 point 4: only outside sub-agent mode, only with checkpoints
        // enabled (a sink configured), and only when the working directory is
        // a versioned repo.
        let checkpoints_eligible = self.actor != Actor::SubAgent
            && self.recovery_sink.is_some()
            && self.is_versioned_repo();
        if checkpoints_eligible && (checkpoint_due || crossed_periodic_checkpoint) {
            if let Some(sink) = &self.recovery_sink {
                self.checkpoint_count += 1;
                sink.save(&self.session_id, self.checkpoint_count, self.conversation.messages());
            }
        }

        match self.autonomy.evaluate_breaker() {
            BreakerOutcome::Continue => {}
            BreakerOutcome::WarnOnce => {
                self.conversation.push(Message::system(
                    "Tool-call volume is approaching this session's autonomy threshold."
                        .to_string(),
                ));
            }
            BreakerOutcome::Paused => return Ok(ControlFlow::Break(CompletionStatus::Paused)),
            BreakerOutcome::HardStop => return Ok(ControlFlow::Break(CompletionStatus::HardStop)),
            BreakerOutcome::RuntimeBudgetReached => {
                return Ok(ControlFlow::Break(CompletionStatus::RuntimeBudgetReached));
            }
        }

        self.advance_stage();
        Ok(ControlFlow::Continue(()))
    }
}
