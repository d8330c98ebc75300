//! Supervisor ("Atpo"): watches per-turn consecutive tool errors and
//! cumulative tool-call volume, and when either crosses its threshold,
//! invokes a secondary model to diagnose loops or hallucinations and propose
//! a correction, per §4.10.

use crate::transport::{self, StreamChunk};
use crate::types::{AgentOptions, Message, OpenAIContent, OpenAIMessage};
use crate::{Error, Result};
use futures::stream::StreamExt;

/// Marker wrapping a correction paragraph so the core can tell a genuine
/// supervisor correction apart from an ordinary secondary-model response.
const CORRECTION_MARKER_OPEN: &str = "[atpo-correction]";
const CORRECTION_MARKER_CLOSE: &str = "[/atpo-correction]";

const MAX_OUTPUT_TOKENS: u32 = 500;
const SUPERVISOR_TEMPERATURE: f32 = 0.1;

/// Configurable thresholds that trigger a supervisor pass.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorThresholds {
    pub consecutive_tool_errors: u32,
    pub cumulative_tool_calls: u32,
}

impl Default for SupervisorThresholds {
    fn default() -> Self {
        Self {
            consecutive_tool_errors: 3,
            cumulative_tool_calls: 25,
        }
    }
}

/// Tracks the counters the supervisor watches across turns.
#[derive(Debug, Default)]
pub struct SupervisorState {
    consecutive_tool_errors: u32,
    cumulative_tool_calls: u32,
}

impl SupervisorState {
    pub fn record_tool_result(&mut self, was_error: bool) {
        self.cumulative_tool_calls += 1;
        if was_error {
            self.consecutive_tool_errors += 1;
        } else {
            self.consecutive_tool_errors = 0;
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_tool_errors = 0;
        self.cumulative_tool_calls = 0;
    }

    fn crosses(&self, thresholds: &SupervisorThresholds) -> bool {
        self.consecutive_tool_errors >= thresholds.consecutive_tool_errors
            || self.cumulative_tool_calls >= thresholds.cumulative_tool_calls
    }
}

/// Invokes the secondary model when thresholds are crossed. Supervisor
/// failures are non-fatal: callers should treat an `Err` as "did not
/// intervene this turn" rather than propagating it to the user.
pub struct Supervisor {
    thresholds: SupervisorThresholds,
    options: AgentOptions,
}

impl Supervisor {
    pub fn new(options: AgentOptions, thresholds: SupervisorThresholds) -> Self {
        Self { options, thresholds }
    }

    /// Checks the state against configured thresholds and, if crossed, asks
    /// the secondary model to diagnose the last five messages. Returns
    /// `Some(correction)` only when the model's response contains the
    /// recognizable correction marker; the counters are reset whenever a
    /// check actually fires (successful or not), matching §4.10's "resets the
    /// counters" behavior tied to invocation, not to a successful correction.
    pub async fn maybe_intervene(
        &self,
        http_client: &reqwest::Client,
        state: &mut SupervisorState,
        recent_messages: &[Message],
    ) -> Result<Option<String>> {
        if !state.crosses(&self.thresholds) {
            return Ok(None);
        }

        let last_five: Vec<&Message> = recent_messages.iter().rev().take(5).rev().collect();
        let result = self.invoke(http_client, &last_five).await;
        state.reset();
        result
    }

    async fn invoke(
        &self,
        http_client: &reqwest::Client,
        recent_messages: &[&Message],
    ) -> Result<Option<String>> {
        let transcript = recent_messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, render_text(m)))
            .collect::<Vec<_>>()
            .join("\n");

        let directive = format!(
            "The primary agent may be stuck in a loop or hallucinating tool results. \
             Review the last few turns below. If you find a clear problem, respond with a \
             single corrective paragraph wrapped exactly in {CORRECTION_MARKER_OPEN} and \
             {CORRECTION_MARKER_CLOSE}. If nothing is wrong, respond with just \"no issue\".\n\n{transcript}"
        );

        let request_messages = vec![OpenAIMessage {
            role: "user".to_string(),
            content: Some(OpenAIContent::Text(directive)),
            tool_calls: None,
            tool_call_id: None,
        }];

        let bounded_options = AgentOptions::builder()
            .model(self.options.model())
            .base_url(self.options.base_url())
            .api_key(self.options.api_key())
            .max_tokens(MAX_OUTPUT_TOKENS)
            .temperature(SUPERVISOR_TEMPERATURE)
            .timeout(self.options.timeout())
            .build()
            .map_err(|e| Error::supervisor(e.to_string()))?;

        let mut stream = transport::open_unary_stream(http_client, &bounded_options, request_messages)
            .await
            .map_err(|e| Error::supervisor(e.to_string()))?;

        let mut response = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk: StreamChunk = chunk.map_err(|e| Error::supervisor(e.to_string()))?;
            if let Some(content) = chunk.content {
                response.push_str(&content);
            }
        }

        Ok(extract_correction(&response))
    }
}

fn render_text(message: &Message) -> String {
    message
        .content
        .iter()
        .map(|block| match block {
            crate::types::ContentBlock::Text(t) => t.text.clone(),
            crate::types::ContentBlock::Image(_) => "[image]".to_string(),
            crate::types::ContentBlock::ToolUse(tool) => format!("[called {}]", tool.name),
            crate::types::ContentBlock::ToolResult(result) => {
                format!("[tool result: {}]", result.content)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_correction(response: &str) -> Option<String> {
    let start = response.find(CORRECTION_MARKER_OPEN)? + CORRECTION_MARKER_OPEN.len();
    let end = response[start..].find(CORRECTION_MARKER_CLOSE)?;
    Some(response[start..start + end].trim().to_string())
}

/// Wraps a correction as the user-role message injected at the start of the
/// next turn, per §4.10.
pub fn correction_message(correction: &str) -> Message {
    Message::user(correction.to_string())
}
