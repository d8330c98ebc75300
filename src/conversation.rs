//! Conversation Store & Compactor: owns the growing message history for a
//! session, masks stale tool-result payloads out of the live prompt, and
//! compacts the history via a model-generated summary once it approaches the
//! context window.
//!
//! Builds directly on [`crate::context::estimate_tokens`]/[`truncate_messages`]
//! rather than re-deriving token accounting; this module adds the two things
//! those free functions don't do on their own: observation masking and
//! summary-based compaction.

use crate::context::estimate_tokens;
use crate::transport::{self, StreamChunk};
use crate::types::{AgentOptions, ContentBlock, Message, MessageRole, OpenAIMessage, TextBlock};
use crate::{Error, Result};
use futures::stream::StreamExt;

/// How many of the most recent tool-result messages keep their full content.
/// Anything older is masked to a short placeholder to keep prompt size down
/// without discarding the message's position in the conversation.
const DEFAULT_UNMASKED_TOOL_RESULTS: usize = 4;

const MASK_PLACEHOLDER: &str = "[older tool output omitted]";

/// Marker wrapping a compaction summary so a later compaction run can tell a
/// summary message apart from ordinary conversation content.
const SUMMARY_PREFIX: &str = "[conversation summary]\n";

/// Owns conversation history and the compaction/masking policy applied to it
/// before each turn is sent to the model.
pub struct ConversationStore {
    messages: Vec<Message>,
    token_limit: usize,
    compaction_margin: f32,
    recent_count: usize,
    unmasked_tool_results: usize,
}

impl ConversationStore {
    pub fn new(token_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            token_limit,
            compaction_margin: 0.9,
            recent_count: 10,
            unmasked_tool_results: DEFAULT_UNMASKED_TOOL_RESULTS,
        }
    }

    pub fn with_recent_count(mut self, recent_count: usize) -> Self {
        self.recent_count = recent_count;
        self
    }

    pub fn with_compaction_margin(mut self, compaction_margin: f32) -> Self {
        self.compaction_margin = compaction_margin;
        self
    }

    pub fn with_unmasked_tool_results(mut self, count: usize) -> Self {
        self.unmasked_tool_results = count;
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.messages)
    }

    pub fn is_approaching_limit(&self) -> bool {
        crate::context::is_approaching_limit(&self.messages, self.token_limit, self.compaction_margin)
    }

    /// Returns a copy of the history with tool-result content older than the
    /// most recent `unmasked_tool_results` replaced by a short placeholder.
    /// The stored history itself is untouched; masking only affects what gets
    /// sent for the next model call.
    pub fn masked_view(&self) -> Vec<Message> {
        let tool_result_indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult(_)))
            })
            .map(|(i, _)| i)
            .collect();

        if tool_result_indices.len() <= self.unmasked_tool_results {
            return self.messages.clone();
        }

        let cutoff = tool_result_indices.len() - self.unmasked_tool_results;
        let masked_indices: std::collections::HashSet<usize> =
            tool_result_indices[..cutoff].iter().copied().collect();

        self.messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if masked_indices.contains(&i) {
                    mask_message(m)
                } else {
                    m.clone()
                }
            })
            .collect()
    }

    /// Compacts history in place: preserves the system message (if any) and
    /// the most recent `recent_count` messages, and replaces everything in
    /// between with a single model-generated summary message. Compaction
    /// failures are non-fatal: the error is returned but history is left
    /// untouched so the caller can proceed with the uncompacted (if oversized)
    /// history rather than losing the turn entirely.
    pub async fn compact(
        &mut self,
        http_client: &reqwest::Client,
        options: &AgentOptions,
    ) -> Result<()> {
        let has_system = self
            .messages
            .first()
            .map(|m| m.role == MessageRole::System)
            .unwrap_or(false);
        let head = if has_system { 1 } else { 0 };

        if self.messages.len() <= head + self.recent_count {
            return Ok(());
        }

        let middle_start = head;
        let middle_end = self.messages.len() - self.recent_count;
        if middle_end <= middle_start {
            return Ok(());
        }

        let middle = &self.messages[middle_start..middle_end];
        let summary = summarize_messages(http_client, options, middle)
            .await
            .map_err(|e| Error::compaction(e.to_string()))?;

        let summary_message = Message::system(format!("{SUMMARY_PREFIX}{summary}"));

        let mut compacted = Vec::with_capacity(head + 1 + self.recent_count);
        if has_system {
            compacted.push(self.messages[0].clone());
        }
        compacted.push(summary_message);
        compacted.extend_from_slice(&self.messages[middle_end..]);

        self.messages = compacted;
        Ok(())
    }
}

fn mask_message(message: &Message) -> Message {
    let content = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult(result) => {
                let mut masked = result.clone();
                masked.content = serde_json::json!(MASK_PLACEHOLDER);
                ContentBlock::ToolResult(masked)
            }
            other => other.clone(),
        })
        .collect();
    Message::new(message.role.clone(), content)
}

/// Asks the model for a short summary of a message slice, bounding the
/// summary's own length so compaction cannot itself blow the context budget
/// it's trying to reclaim.
async fn summarize_messages(
    http_client: &reqwest::Client,
    options: &AgentOptions,
    messages: &[Message],
) -> Result<String> {
    const MAX_SUMMARY_TOKENS: u32 = 512;

    let transcript = messages
        .iter()
        .map(render_message_for_summary)
        .collect::<Vec<_>>()
        .join("\n");

    let request_messages = vec![
        OpenAIMessage {
            role: "system".to_string(),
            content: Some(crate::types::OpenAIContent::Text(
                "Summarize the following conversation segment in a few sentences, \
                 preserving any decisions, file paths, or open issues that later turns \
                 will need."
                    .to_string(),
            )),
            tool_calls: None,
            tool_call_id: None,
        },
        OpenAIMessage {
            role: "user".to_string(),
            content: Some(crate::types::OpenAIContent::Text(transcript)),
            tool_calls: None,
            tool_call_id: None,
        },
    ];

    let mut bounded_options = options.clone();
    bounded_options = bounded_options_with_max_tokens(bounded_options, MAX_SUMMARY_TOKENS);

    let mut stream = transport::open_unary_stream(http_client, &bounded_options, request_messages).await?;
    let mut summary = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk: StreamChunk = chunk?;
        if let Some(content) = chunk.content {
            summary.push_str(&content);
        }
    }

    if summary.trim().is_empty() {
        return Err(Error::compaction("model returned an empty summary"));
    }

    Ok(summary)
}

/// `AgentOptions` carries `max_tokens` privately behind its builder; for the
/// bounded summary call we re-derive an options value via the public builder
/// surface rather than reaching into private fields.
fn bounded_options_with_max_tokens(options: AgentOptions, max_tokens: u32) -> AgentOptions {
    AgentOptions::builder()
        .model(options.model())
        .base_url(options.base_url())
        .api_key(options.api_key())
        .max_tokens(max_tokens)
        .temperature(0.2)
        .timeout(options.timeout())
        .build()
        .unwrap_or(options)
}

fn render_message_for_summary(message: &Message) -> String {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };
    let text: String = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text(TextBlock { text }) => text.clone(),
            ContentBlock::Image(_) => "[image]".to_string(),
            ContentBlock::ToolUse(tool) => format!("[called {}]", tool.name),
            ContentBlock::ToolResult(result) => format!("[tool result: {}]", result.content),
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("{role}: {text}")
}
