//! Chunk collection: separates visible text from hidden "thinking" spans and
//! accumulates tool-call fragments into complete content blocks.
//!
//! This is a generalization of the aggregation logic in [`crate::utils::ToolCallAggregator`]
//! to the normalized [`crate::transport::StreamChunk`] shape, so the same collector works
//! whether chunks arrived over the unary or duplex transport.

use crate::transport::{StreamChunk, Usage};
use crate::types::{ContentBlock, TextBlock, ToolUseBlock};
use crate::{Error, Result};
use std::collections::HashMap;

/// Delimiters marking a hidden "thinking" span inside otherwise visible text.
/// Text between a paired open/close marker is withheld from `visible_text` and
/// routed to `on_thinking` instead.
const THINK_OPEN: &str = "<thinking>";
const THINK_CLOSE: &str = "</thinking>";

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Final product of a collected streaming turn.
#[derive(Debug, Clone, Default)]
pub struct CollectedTurn {
    /// Visible text content, thinking spans removed.
    pub visible_text: String,
    /// Completed tool-use blocks, in the order their index was first seen.
    pub tool_calls: Vec<ToolUseBlock>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl CollectedTurn {
    /// Content blocks as they'd appear on an assistant [`crate::types::Message`]:
    /// the visible text (if non-empty) followed by any tool-use blocks.
    pub fn into_content_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.visible_text.is_empty() {
            blocks.push(ContentBlock::Text(TextBlock::new(self.visible_text)));
        }
        blocks.extend(self.tool_calls.into_iter().map(ContentBlock::ToolUse));
        blocks
    }
}

/// Strips control characters (other than `\n` and `\t`) that have no business
/// appearing in text meant for a terminal or chat UI.
fn sanitize_control_sequences(text: &str) -> String {
    text.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

/// Stateful collector for one streaming turn. Construct a fresh instance per turn.
pub struct ChunkCollector {
    text_buffer: String,
    thinking_buffer: String,
    in_thinking: bool,
    tool_calls: HashMap<u32, PartialToolCall>,
    tool_order: Vec<u32>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    on_thinking: Option<Box<dyn FnMut(&str) + Send>>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self {
            text_buffer: String::new(),
            thinking_buffer: String::new(),
            in_thinking: false,
            tool_calls: HashMap::new(),
            tool_order: Vec::new(),
            usage: None,
            finish_reason: None,
            on_thinking: None,
        }
    }

    /// Register a callback invoked with each flushed thinking span (called
    /// immediately as spans close, and once more at `finish()` for any
    /// span left unterminated by the stream).
    pub fn with_thinking_sink(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_thinking = Some(Box::new(sink));
        self
    }

    /// Feed one normalized chunk. Content is split between visible text and
    /// thinking spans as it arrives; tool-call deltas are accumulated by index.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<()> {
        if let Some(content) = chunk.content {
            self.absorb_text(&content);
        }

        for delta in chunk.tool_calls {
            let entry = self.tool_calls.entry(delta.index).or_insert_with(|| {
                self.tool_order.push(delta.index);
                PartialToolCall::default()
            });
            if let Some(id) = delta.id {
                entry.id = Some(id);
            }
            if let Some(name) = delta.name {
                entry.name = Some(name);
            }
            if let Some(args) = delta.arguments {
                entry.arguments.push_str(&args);
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }

        Ok(())
    }

    /// Absorb a raw text delta, routing spans delimited by `<thinking>`/`</thinking>`
    /// to the thinking sink and everything else to the visible buffer. Handles
    /// delimiters split across chunk boundaries by matching against the whole
    /// accumulated tail rather than per-delta.
    fn absorb_text(&mut self, delta: &str) {
        let mut rest = delta;
        loop {
            if self.in_thinking {
                match rest.find(THINK_CLOSE) {
                    Some(pos) => {
                        self.thinking_buffer.push_str(&rest[..pos]);
                        self.flush_thinking();
                        self.in_thinking = false;
                        rest = &rest[pos + THINK_CLOSE.len()..];
                    }
                    None => {
                        self.thinking_buffer.push_str(rest);
                        return;
                    }
                }
            } else {
                match rest.find(THINK_OPEN) {
                    Some(pos) => {
                        self.text_buffer.push_str(&rest[..pos]);
                        self.in_thinking = true;
                        rest = &rest[pos + THINK_OPEN.len()..];
                    }
                    None => {
                        self.text_buffer.push_str(rest);
                        return;
                    }
                }
            }
        }
    }

    fn flush_thinking(&mut self) {
        if self.thinking_buffer.is_empty() {
            return;
        }
        if let Some(sink) = self.on_thinking.as_mut() {
            sink(&self.thinking_buffer);
        }
        self.thinking_buffer.clear();
    }

    /// Seal the collector once the stream has ended, returning the visible text,
    /// completed tool calls, usage, and finish reason. Any unterminated thinking
    /// span is flushed through the sink rather than silently dropped.
    pub fn finish(mut self) -> Result<CollectedTurn> {
        self.flush_thinking();

        let mut tool_calls = Vec::new();
        for index in self.tool_order {
            let Some(partial) = self.tool_calls.remove(&index) else {
                continue;
            };
            let (Some(id), Some(name)) = (partial.id, partial.name) else {
                continue;
            };
            let input: serde_json::Value = if partial.arguments.is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    Error::stream(format!("Failed to parse tool arguments: {}", e))
                })?
            };
            tool_calls.push(ToolUseBlock::new(id, name, input));
        }

        Ok(CollectedTurn {
            visible_text: sanitize_control_sequences(&self.text_buffer),
            tool_calls,
            usage: self.usage,
            finish_reason: self.finish_reason,
        })
    }
}

impl Default for ChunkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ToolCallDelta;

    #[test]
    fn collects_plain_text() {
        let mut collector = ChunkCollector::new();
        collector
            .push(StreamChunk {
                content: Some("Hello, ".to_string()),
                ..Default::default()
            })
            .unwrap();
        collector
            .push(StreamChunk {
                content: Some("world.".to_string()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            })
            .unwrap();

        let turn = collector.finish().unwrap();
        assert_eq!(turn.visible_text, "Hello, world.");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn splits_thinking_span_from_visible_text() {
        let mut seen_thoughts = Vec::new();
        let mut collector = ChunkCollector::new().with_thinking_sink(move |_t| {
            seen_thoughts.push(());
        });
        collector
            .push(StreamChunk {
                content: Some("Before <thinking>plan the steps</thinking> after.".to_string()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            })
            .unwrap();

        let turn = collector.finish().unwrap();
        assert_eq!(turn.visible_text, "Before  after.");
    }

    #[test]
    fn thinking_markers_split_across_chunks() {
        let mut collector = ChunkCollector::new();
        collector
            .push(StreamChunk {
                content: Some("visible <think".to_string()),
                ..Default::default()
            })
            .unwrap();
        collector
            .push(StreamChunk {
                content: Some("ing>hidden</thinking> tail".to_string()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            })
            .unwrap();

        let turn = collector.finish().unwrap();
        assert_eq!(turn.visible_text, "visible  tail");
    }

    #[test]
    fn accumulates_interleaved_tool_calls_by_index() {
        let mut collector = ChunkCollector::new();
        collector
            .push(StreamChunk {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("search".to_string()),
                    arguments: Some("{\"q\"".to_string()),
                }],
                ..Default::default()
            })
            .unwrap();
        collector
            .push(StreamChunk {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments: Some(":\"rust\"}".to_string()),
                }],
                finish_reason: Some("tool_calls".to_string()),
                ..Default::default()
            })
            .unwrap();

        let turn = collector.finish().unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "search");
        assert_eq!(turn.tool_calls[0].input["q"], "rust");
    }

    #[test]
    fn sanitizes_control_sequences() {
        let mut collector = ChunkCollector::new();
        collector
            .push(StreamChunk {
                content: Some("safe\u{0007}bell\u{001B}esc".to_string()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            })
            .unwrap();
        let turn = collector.finish().unwrap();
        assert_eq!(turn.visible_text, "safebellesc");
    }
}
