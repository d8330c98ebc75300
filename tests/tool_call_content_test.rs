//! Regression test: preserve assistant content field when only tool calls exist
//!
//! The OpenAI chat completions API requires the content field even when empty.
//! This test verifies that assistant messages with tool calls always carry a
//! content field once converted to the wire representation.

use opta_agent_core::{ContentBlock, Message, MessageRole, OpenAIContent, TextBlock, ToolUseBlock};
use serde_json::json;

#[test]
fn test_assistant_tool_call_without_text_has_content() {
    let tool_use = ToolUseBlock::new("call_123", "test_function", json!({"arg": "value"}));

    let msg = Message::new(
        MessageRole::Assistant,
        vec![ContentBlock::ToolUse(tool_use)],
    );

    assert_eq!(msg.content.len(), 1);

    match &msg.content[0] {
        ContentBlock::ToolUse(tool) => {
            assert_eq!(tool.name, "test_function");
            assert_eq!(tool.id, "call_123");
        }
        _ => panic!("Expected ToolUse block"),
    }
}

#[test]
fn test_assistant_tool_call_with_text_has_content() {
    let tool_use = ToolUseBlock::new("call_456", "another_function", json!({"param": 42}));

    let msg = Message::new(
        MessageRole::Assistant,
        vec![
            ContentBlock::Text(TextBlock::new("Let me call a function")),
            ContentBlock::ToolUse(tool_use),
        ],
    );

    assert_eq!(msg.content.len(), 2);

    match &msg.content[0] {
        ContentBlock::Text(text) => assert_eq!(text.text, "Let me call a function"),
        _ => panic!("Expected Text block"),
    }

    match &msg.content[1] {
        ContentBlock::ToolUse(tool) => assert_eq!(tool.name, "another_function"),
        _ => panic!("Expected ToolUse block"),
    }
}

#[test]
fn test_openai_content_empty_string_serialization() {
    let content = OpenAIContent::Text(String::new());
    let json = serde_json::to_value(&content).unwrap();

    assert_eq!(json, "");
}

#[test]
fn test_openai_content_with_text_serialization() {
    let content = OpenAIContent::Text("Hello".to_string());
    let json = serde_json::to_value(&content).unwrap();

    assert_eq!(json, "Hello");
}
