//! Tests for debug logging functionality
//!
//! Tests that debug logs are emitted when images are serialized.

use opta_agent_core::{ContentBlock, ImageBlock, ImageDetail, Message, MessageRole, TextBlock};

#[test]
fn test_image_logging_with_debug_enabled() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();

    let msg = Message::new(
        MessageRole::User,
        vec![
            ContentBlock::Text(TextBlock::new("What's in this image?")),
            ContentBlock::Image(
                ImageBlock::from_url("https://example.com/test.jpg")
                    .unwrap()
                    .with_detail(ImageDetail::High),
            ),
        ],
    );

    assert_eq!(msg.content.len(), 2);
}

#[test]
fn test_image_logging_truncates_long_urls() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();

    let long_base64 = "A".repeat(200);
    let img = ImageBlock::from_base64(&long_base64, "image/png").unwrap();

    let msg = Message::new(MessageRole::User, vec![ContentBlock::Image(img)]);

    // The URL should be >100 chars, so the transport layer truncates it in logs.
    assert_eq!(msg.content.len(), 1);
}

#[test]
fn test_image_logging_includes_detail_level() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();

    let messages = vec![
        Message::new(
            MessageRole::User,
            vec![ContentBlock::Image(
                ImageBlock::from_url("https://example.com/low.jpg")
                    .unwrap()
                    .with_detail(ImageDetail::Low),
            )],
        ),
        Message::new(
            MessageRole::User,
            vec![ContentBlock::Image(
                ImageBlock::from_url("https://example.com/high.jpg")
                    .unwrap()
                    .with_detail(ImageDetail::High),
            )],
        ),
        Message::new(
            MessageRole::User,
            vec![ContentBlock::Image(
                ImageBlock::from_url("https://example.com/auto.jpg")
                    .unwrap()
                    .with_detail(ImageDetail::Auto),
            )],
        ),
    ];

    assert_eq!(messages.len(), 3);
}

#[test]
fn test_no_warning_for_image_only_messages() {
    // Image-only messages are a valid use case for vision models and should
    // not trigger warnings.
    let image = ImageBlock::from_url("https://example.com/test.jpg")
        .unwrap()
        .with_detail(ImageDetail::High);

    let msg = Message::new(
        MessageRole::User,
        vec![
            ContentBlock::Image(image.clone()),
            ContentBlock::Image(image),
        ],
    );

    assert_eq!(msg.content.len(), 2);
    assert!(matches!(msg.content[0], ContentBlock::Image(_)));
    assert!(matches!(msg.content[1], ContentBlock::Image(_)));
}
