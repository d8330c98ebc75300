//! Recoverable Stream Pipeline: wraps the transport adapter with retry-on-open
//! and mid-stream reconnect-with-dedup, so a caller downstream never sees a
//! transport fault unless every recovery avenue has been exhausted, and never
//! sees duplicated content when a reconnect does succeed.

use crate::retry::{RetryConfig, is_retryable_error};
use crate::transport::{self, ChunkStream, StreamChunk, TransportKind};
use crate::types::{AgentOptions, OpenAIMessage};
use crate::{Error, Result};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

/// Tracks content already yielded for one in-flight turn so a reconnected
/// stream's replayed prefix can be trimmed before it reaches the caller.
#[derive(Debug, Default)]
struct RecoveryState {
    emitted_content: String,
    emitted_tool_args: HashMap<u32, String>,
}

impl RecoveryState {
    /// Trims a freshly-recovered chunk against what has already been emitted.
    /// Returns `None` when the whole chunk is a pure repeat of history (content
    /// and every tool-call argument fragment already accounted for, no new
    /// finish reason or usage) and should be dropped rather than re-yielded.
    fn dedup(&mut self, mut chunk: StreamChunk) -> Option<StreamChunk> {
        if let Some(content) = chunk.content.take() {
            if let Some(remainder) = trim_against_prefix(&self.emitted_content, &content) {
                if !remainder.is_empty() {
                    self.emitted_content.push_str(&remainder);
                    chunk.content = Some(remainder);
                }
            } else {
                // Divergence from the expected prefix: trust the server and pass
                // the fragment through untrimmed rather than silently losing data.
                self.emitted_content.push_str(&content);
                chunk.content = Some(content);
            }
        }

        chunk.tool_calls.retain_mut(|delta| {
            let Some(args) = delta.arguments.take() else {
                return true;
            };
            let seen = self.emitted_tool_args.entry(delta.index).or_default();
            match trim_against_prefix(seen, &args) {
                Some(remainder) => {
                    if remainder.is_empty() {
                        false
                    } else {
                        seen.push_str(&remainder);
                        delta.arguments = Some(remainder);
                        true
                    }
                }
                None => {
                    seen.push_str(&args);
                    delta.arguments = Some(args);
                    true
                }
            }
        });

        let is_empty_repeat = chunk.content.is_none()
            && chunk.tool_calls.is_empty()
            && chunk.finish_reason.is_none()
            && chunk.usage.is_none();

        if is_empty_repeat { None } else { Some(chunk) }
    }
}

/// Given what has already been emitted (`emitted`) and a freshly-recovered
/// fragment (`incoming`), returns the part of `incoming` that is genuinely new:
///
/// - If `incoming` is a prefix of the remaining unconsumed tail of `emitted`... in
///   practice `emitted` and `incoming` are compared directly: if `incoming` is a
///   prefix of `emitted`'s tail (i.e. it repeats content already seen) the
///   already-seen part is consumed and nothing new is returned for that part.
/// - If `emitted` is a suffix-match against the start of `incoming` (the normal
///   case: the server resent everything up to the disconnect point and then
///   continued), only the unseen continuation is returned.
/// - If neither holds, the fragment has diverged from what we expected and
///   `None` is returned so the caller can decide to pass it through unchanged.
fn trim_against_prefix(emitted: &str, incoming: &str) -> Option<String> {
    if incoming.is_empty() {
        return Some(String::new());
    }
    if emitted.is_empty() {
        return Some(incoming.to_string());
    }
    if emitted.ends_with(incoming) {
        // Entirely a repeat of content we already emitted.
        return Some(String::new());
    }
    // Find the longest overlap between the tail of `emitted` and the head of
    // `incoming`: that overlap is the replayed portion, the rest is new.
    let max_overlap = incoming.len().min(emitted.len());
    for overlap in (1..=max_overlap).rev() {
        if emitted.ends_with(&incoming[..overlap]) {
            return Some(incoming[overlap..].to_string());
        }
    }
    // No overlap at all: either the very first chunk of a fresh turn (handled
    // above via emitted.is_empty()) or real divergence.
    if emitted.is_empty() {
        Some(incoming.to_string())
    } else {
        None
    }
}

/// Session-scoped sticky flag: once a duplex open attempt fails, later turns in
/// the same session skip straight to unary rather than repeatedly retrying a
/// transport the server doesn't support.
#[derive(Debug, Clone, Default)]
pub struct DuplexAvailability(Arc<AtomicBool>);

impl DuplexAvailability {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn mark_unavailable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates open-retry and mid-stream reconnect over the transport adapter.
pub struct RecoverableStreamPipeline {
    open_retry: RetryConfig,
    reconnect_retry: RetryConfig,
    duplex_availability: DuplexAvailability,
}

impl RecoverableStreamPipeline {
    pub fn new(open_retry: RetryConfig, reconnect_retry: RetryConfig, duplex_availability: DuplexAvailability) -> Self {
        Self {
            open_retry,
            reconnect_retry,
            duplex_availability,
        }
    }

    /// Opens a stream, retrying per `open_retry` on retryable [`Error::TransportOpen`]
    /// faults, preferring duplex unless the session has already marked it unavailable.
    async fn open_with_retry(
        &self,
        http_client: &reqwest::Client,
        options: &AgentOptions,
        messages: &[OpenAIMessage],
    ) -> Result<(ChunkStream, TransportKind)> {
        let prefer_duplex = self.duplex_availability.is_available();

        if prefer_duplex {
            match self
                .open_once(http_client, options, messages, TransportKind::Duplex, &self.open_retry)
                .await
            {
                Ok(stream) => return Ok((stream, TransportKind::Duplex)),
                Err(_) => {
                    self.duplex_availability.mark_unavailable();
                }
            }
        }

        let stream = self
            .open_once(http_client, options, messages, TransportKind::Unary, &self.open_retry)
            .await?;
        Ok((stream, TransportKind::Unary))
    }

    async fn open_once(
        &self,
        http_client: &reqwest::Client,
        options: &AgentOptions,
        messages: &[OpenAIMessage],
        kind: TransportKind,
        retry: &RetryConfig,
    ) -> Result<ChunkStream> {
        let mut last_err = None;
        for attempt in 0..retry.max_attempts {
            let result = match kind {
                TransportKind::Duplex => {
                    transport::open_duplex_stream(http_client, options, messages.to_vec()).await
                }
                TransportKind::Unary => {
                    transport::open_unary_stream(http_client, options, messages.to_vec()).await
                }
            };
            match result {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    let retryable = is_retryable_error(&e);
                    last_err = Some(e);
                    if !retryable || attempt + 1 >= retry.max_attempts {
                        break;
                    }
                    log::warn!(
                        "{:?} stream open attempt {} failed, retrying",
                        kind,
                        attempt + 1
                    );
                    sleep(retry.calculate_delay(attempt)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::transport_open("open failed with no error")))
    }

    /// Runs one turn to completion, collecting every normalized chunk. On a
    /// mid-stream fault, reconnects (duplex first, falling back to unary) and
    /// dedups the recovered stream's prefix against what had already been
    /// collected, so the returned vector never contains duplicated content.
    pub async fn run_turn(
        &self,
        http_client: &reqwest::Client,
        options: &AgentOptions,
        messages: &[OpenAIMessage],
        cancelled: &AtomicBool,
    ) -> Result<Vec<StreamChunk>> {
        let (mut stream, mut kind) = self.open_with_retry(http_client, options, messages).await?;
        let mut recovery = RecoveryState::default();
        let mut collected = Vec::new();

        'turn: loop {
            loop {
                if cancelled.load(Ordering::SeqCst) {
                    return Err(Error::Cancellation);
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        if let Some(trimmed) = recovery.dedup(chunk) {
                            collected.push(trimmed);
                        }
                    }
                    Some(Err(e)) if matches!(e, Error::TransportMid(_)) => {
                        if cancelled.load(Ordering::SeqCst) {
                            return Err(Error::Cancellation);
                        }
                        log::warn!("stream failed mid-flight via {:?}, reconnecting: {}", kind, e);
                        let (new_stream, new_kind) =
                            self.reconnect(http_client, options, messages).await?;
                        stream = new_stream;
                        kind = new_kind;
                        continue 'turn;
                    }
                    Some(Err(e)) => return Err(e),
                    None => break 'turn,
                }
            }
        }

        Ok(collected)
    }

    async fn reconnect(
        &self,
        http_client: &reqwest::Client,
        options: &AgentOptions,
        messages: &[OpenAIMessage],
    ) -> Result<(ChunkStream, TransportKind)> {
        if self.duplex_availability.is_available() {
            if let Ok(stream) = self
                .open_once(
                    http_client,
                    options,
                    messages,
                    TransportKind::Duplex,
                    &self.reconnect_retry,
                )
                .await
            {
                return Ok((stream, TransportKind::Duplex));
            }
            self.duplex_availability.mark_unavailable();
        }

        let stream = self
            .open_once(
                http_client,
                options,
                messages,
                TransportKind::Unary,
                &self.reconnect_retry,
            )
            .await?;
        Ok((stream, TransportKind::Unary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ToolCallDelta;

    #[test]
    fn trim_detects_full_repeat() {
        let mut state = RecoveryState::default();
        state.emitted_content = "Hello, world".to_string();
        let chunk = StreamChunk {
            content: Some("Hello, world".to_string()),
            ..Default::default()
        };
        let trimmed = state.dedup(chunk);
        assert!(trimmed.is_none());
    }

    #[test]
    fn trim_extracts_continuation_only() {
        let mut state = RecoveryState::default();
        state.emitted_content = "Hello, ".to_string();
        let chunk = StreamChunk {
            content: Some("Hello, world".to_string()),
            ..Default::default()
        };
        let trimmed = state.dedup(chunk).unwrap();
        assert_eq!(trimmed.content.as_deref(), Some("world"));
        assert_eq!(state.emitted_content, "Hello, world");
    }

    #[test]
    fn trim_passes_through_on_divergence() {
        let mut state = RecoveryState::default();
        state.emitted_content = "Hello".to_string();
        let chunk = StreamChunk {
            content: Some("Goodbye".to_string()),
            ..Default::default()
        };
        let trimmed = state.dedup(chunk).unwrap();
        assert_eq!(trimmed.content.as_deref(), Some("Goodbye"));
    }

    #[test]
    fn dedups_tool_call_arguments_per_index() {
        let mut state = RecoveryState::default();
        state
            .emitted_tool_args
            .insert(0, "{\"q\":\"ru".to_string());
        let chunk = StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: Some("{\"q\":\"rust\"}".to_string()),
            }],
            ..Default::default()
        };
        let trimmed = state.dedup(chunk).unwrap();
        assert_eq!(trimmed.tool_calls[0].arguments.as_deref(), Some("st\"}"));
    }

    #[test]
    fn duplex_availability_starts_true_and_sticks_false() {
        let flag = DuplexAvailability::new();
        assert!(flag.is_available());
        flag.mark_unavailable();
        assert!(!flag.is_available());
    }
}
