//! Transport Stream Adapter: opens a chat-completion stream against a local
//! OpenAI-compatible server and normalizes it into a single [`StreamChunk`] shape,
//! regardless of which wire transport delivered it.
//!
//! Two transports are supported, mirroring the two ways a local inference server
//! can stream a response:
//!
//! - [`UnaryTransport`]: a single HTTP request, response delivered as Server-Sent
//!   Events. This is the well-trodden path, built directly on the teacher SDK's
//!   SSE parser ([`crate::utils::parse_sse_stream`]).
//! - [`DuplexTransport`]: a streamed request body paired with a streamed response
//!   body over the same connection, so a client-initiated cancel (closing the
//!   request body) can be observed by the server mid-generation. Not every local
//!   server implements this; callers fall back to unary when it fails to open
//!   (see [`crate::pipeline`]).

use crate::types::{AgentOptions, OpenAIChunk, OpenAIMessage, OpenAIRequest, OpenAIStreamOptions, OpenAIUsage};
use crate::utils::parse_sse_stream;
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// One tool-call argument/identity fragment, indexed by its position in the
/// model's tool_calls array for this turn.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Usage counters reported on the terminal chunk of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A single normalized chunk, the common currency both transports emit.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl From<OpenAIUsage> for Usage {
    fn from(u: OpenAIUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

impl From<OpenAIChunk> for Vec<StreamChunk> {
    fn from(chunk: OpenAIChunk) -> Self {
        let usage: Option<Usage> = chunk.usage.map(Into::into);

        // Providers that send the terminal usage record with an empty
        // `choices` array would otherwise vanish here; surface it as its
        // own chunk so the collector still sees exactly one usage record.
        if chunk.choices.is_empty() {
            return match usage {
                Some(usage) => vec![StreamChunk {
                    usage: Some(usage),
                    ..Default::default()
                }],
                None => vec![],
            };
        }

        let last_index = chunk.choices.len() - 1;
        chunk
            .choices
            .into_iter()
            .enumerate()
            .map(|(i, choice)| StreamChunk {
                content: choice.delta.content,
                tool_calls: choice
                    .delta
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|d| ToolCallDelta {
                        index: d.index,
                        id: d.id,
                        name: d.function.as_ref().and_then(|f| f.name.clone()),
                        arguments: d.function.and_then(|f| f.arguments),
                    })
                    .collect(),
                finish_reason: choice.finish_reason,
                usage: if i == last_index { usage } else { None },
            })
            .collect()
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Which wire transport opened a stream; threaded through for logging and for
/// the session's sticky `duplexUnavailable` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Duplex,
    Unary,
}

fn build_request(options: &AgentOptions, messages: Vec<OpenAIMessage>) -> OpenAIRequest {
    let tools = if !options.tools().is_empty() {
        Some(options.tools().iter().map(|t| t.to_openai_format()).collect())
    } else {
        None
    };

    OpenAIRequest {
        model: options.model().to_string(),
        messages,
        stream: true,
        max_tokens: options.max_tokens(),
        temperature: Some(options.temperature()),
        tools,
        stream_options: OpenAIStreamOptions { include_usage: true },
    }
}

async fn post_stream(
    http_client: &reqwest::Client,
    options: &AgentOptions,
    request: OpenAIRequest,
) -> Result<reqwest::Response> {
    let url = format!("{}/chat/completions", options.base_url());
    let response = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", options.api_key()))
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| Error::transport_open(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let msg = format!("API error {}: {}", status, body);
        return if status.as_u16() >= 500 {
            Err(Error::transport_open(msg))
        } else {
            Err(Error::api(msg))
        };
    }

    Ok(response)
}

fn flatten_openai_stream(
    sse_stream: Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>>,
) -> ChunkStream {
    let flattened = sse_stream.flat_map(|chunk_result| {
        let items: Vec<Result<StreamChunk>> = match chunk_result {
            Ok(chunk) => {
                let normalized: Vec<StreamChunk> = chunk.into();
                normalized.into_iter().map(Ok).collect()
            }
            Err(e) => vec![Err(map_mid_stream_error(e))],
        };
        futures::stream::iter(items)
    });
    Box::pin(flattened)
}

/// Any error surfacing after the response has started streaming is a mid-stream
/// fault rather than an open fault, so the recoverable pipeline reconnects
/// instead of treating it as a fresh connection attempt.
fn map_mid_stream_error(err: Error) -> Error {
    match err {
        Error::Http(e) => Error::transport_mid(e.to_string()),
        Error::Stream(msg) => Error::transport_mid(msg),
        other => other,
    }
}

/// Opens a unary (SSE) chat-completion stream, starting from a pre-built
/// message list (the caller owns history assembly and, e.g., system-prompt
/// injection — see [`crate::conversation`]).
pub async fn open_unary_stream(
    http_client: &reqwest::Client,
    options: &AgentOptions,
    messages: Vec<OpenAIMessage>,
) -> Result<ChunkStream> {
    let request = build_request(options, messages);
    let response = post_stream(http_client, options, request).await?;
    let sse_stream = parse_sse_stream(response);
    Ok(flatten_openai_stream(sse_stream))
}

/// Opens a duplex chat-completion stream: the request body is itself a stream
/// so the connection can be torn down from the client side (signalling
/// cancellation to a server that honors early body closure) without waiting
/// for a full response. Falls back to the same SSE response parsing as the
/// unary path once the response starts arriving, since both transports speak
/// the same chunked JSON-lines wire format on this class of server.
///
/// Open failures here are expected to be more common than on the unary path —
/// not every local server supports a streamed request body — which is what
/// drives the sticky `transport.duplexUnavailable` behavior in
/// [`crate::pipeline::RecoverableStreamPipeline`].
pub async fn open_duplex_stream(
    http_client: &reqwest::Client,
    options: &AgentOptions,
    messages: Vec<OpenAIMessage>,
) -> Result<ChunkStream> {
    let request = build_request(options, messages);
    let body_json = serde_json::to_vec(&request)
        .map_err(|e| Error::transport_open(format!("failed to encode duplex request: {}", e)))?;

    let url = format!("{}/chat/completions", options.base_url());
    let body_stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body_json) });

    let response = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", options.api_key()))
        .header("Content-Type", "application/json")
        .header("X-Opta-Transport", "duplex")
        .body(reqwest::Body::wrap_stream(body_stream))
        .send()
        .await
        .map_err(|e| Error::transport_open(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        // A duplex-unsupporting server typically answers with 404/400/501 on the
        // streamed-body path; treat all non-2xx here as an open failure so the
        // pipeline falls back to unary rather than retrying duplex.
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(Error::transport_open(format!(
            "duplex open failed ({}): {}",
            status, body
        )));
    }

    let sse_stream = parse_sse_stream(response);
    Ok(flatten_openai_stream(sse_stream))
}

/// Builds a plain (non-streaming) HTTP client with the session's configured timeout.
/// Shared by transport open and the supervisor's synchronous completions.
pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(Error::Http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpenAIChoice, OpenAIDelta, OpenAIFunctionDelta, OpenAIToolCallDelta};

    #[test]
    fn normalizes_text_chunk() {
        let chunk = OpenAIChunk {
            id: "1".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            model: "m".into(),
            choices: vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: Some("hi".into()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let normalized: Vec<StreamChunk> = chunk.into();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn normalizes_tool_call_delta() {
        let chunk = OpenAIChunk {
            id: "1".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            model: "m".into(),
            choices: vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 2,
                        id: Some("call_9".into()),
                        call_type: Some("function".into()),
                        function: Some(OpenAIFunctionDelta {
                            name: Some("search".into()),
                            arguments: Some("{}".into()),
                        }),
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        };
        let normalized: Vec<StreamChunk> = chunk.into();
        assert_eq!(normalized[0].tool_calls[0].index, 2);
        assert_eq!(normalized[0].tool_calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(normalized[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn terminal_usage_chunk_with_no_choices_surfaces_usage() {
        let chunk = OpenAIChunk {
            id: "1".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            model: "m".into(),
            choices: vec![],
            usage: Some(OpenAIUsage {
                prompt_tokens: 12,
                completion_tokens: 34,
            }),
        };
        let normalized: Vec<StreamChunk> = chunk.into();
        assert_eq!(normalized.len(), 1);
        let usage = normalized[0].usage.expect("usage present");
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 34);
    }

    #[test]
    fn mid_stream_http_error_maps_to_transport_mid() {
        let err = Error::stream("connection reset");
        match map_mid_stream_error(err) {
            Error::TransportMid(_) => {}
            other => panic!("expected TransportMid, got {other:?}"),
        }
    }
}
