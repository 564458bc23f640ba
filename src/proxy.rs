//! Request orchestration and the streaming adapters that feed response bodies.
//!
//! The stream adapters are pull-based: the upstream is only read when the
//! client side polls for the next frame. Dropping an adapter drops the
//! upstream handle, which releases the connection.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::config::{GatewayConfig, StreamingPolicy};
use crate::error::{GatewayError, Result};
use crate::logging::SharedLogger;
use crate::models::resolve_model;
use crate::sse::{encode_event, sse_payloads, SsePayload, DONE_FRAME};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse};
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use crate::translate::request::{anthropic_to_openai, responses_to_openai};
use crate::translate::response::{openai_to_anthropic, openai_to_responses};
use crate::translate::responses_types::{ResponseObject, ResponsesRequest};
use crate::translate::streaming::{
    message_to_stream_events, response_to_stream_events, AnthropicStreamTranslator,
    ResponsesStreamTranslator,
};
use crate::upstream::{send_chat_completions, UpstreamStream};

/// A response body of already-encoded SSE frames (or raw upstream bytes).
pub type SseBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Outcome of a translated request.
pub enum Reply<T> {
    Json(T),
    Stream(SseBody),
}

/// Outcome of a passthrough request: the upstream body, untouched.
pub struct Passthrough {
    pub content_type: String,
    pub streaming: bool,
    pub body: SseBody,
}

pub const STREAMING_DISABLED: &str = "Streaming is disabled on this gateway. Remove stream=true.";

/// How a request that may want streaming is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    Off,
    Live,
    /// Upstream is called without streaming; the result is replayed as SSE.
    Downgraded,
}

impl StreamMode {
    fn decide(requested: bool, config: &GatewayConfig) -> Result<Self> {
        match (requested, config.disable_streaming, config.streaming_policy) {
            (false, _, _) => Ok(Self::Off),
            (true, false, _) => Ok(Self::Live),
            (true, true, StreamingPolicy::Reject) => {
                Err(GatewayError::invalid_request(STREAMING_DISABLED))
            }
            (true, true, StreamingPolicy::Downgrade) => Ok(Self::Downgraded),
        }
    }

    fn upstream_streams(self) -> bool {
        self == Self::Live
    }
}

/// Serve an Anthropic Messages request.
pub async fn proxy_messages(
    req: &MessagesRequest,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<Reply<MessagesResponse>> {
    let model = resolve_model(
        req.model.as_deref(),
        &config.allowed_models,
        req.thinking.as_ref(),
    )?;
    let mode = StreamMode::decide(req.stream.unwrap_or(false), config)?;

    let mut upstream_req = anthropic_to_openai(req, &model);
    upstream_req.stream = mode.upstream_streams();

    let response = send_chat_completions(client, config, &upstream_req).await?;

    if mode == StreamMode::Live {
        logger.info("proxy", format!("streaming messages model={model}"));
        let body = anthropic_sse_stream(UpstreamStream::new(response), model);
        return Ok(Reply::Stream(Box::pin(body)));
    }

    let upstream: ChatCompletionResponse = response.json().await?;
    let message = openai_to_anthropic(&upstream, &model);
    logger.info(
        "proxy",
        format!(
            "completed messages model={} in={} out={}",
            model, message.usage.input_tokens, message.usage.output_tokens
        ),
    );

    match mode {
        StreamMode::Downgraded => Ok(Reply::Stream(Box::pin(downgraded_anthropic_stream(
            &message,
        )))),
        _ => Ok(Reply::Json(message)),
    }
}

/// Serve a Responses-style request.
pub async fn proxy_responses(
    req: &ResponsesRequest,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<Reply<ResponseObject>> {
    let model = resolve_model(req.model.as_deref(), &config.allowed_models, None)?;
    let mode = StreamMode::decide(req.stream.unwrap_or(false), config)?;

    let mut upstream_req = responses_to_openai(req, &model);
    upstream_req.stream = mode.upstream_streams();

    let response = send_chat_completions(client, config, &upstream_req).await?;

    if mode == StreamMode::Live {
        logger.info("proxy", format!("streaming responses model={model}"));
        let body = responses_sse_stream(UpstreamStream::new(response), model);
        return Ok(Reply::Stream(Box::pin(body)));
    }

    let upstream: ChatCompletionResponse = response.json().await?;
    let object = openai_to_responses(&upstream, &model);
    logger.info("proxy", format!("completed responses model={model}"));

    match mode {
        StreamMode::Downgraded => Ok(Reply::Stream(Box::pin(downgraded_responses_stream(
            &object,
        )))),
        _ => Ok(Reply::Json(object)),
    }
}

/// Forward a Chat Completions body with only `model` rewritten, and hand back
/// the upstream body unparsed.
///
/// With streaming disabled under the downgrade policy the upstream is asked for
/// a plain JSON completion, which is returned as is.
pub async fn proxy_chat_completions(
    mut body: Value,
    config: &GatewayConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<Passthrough> {
    let Some(fields) = body.as_object_mut() else {
        return Err(GatewayError::invalid_request("request body must be a JSON object"));
    };
    let model = resolve_model(
        fields.get("model").and_then(Value::as_str),
        &config.allowed_models,
        None,
    )?;
    let requested = fields.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let mode = StreamMode::decide(requested, config)?;

    fields.insert("model".to_string(), Value::String(model.clone()));
    if mode == StreamMode::Downgraded {
        fields.insert("stream".to_string(), Value::Bool(false));
    }

    let response = send_chat_completions(client, config, &body).await?;
    let streaming = mode == StreamMode::Live;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if streaming {
                "text/event-stream; charset=utf-8".to_string()
            } else {
                "application/json".to_string()
            }
        });

    logger.info(
        "proxy",
        format!("passthrough model={model} streaming={streaming}"),
    );

    Ok(Passthrough {
        content_type,
        streaming,
        body: Box::pin(passthrough_stream(UpstreamStream::new(response))),
    })
}

/// Translate an upstream Chat Completions SSE byte stream into Anthropic SSE frames.
///
/// The returned stream always ends with the full closing envelope, whether the
/// upstream sent `[DONE]`, simply closed, or failed mid-stream.
pub fn anthropic_sse_stream<S, E>(
    byte_stream: S,
    model: String,
) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut translator = AnthropicStreamTranslator::new(&model);
        let mut payloads = Box::pin(sse_payloads(byte_stream));

        while let Some(payload) = payloads.next().await {
            let SsePayload::Json(value) = payload else {
                break;
            };
            let Some(chunk) = parse_chunk(value) else {
                continue;
            };
            for event in translator.process_chunk(&chunk) {
                if let Some(frame) = encode_event(&event) {
                    yield Ok(frame);
                }
            }
        }

        // Release the upstream before writing the closing frames
        drop(payloads);

        for event in translator.finish() {
            if let Some(frame) = encode_event(&event) {
                yield Ok(frame);
            }
        }
        debug!(%model, "anthropic stream completed");
    }
}

/// Translate an upstream Chat Completions SSE byte stream into Responses-style
/// SSE frames, terminated by `data: [DONE]`.
pub fn responses_sse_stream<S, E>(
    byte_stream: S,
    model: String,
) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut translator = ResponsesStreamTranslator::new(&model);
        let mut payloads = Box::pin(sse_payloads(byte_stream));

        while let Some(payload) = payloads.next().await {
            let SsePayload::Json(value) = payload else {
                break;
            };
            let Some(chunk) = parse_chunk(value) else {
                continue;
            };
            for event in translator.process_chunk(&chunk) {
                if let Some(frame) = encode_event(&event) {
                    yield Ok(frame);
                }
            }
        }

        drop(payloads);

        for event in translator.finish() {
            if let Some(frame) = encode_event(&event) {
                yield Ok(frame);
            }
        }
        yield Ok(Bytes::from_static(DONE_FRAME));
        debug!(%model, "responses stream completed");
    }
}

/// A completed message replayed as a single-shot SSE body.
pub fn downgraded_anthropic_stream(
    message: &MessagesResponse,
) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let frames: Vec<io::Result<Bytes>> = message_to_stream_events(message)
        .iter()
        .filter_map(encode_event)
        .map(Ok)
        .collect();
    stream::iter(frames)
}

/// A completed response object replayed as a single-shot SSE body.
pub fn downgraded_responses_stream(
    object: &ResponseObject,
) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let mut frames: Vec<io::Result<Bytes>> = response_to_stream_events(object)
        .iter()
        .filter_map(encode_event)
        .map(Ok)
        .collect();
    frames.push(Ok(Bytes::from_static(DONE_FRAME)));
    stream::iter(frames)
}

/// Copy upstream bytes through unmodified.
pub fn passthrough_stream(upstream: UpstreamStream) -> impl Stream<Item = io::Result<Bytes>> + Send {
    upstream.map(|chunk| chunk.map_err(io::Error::other))
}

fn parse_chunk(value: Value) -> Option<ChatCompletionChunk> {
    match serde_json::from_value(value) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            debug!(error = %e, "skipping chunk with unexpected shape");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{ResponseContentBlock, Usage};
    use crate::translate::common::StopReason;
    use crate::translate::responses_types::ResponseStatus;

    fn byte_stream(parts: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Send {
        let items: Vec<std::result::Result<Bytes, io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(items)
    }

    fn collect_text(body: impl Stream<Item = io::Result<Bytes>>) -> String {
        let frames: Vec<io::Result<Bytes>> = tokio_test::block_on(body.collect());
        frames
            .into_iter()
            .map(|f| String::from_utf8(f.unwrap().to_vec()).unwrap())
            .collect()
    }

    fn event_names(text: &str) -> Vec<&str> {
        text.lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect()
    }

    #[test]
    fn test_anthropic_stream_frames() {
        let text = collect_text(anthropic_sse_stream(
            byte_stream(&[
                "data: {\"id\":\"chatcmpl-9\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                "data: not-json\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            "m".to_string(),
        ));

        assert_eq!(
            event_names(&text),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(text.starts_with("event: message_start\ndata: {"));
        assert!(text.contains("\"id\":\"chatcmpl-9\""));
        assert!(text.contains("\"stop_reason\":\"end_turn\""));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    }

    #[test]
    fn test_anthropic_stream_survives_upstream_failure() {
        let items: Vec<std::result::Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            )),
            Err(io::Error::other("connection reset")),
        ];
        let text = collect_text(anthropic_sse_stream(stream::iter(items), "m".to_string()));
        assert_eq!(
            event_names(&text),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(text.contains("\"stop_reason\":null"));
    }

    #[test]
    fn test_responses_stream_ends_with_done() {
        let text = collect_text(responses_sse_stream(byte_stream(&["data: [DONE]\n\n"]), "m".to_string()));
        assert_eq!(event_names(&text), ["response.created", "response.completed"]);
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn test_adapter_releases_upstream_when_dropped() {
        let upstream = UpstreamStream::from_stream(stream::pending());
        let mut body = Box::pin(anthropic_sse_stream(upstream, "m".to_string()));
        // Nothing polled yet; dropping must not hang or panic
        assert!(futures::FutureExt::now_or_never(body.next()).is_none());
        drop(body);
    }

    #[test]
    fn test_downgraded_anthropic_stream() {
        let message = MessagesResponse {
            id: "msg_1".into(),
            response_type: "message".into(),
            role: "assistant".into(),
            content: vec![ResponseContentBlock::Text { text: "hello".into() }],
            model: "m".into(),
            stop_reason: Some(StopReason::MaxTokens),
            stop_sequence: None,
            usage: Usage::default(),
        };
        let text = collect_text(downgraded_anthropic_stream(&message));
        assert_eq!(
            event_names(&text),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(text.contains("\"stop_reason\":\"max_tokens\""));
    }

    #[test]
    fn test_downgraded_responses_stream() {
        let object = ResponseObject::new("resp_1".into(), 1, "m", ResponseStatus::Completed)
            .with_text("hi");
        let text = collect_text(downgraded_responses_stream(&object));
        assert_eq!(
            event_names(&text),
            ["response.created", "response.output_text.delta", "response.completed"]
        );
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn test_passthrough_copies_bytes() {
        let items: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"raw\":")),
            Ok(Bytes::from_static(b"true}\n\n")),
        ];
        let text = collect_text(passthrough_stream(UpstreamStream::from_stream(stream::iter(items))));
        assert_eq!(text, "data: {\"raw\":true}\n\n");
    }

    #[test]
    fn test_stream_mode_decision() {
        let mut config = GatewayConfig::default();
        assert_eq!(StreamMode::decide(false, &config).unwrap(), StreamMode::Off);
        assert_eq!(StreamMode::decide(true, &config).unwrap(), StreamMode::Live);

        config.disable_streaming = true;
        assert_eq!(StreamMode::decide(false, &config).unwrap(), StreamMode::Off);
        let err = StreamMode::decide(true, &config).unwrap_err();
        assert_eq!(err.to_string(), STREAMING_DISABLED);

        config.streaming_policy = StreamingPolicy::Downgrade;
        assert_eq!(
            StreamMode::decide(true, &config).unwrap(),
            StreamMode::Downgraded
        );
    }
}
