use crate::auth::authorize;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::{redact_headers, LogLevel, SharedLogger};
use crate::models::models_response;
use crate::proxy::{self, Passthrough, Reply, SseBody};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse};
use crate::translate::responses_types::{ResponseObject, ResponsesInput, ResponsesRequest};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SSE_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = serve_messages(&state, &headers, &body).await;
    reply_response(&state, "/v1/messages", result)
}

async fn serve_messages(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Reply<MessagesResponse>> {
    ensure_ready(&state.config, headers)?;
    let req: MessagesRequest = parse_body(body)?;
    record_request(
        state,
        "/v1/messages",
        headers,
        req.model.as_deref(),
        req.stream.unwrap_or(false),
        req.messages.len(),
    );
    proxy::proxy_messages(&req, &state.config, &state.client, &state.logger).await
}

async fn handle_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = serve_responses(&state, &headers, &body).await;
    reply_response(&state, "/v1/responses", result)
}

async fn serve_responses(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Reply<ResponseObject>> {
    ensure_ready(&state.config, headers)?;
    let req: ResponsesRequest = parse_body(body)?;
    let items = match &req.input {
        Some(ResponsesInput::Items(items)) => items.len(),
        Some(_) => 1,
        None => req.messages.as_ref().map_or(0, Vec::len),
    };
    record_request(
        state,
        "/v1/responses",
        headers,
        req.model.as_deref(),
        req.stream.unwrap_or(false),
        items,
    );
    proxy::proxy_responses(&req, &state.config, &state.client, &state.logger).await
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match serve_chat_completions(&state, &headers, &body).await {
        Ok(passthrough) => passthrough_response(passthrough),
        Err(e) => error_response(&state, "/v1/chat/completions", e),
    }
}

async fn serve_chat_completions(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Passthrough> {
    ensure_ready(&state.config, headers)?;
    let req: serde_json::Value = parse_body(body)?;
    record_request(
        state,
        "/v1/chat/completions",
        headers,
        req.get("model").and_then(|m| m.as_str()),
        req.get("stream").and_then(|s| s.as_bool()).unwrap_or(false),
        req.get("messages")
            .and_then(|m| m.as_array())
            .map_or(0, Vec::len),
    );
    proxy::proxy_chat_completions(req, &state.config, &state.client, &state.logger).await
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match authorize(&state.config.local_api_keys, &headers) {
        Ok(()) => Json(models_response(&state.config.allowed_models)).into_response(),
        Err(e) => error_response(&state, "/v1/models", e),
    }
}

/// Upstream must be configured, then the caller must hold a local key.
fn ensure_ready(config: &GatewayConfig, headers: &HeaderMap) -> Result<()> {
    if !config.is_configured() {
        return Err(GatewayError::NotConfigured);
    }
    authorize(&config.local_api_keys, headers)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_request(format!("Invalid request body: {e}")))
}

fn record_request(
    state: &AppState,
    route: &str,
    headers: &HeaderMap,
    model: Option<&str>,
    stream: bool,
    messages: usize,
) {
    tracing::info!(route, model, stream, messages, "request");
    state.logger.log_with_context(
        LogLevel::Info,
        "server",
        format!("{route} model={} stream={stream}", model.unwrap_or("-")),
        serde_json::json!({
            "model": model,
            "stream": stream,
            "messages": messages,
            "headers": redact_headers(headers),
        }),
    );
}

fn reply_response<T: Serialize>(state: &AppState, route: &str, result: Result<Reply<T>>) -> Response {
    match result {
        Ok(Reply::Json(body)) => Json(body).into_response(),
        Ok(Reply::Stream(body)) => sse_response(body),
        Err(e) => error_response(state, route, e),
    }
}

fn error_response(state: &AppState, route: &str, err: GatewayError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(route, status = status.as_u16(), error = %err, "request failed");
    } else {
        tracing::warn!(route, status = status.as_u16(), error = %err, "request rejected");
    }
    state.logger.log_with_context(
        if status.is_server_error() {
            LogLevel::Error
        } else {
            LogLevel::Warn
        },
        "server",
        format!("{route} failed: {err}"),
        serde_json::json!({ "status": status.as_u16(), "kind": err.kind() }),
    );
    err.into_response()
}

/// Wrap encoded SSE frames in a streaming response with the event-stream headers.
pub fn sse_response(body: SseBody) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, SSE_CONTENT_TYPE)
        .header(CACHE_CONTROL, "no-cache")
        .header(CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn passthrough_response(passthrough: Passthrough) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, passthrough.content_type);
    if passthrough.streaming {
        builder = builder
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive");
    }
    builder
        .body(Body::from_stream(passthrough.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
