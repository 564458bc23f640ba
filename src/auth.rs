//! Local API key checks for inbound requests.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::{GatewayError, Result};

/// The caller's key: `x-api-key` first, then `Authorization: Bearer <token>`.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if api_key.is_some() {
        return api_key;
    }

    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = auth.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// With no local keys configured every caller is allowed.
pub fn authorize(local_api_keys: &[String], headers: &HeaderMap) -> Result<()> {
    if local_api_keys.is_empty() {
        return Ok(());
    }
    match extract_token(headers) {
        Some(token) if local_api_keys.iter().any(|k| k == token) => Ok(()),
        _ => Err(GatewayError::Unauthorized),
    }
}
