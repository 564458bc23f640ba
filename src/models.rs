//! Model allow-listing and resolution.
//!
//! The gateway only forwards requests for models on the allow list. Anthropic
//! clients can ask for extended thinking, which selects the `-thinking` variant
//! of a model when that variant is allowed.

use crate::error::{GatewayError, Result};
use serde::Serialize;

const THINKING_SUFFIX: &str = "-thinking";

/// Default allow list used when the config does not name any models.
#[must_use]
pub fn default_allowed_models() -> Vec<String> {
    [
        "claude-3-5-haiku-20241022",
        "claude-3-5-sonnet-20240620",
        "claude-3-5-sonnet-20241022",
        "claude-3-7-sonnet-20250219",
        "claude-3-7-sonnet-20250219-thinking",
        "claude-3-opus-20240229",
        "claude-haiku-4-5-20251001",
        "claude-haiku-4-5-20251001-thinking",
        "claude-opus-4-1-20250805",
        "claude-opus-4-1-20250805-thinking",
        "claude-opus-4-20250514",
        "claude-opus-4-20250514-thinking",
        "claude-opus-4-5-20251101",
        "claude-opus-4-5-20251101-thinking",
        "claude-opus-4-6",
        "claude-sonnet-4-20250514",
        "claude-sonnet-4-20250514-thinking",
        "claude-sonnet-4-5-20250929",
        "claude-sonnet-4-5-20250929-thinking",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

/// Resolve the model a client asked for against the allow list.
///
/// `thinking` is the raw Anthropic `thinking` field: `{"type": "enabled"}` prefers
/// the `-thinking` variant, `{"type": "disabled"}` prefers the base model. Either
/// switch only happens when the target is itself allowed.
///
/// # Errors
/// Returns `GatewayError::InvalidRequest` when the model is missing or not allowed.
pub fn resolve_model(
    requested: Option<&str>,
    allowed: &[String],
    thinking: Option<&serde_json::Value>,
) -> Result<String> {
    let requested = requested
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::invalid_request("model is required"))?;

    let is_allowed = |m: &str| allowed.iter().any(|a| a == m);
    let thinking_type = thinking
        .and_then(|t| t.get("type"))
        .and_then(|t| t.as_str());

    let mut model = requested.to_string();
    match thinking_type {
        Some("enabled") if !model.ends_with(THINKING_SUFFIX) => {
            let candidate = format!("{model}{THINKING_SUFFIX}");
            if is_allowed(&candidate) {
                model = candidate;
            }
        }
        Some("disabled") => {
            if let Some(base) = model.strip_suffix(THINKING_SUFFIX) {
                if is_allowed(base) {
                    model = base.to_string();
                }
            }
        }
        _ => {}
    }

    if !is_allowed(&model) {
        return Err(GatewayError::invalid_request(format!(
            "model not allowed: {model}"
        )));
    }

    Ok(model)
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub model_type: &'static str,
}

/// Body for `GET /v1/models`. Most clients only read `data[].id`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelEntry>,
}

#[must_use]
pub fn models_response(allowed: &[String]) -> ModelsResponse {
    ModelsResponse {
        data: allowed
            .iter()
            .map(|id| ModelEntry {
                id: id.clone(),
                model_type: "model",
            })
            .collect(),
    }
}
