use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::openai_types::ChatUsage;

// ---------------------------------------------------------------------------
// Request types (what Responses-style clients send TO us)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponsesInput>,
    /// Chat-style fallback, only read when `input` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<Value>),
    /// Any other JSON; treated as if `input` were absent.
    Other(Value),
}

/// One `input` array item, classified by the first shape it matches.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsesInputItem {
    /// `{role, content: "..."}`
    RoleContent { role: String, content: String },
    /// `{type: "input_text", text}`
    InputText { text: String },
    /// `{type: "message", role?, content}`; `content` is already flattened.
    Message { role: String, content: String },
    Unrecognized,
}

impl ResponsesInputItem {
    pub fn classify(item: &Value) -> Self {
        let Some(obj) = item.as_object() else {
            return Self::Unrecognized;
        };
        let str_field = |key: &str| obj.get(key).and_then(Value::as_str);

        if let (Some(role), Some(content)) = (str_field("role"), str_field("content")) {
            if !role.is_empty() {
                return Self::RoleContent {
                    role: role.to_string(),
                    content: content.to_string(),
                };
            }
        }

        match str_field("type") {
            Some("input_text") => match str_field("text") {
                Some(text) => Self::InputText {
                    text: text.to_string(),
                },
                None => Self::Unrecognized,
            },
            Some("message") => {
                let role = str_field("role")
                    .filter(|r| !r.is_empty())
                    .unwrap_or("user")
                    .to_string();
                match obj.get("content") {
                    Some(Value::String(content)) => Self::Message {
                        role,
                        content: content.clone(),
                    },
                    Some(Value::Array(parts)) => {
                        let text: String = parts
                            .iter()
                            .filter_map(|p| p.get("text").and_then(Value::as_str))
                            .collect();
                        let text = text.trim();
                        if text.is_empty() {
                            Self::Unrecognized
                        } else {
                            Self::Message {
                                role,
                                content: text.to_string(),
                            }
                        }
                    }
                    _ => Self::Unrecognized,
                }
            }
            _ => Self::Unrecognized,
        }
    }
}

// ---------------------------------------------------------------------------
// Response types (what we send BACK to Responses-style clients)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: String, // "response"
    pub created_at: i64,
    pub status: ResponseStatus,
    pub model: String,
    pub output: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

impl ResponseObject {
    pub fn new(id: String, created_at: i64, model: &str, status: ResponseStatus) -> Self {
        Self {
            id,
            object: "response".to_string(),
            created_at,
            status,
            model: model.to_string(),
            output: Vec::new(),
            usage: None,
        }
    }

    /// Attach the single assistant message carrying `text`.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.output = vec![OutputItem::Message {
            role: "assistant".to_string(),
            content: vec![OutputContent::OutputText { text: text.into() }],
        }];
        self
    }

    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| match item {
                OutputItem::Message { content, .. } => content.iter(),
            })
            .map(|c| match c {
                OutputContent::OutputText { text } => text.as_str(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        role: String,
        content: Vec<OutputContent>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
}

// ---------------------------------------------------------------------------
// Streaming event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: ResponseObject },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        delta: String,
        response_id: String,
        output_index: u32,
        content_index: u32,
    },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
}

impl ResponsesStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ResponsesStreamEvent::Created { .. } => "response.created",
            ResponsesStreamEvent::OutputTextDelta { .. } => "response.output_text.delta",
            ResponsesStreamEvent::Completed { .. } => "response.completed",
        }
    }
}
