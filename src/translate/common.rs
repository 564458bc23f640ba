//! Vocabulary shared by every translator: stop reasons, identifiers, text extraction.

use serde::{Deserialize, Serialize};

use super::anthropic_types::ContentBlock;

/// Why the upstream stopped generating, as reported in `finish_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other,
}

impl FinishReason {
    /// Parse an upstream `finish_reason`. Absent or empty means "no reason yet".
    pub fn from_upstream(reason: Option<&str>) -> Option<Self> {
        match reason? {
            "" => None,
            "stop" => Some(Self::Stop),
            "length" => Some(Self::Length),
            "tool_calls" => Some(Self::ToolCalls),
            _ => Some(Self::Other),
        }
    }

    pub fn to_stop_reason(self) -> StopReason {
        match self {
            Self::Stop | Self::Other => StopReason::EndTurn,
            Self::Length => StopReason::MaxTokens,
            Self::ToolCalls => StopReason::ToolUse,
        }
    }
}

/// Anthropic-side stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
}

/// Map an upstream `finish_reason` to an Anthropic stop reason.
///
/// Unknown reasons become `end_turn`; an absent reason stays `None`, which
/// mid-stream means the upstream has not finished yet.
pub fn map_finish_reason(reason: Option<&str>) -> Option<StopReason> {
    FinishReason::from_upstream(reason).map(FinishReason::to_stop_reason)
}

/// `<prefix>_<32 hex chars>`, e.g. `msg_…`, `toolu_…`, `resp_…`.
pub fn random_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Concatenate the text of every `text` block, in order, skipping everything else.
pub fn concat_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
