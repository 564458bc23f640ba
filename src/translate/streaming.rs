//! State machines for translating `OpenAI` streaming chunks into client SSE events.
//!
//! [`AnthropicStreamTranslator`] and [`ResponsesStreamTranslator`] process
//! `ChatCompletionChunk`s one at a time and return the events to emit for each.
//! Call `finish()` exactly once when the upstream ends, however it ends, to get
//! the closing envelope.
//!
//! Tool-call arguments are buffered per upstream index and only emitted from
//! `finish()`, as one complete JSON document per tool, so clients never see a
//! partial argument object.

use std::collections::BTreeMap;

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::common::{map_finish_reason, random_id, unix_now, StopReason};
use super::openai_types::{ChatCompletionChunk, ChatUsage, ChunkToolCall};
use super::response::parse_tool_input;
use super::responses_types::{ResponseObject, ResponseStatus, ResponsesStreamEvent};

/// Outbound index of the text block. Tool `n` lands at `TEXT_BLOCK_INDEX + 1 + n`.
const TEXT_BLOCK_INDEX: usize = 0;

/// Arguments and identity accumulated for one upstream tool-call index.
#[derive(Debug, Clone, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallState {
    fn absorb(&mut self, fragment: &ChunkToolCall) {
        if self.id.is_none() {
            self.id = fragment.id.clone().filter(|id| !id.is_empty());
        }
        if let Some(function) = &fragment.function {
            if self.name.is_none() {
                self.name = function.name.clone().filter(|n| !n.is_empty());
            }
            if let Some(args) = &function.arguments {
                self.arguments.push_str(args);
            }
        }
    }
}

/// Translates an upstream chunk stream into Anthropic Messages SSE events.
///
/// Usage:
///   let mut translator = AnthropicStreamTranslator::new("claude-sonnet-4-20250514");
///   for chunk in upstream_chunks {
///       let events = translator.process_chunk(&chunk);
///       // send each event as SSE
///   }
///   let final_events = translator.finish();
#[derive(Debug)]
pub struct AnthropicStreamTranslator {
    model: String,
    upstream_id: Option<String>,
    message_started: bool,
    text_block_started: bool,
    tool_states: BTreeMap<u32, ToolCallState>,
    stop_reason: Option<StopReason>,
    output_tokens: u64,
    finished: bool,
}

impl AnthropicStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            upstream_id: None,
            message_started: false,
            text_block_started: false,
            tool_states: BTreeMap::new(),
            stop_reason: None,
            output_tokens: 0,
            finished: false,
        }
    }

    /// Process a single upstream chunk, returning zero or more events to emit now.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if self.upstream_id.is_none() {
            self.upstream_id = chunk.id.clone().filter(|id| !id.is_empty());
        }
        if let Some(usage) = &chunk.usage {
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.first() else {
            return Vec::new();
        };

        if let Some(reason) = map_finish_reason(choice.finish_reason.as_deref()) {
            self.stop_reason = Some(reason);
        }

        let mut events = Vec::new();

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            self.ensure_message_start(&mut events);
            if !self.text_block_started {
                self.text_block_started = true;
                events.push(StreamEvent::ContentBlockStart {
                    index: TEXT_BLOCK_INDEX,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
            }
            events.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        for fragment in choice.delta.tool_calls.iter().flatten() {
            // Fragments without an index cannot be correlated
            let Some(index) = fragment.index else {
                continue;
            };
            self.ensure_message_start(&mut events);
            self.tool_states.entry(index).or_default().absorb(fragment);
        }

        events
    }

    /// Close the stream. Safe to call more than once; later calls return nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.ensure_message_start(&mut events);

        if self.text_block_started {
            events.push(StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
        }

        for (tool_index, state) in std::mem::take(&mut self.tool_states) {
            let Some(input) = parse_tool_input(&state.arguments) else {
                tracing::debug!(tool_index, "dropping tool call with malformed arguments");
                continue;
            };
            let index = TEXT_BLOCK_INDEX + 1 + tool_index as usize;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse {
                    id: state.id.unwrap_or_else(|| random_id("toolu")),
                    name: state.name.unwrap_or_default(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
            });
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: input.to_string(),
                },
            });
            events.push(StreamEvent::ContentBlockStop { index });
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: self.stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }

    fn ensure_message_start(&mut self, events: &mut Vec<StreamEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self
                    .upstream_id
                    .clone()
                    .unwrap_or_else(|| random_id("msg")),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        });
    }
}

/// Translates an upstream chunk stream into Responses-style SSE events.
///
/// Text only: tool-call fragments are ignored on this path.
#[derive(Debug)]
pub struct ResponsesStreamTranslator {
    model: String,
    response_id: String,
    created_at: i64,
    upstream_id_seen: bool,
    created: bool,
    output_text: String,
    usage: Option<ChatUsage>,
    finished: bool,
}

impl ResponsesStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: random_id("resp"),
            created_at: unix_now(),
            upstream_id_seen: false,
            created: false,
            output_text: String::new(),
            usage: None,
            finished: false,
        }
    }

    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        // The id is fixed once `response.created` is out.
        if !self.upstream_id_seen {
            if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
                self.upstream_id_seen = true;
                if !self.created {
                    self.response_id = id.to_string();
                }
            }
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let Some(text) = chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|t| !t.is_empty())
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        self.ensure_created(&mut events);
        self.output_text.push_str(text);
        events.push(ResponsesStreamEvent::OutputTextDelta {
            delta: text.to_string(),
            response_id: self.response_id.clone(),
            output_index: 0,
            content_index: 0,
        });
        events
    }

    /// Emit `response.created` if still pending, then `response.completed`.
    /// The `[DONE]` sentinel is written by the caller.
    pub fn finish(&mut self) -> Vec<ResponsesStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.ensure_created(&mut events);

        let mut response = ResponseObject::new(
            self.response_id.clone(),
            self.created_at,
            &self.model,
            ResponseStatus::Completed,
        )
        .with_text(std::mem::take(&mut self.output_text));
        response.usage = self.usage.take();

        events.push(ResponsesStreamEvent::Completed { response });
        events
    }

    fn ensure_created(&mut self, events: &mut Vec<ResponsesStreamEvent>) {
        if self.created {
            return;
        }
        self.created = true;
        events.push(ResponsesStreamEvent::Created {
            response: ResponseObject::new(
                self.response_id.clone(),
                self.created_at,
                &self.model,
                ResponseStatus::InProgress,
            ),
        });
    }
}

/// Replay a completed Anthropic message as a single-shot event sequence.
///
/// Blocks get sequential indices in message order; the stop reason defaults to
/// `end_turn`.
pub fn message_to_stream_events(message: &MessagesResponse) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::MessageStart {
        message: MessagesResponse {
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            ..message.clone()
        },
    }];

    for (index, block) in message.content.iter().enumerate() {
        match block {
            ResponseContentBlock::Text { text } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
                if !text.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: Delta::TextDelta { text: text.clone() },
                    });
                }
            }
            ResponseContentBlock::ToolUse { id, name, input } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
            }
        }
        events.push(StreamEvent::ContentBlockStop { index });
    }

    events.push(StreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: Some(message.stop_reason.unwrap_or(StopReason::EndTurn)),
            stop_sequence: None,
        },
        usage: DeltaUsage {
            output_tokens: message.usage.output_tokens,
        },
    });
    events.push(StreamEvent::MessageStop);
    events
}

/// Replay a completed Responses-style object as a single-shot event sequence.
pub fn response_to_stream_events(response: &ResponseObject) -> Vec<ResponsesStreamEvent> {
    let mut created = response.clone();
    created.status = ResponseStatus::InProgress;
    created.output = Vec::new();
    created.usage = None;

    let mut events = vec![ResponsesStreamEvent::Created { response: created }];
    let text = response.output_text();
    if !text.is_empty() {
        events.push(ResponsesStreamEvent::OutputTextDelta {
            delta: text,
            response_id: response.id.clone(),
            output_index: 0,
            content_index: 0,
        });
    }
    events.push(ResponsesStreamEvent::Completed {
        response: response.clone(),
    });
    events
}
