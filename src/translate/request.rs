//! Translate client requests (Anthropic Messages, Responses-style) into `OpenAI`
//! Chat Completions requests.
//!
//! A single Anthropic user message can expand into multiple upstream messages:
//! interleaved `text` and `tool_result` blocks become alternating `user` and
//! `tool` messages so their order survives.

use serde_json::Value;

use super::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
};
use super::common::random_id;
use super::openai_types::{
    ChatCompletionRequest, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
};
use super::responses_types::{ResponsesInput, ResponsesInputItem, ResponsesRequest};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
/// Pure function: `model` is the already-resolved upstream model id.
pub fn anthropic_to_openai(req: &MessagesRequest, model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for msg in &req.messages {
        messages.extend(translate_message(msg));
    }

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect::<Vec<_>>());

    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().and_then(translate_tool_choice)
    } else {
        None
    };

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        stream: req.stream.unwrap_or(false),
        tools,
        tool_choice,
    }
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Other => return Vec::new(),
    };

    match &msg.content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![ChatMessage::text(role, text.clone())],
        Some(MessageContent::Blocks(blocks)) => match msg.role {
            Role::Assistant => vec![translate_assistant_blocks(blocks)],
            _ => expand_user_blocks(blocks),
        },
    }
}

fn expand_user_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending = String::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => pending.push_str(text),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                if !pending.is_empty() {
                    messages.push(ChatMessage::text("user", std::mem::take(&mut pending)));
                }
                let text = content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(text),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::ToolUse { .. } | ContentBlock::Unknown => {}
        }
    }

    if !pending.is_empty() {
        messages.push(ChatMessage::text("user", pending));
    }

    // Never break role alternation.
    if messages.is_empty() {
        messages.push(ChatMessage::text("user", ""));
    }

    messages
}

fn translate_assistant_blocks(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_object() {
                    serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                } else {
                    "{}".to_string()
                };
                tool_calls.push(ChatToolCall {
                    id: id.clone().unwrap_or_else(|| random_id("toolu")),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone().unwrap_or_default(),
                        arguments,
                    },
                });
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    // Upstreams require `content` to be present alongside `tool_calls`.
    let content = if !text.is_empty() {
        Some(text)
    } else if !tool_calls.is_empty() {
        Some(String::new())
    } else {
        None
    };

    ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool::Function {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

fn translate_tool_choice(raw: &Value) -> Option<ChatToolChoice> {
    match serde_json::from_value::<ToolChoice>(raw.clone()).ok()? {
        ToolChoice::Auto | ToolChoice::Any => Some(ChatToolChoice::String("auto".to_string())),
        ToolChoice::Tool { name: Some(name) } if !name.is_empty() => {
            Some(ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name },
            }))
        }
        ToolChoice::Tool { .. } | ToolChoice::Other => None,
    }
}

/// Translate a Responses-style request into an `OpenAI` Chat Completions request.
///
/// Input items that do not match a known shape are skipped, never rejected.
/// Tool definitions are forwarded unmodified.
pub fn responses_to_openai(req: &ResponsesRequest, model: &str) -> ChatCompletionRequest {
    let messages = match &req.input {
        Some(ResponsesInput::Text(text)) => vec![ChatMessage::text("user", text.clone())],
        Some(ResponsesInput::Items(items)) => items
            .iter()
            .filter_map(|item| match ResponsesInputItem::classify(item) {
                ResponsesInputItem::RoleContent { role, content }
                | ResponsesInputItem::Message { role, content } => {
                    Some(ChatMessage::text(&role, content))
                }
                ResponsesInputItem::InputText { text } => Some(ChatMessage::text("user", text)),
                ResponsesInputItem::Unrecognized => None,
            })
            .collect(),
        Some(ResponsesInput::Other(_)) | None => req
            .messages
            .iter()
            .flatten()
            .filter_map(|m| serde_json::from_value::<ChatMessage>(m.clone()).ok())
            .collect(),
    };

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| tools.iter().cloned().map(ChatTool::Passthrough).collect());

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        max_tokens: req.max_output_tokens.or(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stop: None,
        stream: req.stream.unwrap_or(false),
        tools,
        tool_choice: None,
    }
}
