use serde_json::Value;

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::common::{map_finish_reason, random_id, unix_now};
use super::openai_types::{ChatCompletionResponse, ResponseToolCall};
use super::responses_types::{ResponseObject, ResponseStatus};

/// Translate an `OpenAI` Chat Completion response into an Anthropic Messages response.
/// Pure function: `model` is the resolved model the client is told it talked to.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse, model: &str) -> MessagesResponse {
    let choice = resp.choices.first();
    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        let text = c.message.text();
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text {
                text: text.to_string(),
            });
        }

        for tc in c.message.tool_calls.iter().flatten() {
            if tc.call_type.as_deref() == Some("function") {
                content.push(tool_call_to_block(tc));
            }
        }
    }

    // Clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    MessagesResponse {
        id: upstream_id(resp).unwrap_or_else(|| random_id("msg")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref())),
        stop_sequence: None,
        usage,
    }
}

fn tool_call_to_block(tc: &ResponseToolCall) -> ResponseContentBlock {
    let function = tc.function.as_ref();
    let arguments = function
        .and_then(|f| f.arguments.as_deref())
        .unwrap_or("{}");

    ResponseContentBlock::ToolUse {
        id: tc
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| random_id("toolu")),
        name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
        input: parse_tool_input(arguments).unwrap_or_else(empty_object),
    }
}

/// Parse accumulated tool arguments; only a JSON object is a valid tool input.
pub(crate) fn parse_tool_input(arguments: &str) -> Option<Value> {
    let trimmed = arguments.trim();
    let source = if trimmed.is_empty() { "{}" } else { trimmed };
    serde_json::from_str::<Value>(source)
        .ok()
        .filter(Value::is_object)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn upstream_id(resp: &ChatCompletionResponse) -> Option<String> {
    resp.id.clone().filter(|id| !id.is_empty())
}

/// Translate an `OpenAI` Chat Completion response into a Responses-style response object.
/// Only the first choice's text is carried; tool calls have no representation on this path.
pub fn openai_to_responses(resp: &ChatCompletionResponse, model: &str) -> ResponseObject {
    let text = resp
        .choices
        .first()
        .map(|c| c.message.text())
        .unwrap_or("");

    let mut object = ResponseObject::new(
        upstream_id(resp).unwrap_or_else(|| random_id("resp")),
        resp.created.filter(|t| *t > 0).unwrap_or_else(unix_now),
        model,
        ResponseStatus::Completed,
    )
    .with_text(text);
    object.usage.clone_from(&resp.usage);
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::common::StopReason;
    use serde_json::json;

    fn upstream(body: Value) -> ChatCompletionResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_simple_text_response() {
        let resp = upstream(json!({
            "id": "chatcmpl-abc123",
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        }));
        let result = openai_to_anthropic(&resp, "claude-sonnet-4-20250514");

        assert_eq!(result.id, "chatcmpl-abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "claude-sonnet-4-20250514");
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_tool_call_response() {
        let resp = upstream(json!({
            "choices": [{
                "message": {
                    "content": "Let me check.",
                    "tool_calls": [
                        {"id": "call_abc", "type": "function",
                         "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}},
                        {"type": "function", "function": {"name": "broken", "arguments": "{\"city\":"}},
                        {"type": "retrieval", "function": {"name": "skipped"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }));

        let result = openai_to_anthropic(&resp, "test-model");

        assert!(result.id.starts_with("msg_"));
        assert_eq!(result.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(result.content.len(), 3);
        assert_eq!(
            result.content[1],
            ResponseContentBlock::ToolUse {
                id: "call_abc".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "London"}),
            }
        );
        let ResponseContentBlock::ToolUse { id, name, input } = &result.content[2] else {
            panic!("expected tool_use block");
        };
        assert!(id.starts_with("toolu_"));
        assert_eq!(name, "broken");
        assert_eq!(input, &json!({}));
    }

    #[test]
    fn test_empty_response_still_has_content() {
        let result = openai_to_anthropic(&upstream(json!({})), "m");
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: String::new()
            }]
        );
        assert_eq!(result.stop_reason, None);
        assert_eq!(result.usage.input_tokens, 0);
        assert_eq!(result.usage.output_tokens, 0);
    }

    #[test]
    fn test_null_message_maps_to_empty_text() {
        let result = openai_to_anthropic(
            &upstream(json!({
                "choices": [{"message": null, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": null}
            })),
            "m",
        );
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: String::new()
            }]
        );
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(result.usage.input_tokens, 3);
        assert_eq!(result.usage.output_tokens, 0);
    }

    #[test]
    fn test_parse_tool_input() {
        assert_eq!(parse_tool_input(""), Some(json!({})));
        assert_eq!(parse_tool_input("  "), Some(json!({})));
        assert_eq!(parse_tool_input("{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(parse_tool_input("[1,2]"), None);
        assert_eq!(parse_tool_input("{\"a\":"), None);
    }

    #[test]
    fn test_text_survives_round_trip() {
        let text = "Plain text with ünïcödé and \"quotes\"\nand lines";
        let req: crate::translate::anthropic_types::MessagesRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": text}]}))
                .unwrap();
        let upstream_req = crate::translate::request::anthropic_to_openai(&req, "m");
        let echoed = upstream(json!({
            "choices": [{"message": {"content": upstream_req.messages[0].content}}]
        }));

        let result = openai_to_anthropic(&echoed, "m");
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: text.to_string()
            }]
        );
        assert_eq!(openai_to_responses(&echoed, "m").output_text(), text);
    }

    #[test]
    fn test_responses_mapping() {
        let resp = upstream(json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "choices": [{"message": {"content": "hi"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }));

        let value = serde_json::to_value(openai_to_responses(&resp, "m")).unwrap();
        assert_eq!(value["id"], "chatcmpl-1");
        assert_eq!(value["object"], "response");
        assert_eq!(value["created_at"], 1_700_000_000);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["model"], "m");
        assert_eq!(value["output"][0]["content"][0]["text"], "hi");
        assert_eq!(value["usage"]["total_tokens"], 7);
    }

    #[test]
    fn test_responses_mapping_synthesizes_missing_fields() {
        let result = openai_to_responses(&upstream(json!({"choices": []})), "m");
        assert!(result.id.starts_with("resp_"));
        assert!(result.created_at > 0);
        assert_eq!(result.status, ResponseStatus::Completed);
        assert_eq!(result.output_text(), "");
        assert!(result.usage.is_none());
    }
}
