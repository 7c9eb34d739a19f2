//! Decoding of agent stdout records into typed turn events.
//!
//! Only the structural shape of each record matters: the type tag, the
//! message key, text fragments, and tool invocation ids/names/inputs.

use serde_json::Value;

use crate::error::DecodeError;

/// Content block kind announced by a `content_block_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
    Thinking,
    Other,
}

impl BlockKind {
    fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "tool_use" | "server_tool_use" => Self::ToolUse,
            "thinking" | "redacted_thinking" => Self::Thinking,
            _ => Self::Other,
        }
    }
}

/// One block of a full assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Other,
}

/// A single event in an agent's turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Init,
    MessageStart {
        key: String,
    },
    AssistantFull {
        key: String,
        blocks: Vec<ContentBlock>,
    },
    BlockStart {
        kind: BlockKind,
    },
    BlockDelta {
        text: String,
    },
    BlockStop,
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult,
    Result {
        final_text: String,
    },
    Error {
        message: String,
    },
}

/// Parse one line of agent stdout.
///
/// Blank lines and records with no bearing on the transcript yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<AgentEvent>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line)?;
    parse_event(&value)
}

/// Parse an already-decoded agent record.
pub fn parse_event(value: &Value) -> Result<Option<AgentEvent>, DecodeError> {
    let kind = str_field(value, "type").ok_or(DecodeError::MissingField("type"))?;

    let event = match kind {
        "system" => match str_field(value, "subtype") {
            Some("init") => Some(AgentEvent::Init),
            _ => None,
        },
        "assistant" => Some(parse_assistant(value)?),
        "stream_event" => {
            let inner = value.get("event").ok_or(DecodeError::MissingField("event"))?;
            parse_stream_event(inner)?
        }
        "message_start" | "content_block_start" | "content_block_delta" | "content_block_stop"
        | "message_delta" | "message_stop" => parse_stream_event(value)?,
        "tool_use" => Some(AgentEvent::ToolUse {
            id: str_field(value, "id")
                .ok_or(DecodeError::MissingField("id"))?
                .to_owned(),
            name: str_field(value, "name")
                .ok_or(DecodeError::MissingField("name"))?
                .to_owned(),
            input: tool_input(value),
        }),
        "tool_result" => Some(AgentEvent::ToolResult),
        "user" => carries_tool_result(value).then_some(AgentEvent::ToolResult),
        "result" => Some(parse_result(value)),
        "error" => Some(AgentEvent::Error {
            message: error_message(value),
        }),
        _ => None,
    };
    Ok(event)
}

fn parse_assistant(value: &Value) -> Result<AgentEvent, DecodeError> {
    let message = value
        .get("message")
        .ok_or(DecodeError::MissingField("message"))?;
    let key = str_field(message, "id")
        .or_else(|| str_field(value, "uuid"))
        .unwrap_or_default()
        .to_owned();

    let blocks = match message.get("content") {
        Some(Value::Array(items)) => items.iter().map(parse_block).collect(),
        Some(Value::String(text)) => vec![ContentBlock::Text(text.clone())],
        _ => Vec::new(),
    };
    Ok(AgentEvent::AssistantFull { key, blocks })
}

fn parse_block(block: &Value) -> ContentBlock {
    match str_field(block, "type") {
        Some("text") => ContentBlock::Text(str_field(block, "text").unwrap_or_default().to_owned()),
        Some("tool_use") | Some("server_tool_use") => {
            match (str_field(block, "id"), str_field(block, "name")) {
                (Some(id), Some(name)) => ContentBlock::ToolUse {
                    id: id.to_owned(),
                    name: name.to_owned(),
                    input: tool_input(block),
                },
                _ => ContentBlock::Other,
            }
        }
        _ => ContentBlock::Other,
    }
}

fn parse_stream_event(event: &Value) -> Result<Option<AgentEvent>, DecodeError> {
    let kind = str_field(event, "type").ok_or(DecodeError::MissingField("type"))?;
    let parsed = match kind {
        "message_start" => event
            .get("message")
            .and_then(|m| str_field(m, "id"))
            .map(|key| AgentEvent::MessageStart {
                key: key.to_owned(),
            }),
        "content_block_start" => {
            let block_type = event
                .get("content_block")
                .and_then(|b| str_field(b, "type"))
                .ok_or(DecodeError::MissingField("content_block"))?;
            Some(AgentEvent::BlockStart {
                kind: BlockKind::parse(block_type),
            })
        }
        "content_block_delta" => {
            let delta = event.get("delta").ok_or(DecodeError::MissingField("delta"))?;
            match str_field(delta, "type") {
                Some("text_delta") => Some(AgentEvent::BlockDelta {
                    text: str_field(delta, "text")
                        .ok_or(DecodeError::MissingField("text"))?
                        .to_owned(),
                }),
                // input_json_delta, thinking_delta, signature_delta
                _ => None,
            }
        }
        "content_block_stop" => Some(AgentEvent::BlockStop),
        _ => None,
    };
    Ok(parsed)
}

fn parse_result(value: &Value) -> AgentEvent {
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let subtype = str_field(value, "subtype").unwrap_or_default();
    let text = str_field(value, "result").unwrap_or_default();

    if is_error || subtype.starts_with("error") {
        let message = if !text.is_empty() {
            text.to_owned()
        } else if !subtype.is_empty() {
            subtype.to_owned()
        } else {
            "agent reported an error".to_owned()
        };
        return AgentEvent::Error { message };
    }
    AgentEvent::Result {
        final_text: text.to_owned(),
    }
}

fn error_message(value: &Value) -> String {
    let nested = value.get("error");
    nested
        .and_then(|e| str_field(e, "message"))
        .or_else(|| nested.and_then(Value::as_str))
        .or_else(|| str_field(value, "message"))
        .unwrap_or("unknown error")
        .to_owned()
}

fn carries_tool_result(value: &Value) -> bool {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .is_some_and(|items| {
            items
                .iter()
                .any(|item| str_field(item, "type") == Some("tool_result"))
        })
}

fn tool_input(value: &Value) -> Value {
    match value.get("input") {
        Some(input) if !input.is_null() => input.clone(),
        _ => Value::Object(serde_json::Map::new()),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<AgentEvent> {
        parse_line(line).expect("valid record")
    }

    #[test]
    fn system_init() {
        assert_eq!(
            parse(r#"{"type":"system","subtype":"init","session_id":"s1","tools":[]}"#),
            Some(AgentEvent::Init)
        );
        assert_eq!(parse(r#"{"type":"system","subtype":"compact_boundary"}"#), None);
    }

    #[test]
    fn assistant_full_message() {
        let event = parse(
            r#"{"type":"assistant","message":{"id":"msg_1","role":"assistant","content":[
                {"type":"text","text":"Reading "},
                {"type":"tool_use","id":"x1","name":"Read","input":{"file_path":"/a/b/c.txt"}},
                {"type":"thinking","thinking":"hmm"}
            ]}}"#,
        );
        let Some(AgentEvent::AssistantFull { key, blocks }) = event else {
            panic!("expected assistant-full, got {event:?}");
        };
        assert_eq!(key, "msg_1");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], ContentBlock::Text("Reading ".into()));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { id, name, .. } if id == "x1" && name == "Read"));
        assert_eq!(blocks[2], ContentBlock::Other);
    }

    #[test]
    fn assistant_without_message_id_falls_back_to_uuid() {
        let event = parse(r#"{"type":"assistant","uuid":"u-9","message":{"content":"plain"}}"#);
        assert_eq!(
            event,
            Some(AgentEvent::AssistantFull {
                key: "u-9".into(),
                blocks: vec![ContentBlock::Text("plain".into())],
            })
        );
    }

    #[test]
    fn wrapped_and_bare_stream_events() {
        assert_eq!(
            parse(r#"{"type":"stream_event","event":{"type":"message_start","message":{"id":"msg_2"}}}"#),
            Some(AgentEvent::MessageStart { key: "msg_2".into() })
        );
        assert_eq!(
            parse(r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}}"#),
            Some(AgentEvent::BlockStart { kind: BlockKind::Text })
        );
        assert_eq!(
            parse(r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"t","name":"Bash","input":{}}}"#),
            Some(AgentEvent::BlockStart { kind: BlockKind::ToolUse })
        );
        assert_eq!(
            parse(r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}}"#),
            Some(AgentEvent::BlockDelta { text: "Hel".into() })
        );
        assert_eq!(
            parse(r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\""}}"#),
            None
        );
        assert_eq!(
            parse(r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#),
            Some(AgentEvent::BlockStop)
        );
        assert_eq!(parse(r#"{"type":"stream_event","event":{"type":"message_stop"}}"#), None);
    }

    #[test]
    fn standalone_tool_use_and_results() {
        assert_eq!(
            parse(r#"{"type":"tool_use","id":"x1","name":"Bash","input":{"command":"ls"}}"#),
            Some(AgentEvent::ToolUse {
                id: "x1".into(),
                name: "Bash".into(),
                input: serde_json::json!({"command": "ls"}),
            })
        );
        assert_eq!(
            parse(r#"{"type":"tool_result","tool_use_id":"x1","content":"ok"}"#),
            Some(AgentEvent::ToolResult)
        );
        assert_eq!(
            parse(r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x1"}]}}"#),
            Some(AgentEvent::ToolResult)
        );
        assert_eq!(parse(r#"{"type":"user","message":{"content":"hello"}}"#), None);
    }

    #[test]
    fn tool_use_missing_input_gets_empty_object() {
        let event = parse(r#"{"type":"tool_use","id":"x2","name":"Glob"}"#);
        assert_eq!(
            event,
            Some(AgentEvent::ToolUse {
                id: "x2".into(),
                name: "Glob".into(),
                input: serde_json::json!({}),
            })
        );
    }

    #[test]
    fn result_and_error_records() {
        assert_eq!(
            parse(r#"{"type":"result","subtype":"success","is_error":false,"result":"Hello"}"#),
            Some(AgentEvent::Result { final_text: "Hello".into() })
        );
        assert_eq!(
            parse(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#),
            Some(AgentEvent::Error { message: "error_max_turns".into() })
        );
        assert_eq!(
            parse(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            Some(AgentEvent::Error { message: "Overloaded".into() })
        );
        assert_eq!(
            parse(r#"{"type":"error","message":"spawn failed"}"#),
            Some(AgentEvent::Error { message: "spawn failed".into() })
        );
    }

    #[test]
    fn unknown_types_are_ignored_and_garbage_is_an_error() {
        assert_eq!(parse(r#"{"type":"rate_limit","retry_after":3}"#), None);
        assert_eq!(parse("   "), None);
        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"no_type":true}"#).is_err());
        assert!(parse_line(r#"{"type":"tool_use","name":"Read"}"#).is_err());
        assert!(parse_line(r#"{"type":"stream_event"}"#).is_err());
    }
}
