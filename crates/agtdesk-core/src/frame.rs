//! Wire codec for the shared event channel.
//!
//! Inbound traffic is either a binary terminal-output frame or a JSON text
//! frame tagged by `type`. Outbound traffic is always JSON text.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Largest accepted terminal width/height.
pub const MAX_TERMINAL_DIMENSION: u16 = 500;

/// Which output stream of the agent process a chunk came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

/// Agent output body: a chunk of JSON lines, or an already-structured record.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPayload {
    Text(String),
    Event(serde_json::Value),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    TerminalOutput {
        id: String,
        data: Vec<u8>,
    },
    TerminalExit {
        id: String,
        code: Option<i32>,
    },
    AgentOutput {
        agent_id: String,
        stream: OutputStream,
        data: AgentPayload,
    },
    AgentExit {
        agent_id: String,
        code: Option<i32>,
    },
}

impl Frame {
    /// The terminal or agent id this frame is addressed to.
    pub fn target(&self) -> &str {
        match self {
            Self::TerminalOutput { id, .. } | Self::TerminalExit { id, .. } => id,
            Self::AgentOutput { agent_id, .. } | Self::AgentExit { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireFrame {
    TerminalOutput {
        id: String,
        data: String,
    },
    TerminalExit {
        id: String,
        #[serde(default)]
        code: Option<i32>,
    },
    AgentOutput {
        #[serde(rename = "agentId", alias = "agent_id")]
        agent_id: String,
        #[serde(default)]
        stream: OutputStream,
        data: serde_json::Value,
    },
    AgentExit {
        #[serde(rename = "agentId", alias = "agent_id")]
        agent_id: String,
        #[serde(default)]
        code: Option<i32>,
    },
}

const KNOWN_FRAME_TYPES: [&str; 4] = [
    "terminal-output",
    "terminal-exit",
    "agent-output",
    "agent-exit",
];

/// Decode a JSON text frame.
pub fn decode_text(text: &str) -> Result<Frame, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(DecodeError::MissingField("type"))?;
    if !KNOWN_FRAME_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownFrame(kind.to_owned()));
    }

    let frame = match serde_json::from_value::<WireFrame>(value)? {
        WireFrame::TerminalOutput { id, data } => Frame::TerminalOutput {
            id,
            data: data.into_bytes(),
        },
        WireFrame::TerminalExit { id, code } => Frame::TerminalExit { id, code },
        WireFrame::AgentOutput {
            agent_id,
            stream,
            data,
        } => {
            let data = match data {
                serde_json::Value::String(s) => AgentPayload::Text(s),
                serde_json::Value::Null => AgentPayload::Text(String::new()),
                other => AgentPayload::Event(other),
            };
            Frame::AgentOutput {
                agent_id,
                stream,
                data,
            }
        }
        WireFrame::AgentExit { agent_id, code } => Frame::AgentExit { agent_id, code },
    };
    Ok(frame)
}

/// Encode a binary terminal-output frame:
/// `[id_len: u8][id: bytes][output_data: bytes]`.
pub fn encode_output_frame(id: &str, data: &[u8]) -> Vec<u8> {
    let id_bytes = id.as_bytes();
    let id_len = id_bytes.len().min(255) as u8;
    let mut frame = Vec::with_capacity(1 + id_len as usize + data.len());
    frame.push(id_len);
    frame.extend_from_slice(&id_bytes[..id_len as usize]);
    frame.extend_from_slice(data);
    frame
}

/// Decode a binary terminal-output frame.
pub fn decode_binary(frame: &[u8]) -> Result<Frame, DecodeError> {
    let malformed = || DecodeError::BinaryFrame { len: frame.len() };
    let (&id_len, rest) = frame.split_first().ok_or_else(malformed)?;
    let id_len = id_len as usize;
    if id_len == 0 || rest.len() < id_len {
        return Err(malformed());
    }
    let id = std::str::from_utf8(&rest[..id_len]).map_err(|_| malformed())?;
    Ok(Frame::TerminalOutput {
        id: id.to_owned(),
        data: rest[id_len..].to_vec(),
    })
}

// ─── Outbound ─────────────────────────────────────────────────────

/// A keyed command sent over the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    TerminalInput { id: String, data: String },
    TerminalResize { id: String, cols: u16, rows: u16 },
}

impl Command {
    pub fn input(id: &str, bytes: &[u8]) -> Self {
        Self::TerminalInput {
            id: id.to_owned(),
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Build a resize command, or `None` when a dimension is outside
    /// `1..=MAX_TERMINAL_DIMENSION`.
    pub fn resize(id: &str, cols: u16, rows: u16) -> Option<Self> {
        let valid = |d: u16| (1..=MAX_TERMINAL_DIMENSION).contains(&d);
        if !valid(cols) || !valid(rows) {
            return None;
        }
        Some(Self::TerminalResize {
            id: id.to_owned(),
            cols,
            rows,
        })
    }

    /// The logical target id of this command.
    pub fn target(&self) -> &str {
        match self {
            Self::TerminalInput { id, .. } | Self::TerminalResize { id, .. } => id,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frame_roundtrip() {
        let frame = encode_output_frame("t-7", b"\x1b[32mok\x1b[0m");
        let decoded = decode_binary(&frame).expect("decode");
        assert_eq!(
            decoded,
            Frame::TerminalOutput {
                id: "t-7".into(),
                data: b"\x1b[32mok\x1b[0m".to_vec(),
            }
        );
    }

    #[test]
    fn binary_frame_rejects_truncated_id() {
        assert!(decode_binary(&[]).is_err());
        assert!(decode_binary(&[5, b'a', b'b']).is_err());
        assert!(decode_binary(&[0, b'x']).is_err());
    }

    #[test]
    fn binary_frame_with_empty_payload() {
        let frame = encode_output_frame("t1", b"");
        let decoded = decode_binary(&frame).expect("decode");
        assert_eq!(decoded.target(), "t1");
    }

    #[test]
    fn decode_terminal_output_text() {
        let frame = decode_text(r#"{"type":"terminal-output","id":"t1","data":"ls\r\n"}"#)
            .expect("decode");
        assert_eq!(
            frame,
            Frame::TerminalOutput {
                id: "t1".into(),
                data: b"ls\r\n".to_vec(),
            }
        );
    }

    #[test]
    fn decode_agent_output_string_payload() {
        let frame = decode_text(
            r#"{"type":"agent-output","agentId":"a1","stream":"stdout","data":"{\"type\":\"system\",\"subtype\":\"init\"}\n"}"#,
        )
        .expect("decode");
        let Frame::AgentOutput {
            agent_id,
            stream,
            data,
        } = frame
        else {
            panic!("expected agent output");
        };
        assert_eq!(agent_id, "a1");
        assert_eq!(stream, OutputStream::Stdout);
        assert!(matches!(data, AgentPayload::Text(ref s) if s.ends_with('\n')));
    }

    #[test]
    fn decode_agent_output_object_payload_defaults_to_stdout() {
        let frame = decode_text(
            r#"{"type":"agent-output","agent_id":"a2","data":{"type":"result","result":"done"}}"#,
        )
        .expect("decode");
        let Frame::AgentOutput { stream, data, .. } = frame else {
            panic!("expected agent output");
        };
        assert_eq!(stream, OutputStream::Stdout);
        assert!(matches!(data, AgentPayload::Event(_)));
    }

    #[test]
    fn decode_exit_frames() {
        let frame = decode_text(r#"{"type":"terminal-exit","id":"t1","code":130}"#).expect("decode");
        assert_eq!(
            frame,
            Frame::TerminalExit {
                id: "t1".into(),
                code: Some(130),
            }
        );
        let frame = decode_text(r#"{"type":"agent-exit","agentId":"a1"}"#).expect("decode");
        assert_eq!(
            frame,
            Frame::AgentExit {
                agent_id: "a1".into(),
                code: None,
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_and_malformed() {
        assert!(matches!(
            decode_text(r#"{"type":"pane-moved","id":"x"}"#),
            Err(DecodeError::UnknownFrame(_))
        ));
        assert!(matches!(
            decode_text(r#"{"id":"x"}"#),
            Err(DecodeError::MissingField("type"))
        ));
        assert!(decode_text("not json").is_err());
        assert!(decode_text(r#"{"type":"terminal-output","data":"x"}"#).is_err());
    }

    #[test]
    fn commands_encode_with_kebab_type_tags() {
        let json = Command::input("t1", b"ls\n").encode().expect("encode");
        assert_eq!(json, r#"{"type":"terminal-input","id":"t1","data":"ls\n"}"#);

        let resize = Command::resize("t1", 120, 40).expect("valid");
        let value: serde_json::Value =
            serde_json::from_str(&resize.encode().expect("encode")).expect("json");
        assert_eq!(value["type"], "terminal-resize");
        assert_eq!(value["cols"], 120);
        assert_eq!(resize.target(), "t1");
    }

    #[test]
    fn resize_rejects_out_of_range_dimensions() {
        assert!(Command::resize("t1", 0, 40).is_none());
        assert!(Command::resize("t1", 80, 0).is_none());
        assert!(Command::resize("t1", 501, 40).is_none());
        assert!(Command::resize("t1", 500, 500).is_some());
    }
}
