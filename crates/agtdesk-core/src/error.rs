//! Error types for the pure core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown todo status: {0}")]
    UnknownTodoStatus(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A frame or agent event that could not be understood.
///
/// Decode errors never reach consumers: the runtime logs and drops them.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unknown frame type: {0}")]
    UnknownFrame(String),

    #[error("malformed binary frame ({len} bytes)")]
    BinaryFrame { len: usize },
}
