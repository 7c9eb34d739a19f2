use agtdesk_transport::TransportError;
use thiserror::Error;

/// Failure of a consumer-initiated multiplexer operation.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unknown agent `{0}`")]
    UnknownAgent(String),

    #[error("unknown terminal `{0}`")]
    UnknownTerminal(String),

    #[error("message text is empty")]
    EmptyMessage,
}
