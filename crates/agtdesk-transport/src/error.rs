use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// No open socket for the current generation; the command was not sent.
    #[error("transport is not connected")]
    NotConnected,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("control socket {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control request `{method}` timed out after {millis}ms")]
    Timeout { method: String, millis: u128 },

    #[error("control request failed ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed control response: {0}")]
    BadResponse(String),
}
