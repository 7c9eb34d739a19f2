//! agtdesk-core: pure model of the session event multiplexer.
//! Wire codec, agent stream decoding, activity derivation and per-agent
//! transcript reconstruction. No I/O, no async runtime.

pub mod activity;
pub mod error;
pub mod frame;
pub mod lines;
pub mod stream;
pub mod transcript;
pub mod types;

pub use activity::{Activity, derive_activity, shorten_path};
pub use error::{CoreError, DecodeError};
pub use frame::{AgentPayload, Command, Frame, OutputStream, decode_binary, decode_text};
pub use lines::LineAssembler;
pub use stream::{AgentEvent, BlockKind, ContentBlock, parse_event, parse_line};
pub use transcript::AgentTranscript;
pub use types::{
    ActivityKind, AgentSession, AgentStatus, AgentUpdate, FileDiff, Role, TerminalEvent,
    TerminalSession, TodoItem, TodoStatus, TranscriptEntry, display_name,
};
