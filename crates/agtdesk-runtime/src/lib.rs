//! agtdesk-runtime: the session event multiplexer.
//!
//! [`Multiplexer`] owns the session directory, terminal output slots, agent
//! transcripts and listener registry, and is driven by one task through
//! [`Multiplexer::pump`].

pub mod directory;
pub mod error;
pub mod mux;
pub mod registry;
pub mod terminal;

pub use directory::SessionDirectory;
pub use error::MuxError;
pub use mux::{Multiplexer, MuxStats};
pub use registry::{Subscription, SubscriptionRegistry, Topic};
pub use terminal::{OutputHandle, TerminalMultiplexer};
