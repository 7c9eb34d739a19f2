//! Terminal multiplexer: output callback slots, keyed input/resize, and
//! session lifecycle through the control plane.
//!
//! A terminal's identity lives in the [`SessionDirectory`]; renderers only
//! attach and detach output callbacks. Detaching never ends the session.

use std::collections::HashMap;

use agtdesk_core::{Command, TerminalSession, display_name};
use agtdesk_transport::{CommandSink, ControlPlane};

use crate::directory::SessionDirectory;
use crate::error::MuxError;

pub type OutputCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Handle for one output registration. Only removes the callback it installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandle {
    id: String,
    slot: u64,
}

impl OutputHandle {
    pub fn terminal_id(&self) -> &str {
        &self.id
    }
}

#[derive(Default)]
pub struct TerminalMultiplexer {
    callbacks: HashMap<String, (u64, OutputCallback)>,
    next_slot: u64,
}

impl TerminalMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the output callback for `id`, replacing any previous one.
    pub fn register_output(
        &mut self,
        id: &str,
        callback: impl FnMut(&[u8]) + Send + 'static,
    ) -> OutputHandle {
        self.next_slot += 1;
        let slot = self.next_slot;
        if self
            .callbacks
            .insert(id.to_owned(), (slot, Box::new(callback)))
            .is_some()
        {
            tracing::debug!(terminal_id = %id, "terminal: output callback replaced");
        }
        OutputHandle {
            id: id.to_owned(),
            slot,
        }
    }

    /// Returns false when the handle's registration was already replaced or removed.
    pub fn unregister_output(&mut self, handle: &OutputHandle) -> bool {
        match self.callbacks.get(&handle.id) {
            Some((slot, _)) if *slot == handle.slot => {
                self.callbacks.remove(&handle.id);
                true
            }
            _ => false,
        }
    }

    pub fn has_output(&self, id: &str) -> bool {
        self.callbacks.contains_key(id)
    }

    /// Hand bytes to the callback for `id`. Without one the bytes are dropped.
    pub fn route_output(&mut self, id: &str, data: &[u8]) -> bool {
        match self.callbacks.get_mut(id) {
            Some((_, callback)) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    /// Remove the callback slot regardless of which handle owns it.
    pub fn forget(&mut self, id: &str) {
        self.callbacks.remove(id);
    }

    /// Fire-and-forget keystrokes. Returns whether the command was handed to
    /// an open transport.
    pub fn send_input<S: CommandSink>(sink: &S, id: &str, bytes: &[u8]) -> bool {
        send(sink, &Command::input(id, bytes))
    }

    /// Fire-and-forget resize. Dimensions outside `1..=500` are dropped locally.
    pub fn send_resize<S: CommandSink>(sink: &S, id: &str, cols: u16, rows: u16) -> bool {
        match Command::resize(id, cols, rows) {
            Some(command) => send(sink, &command),
            None => {
                tracing::debug!(terminal_id = %id, cols, rows, "terminal: resize out of range, dropped");
                false
            }
        }
    }

    /// Ask the server for a new terminal and register it. Nothing is
    /// registered when the server call fails.
    pub async fn create_session<C: ControlPlane>(
        control: &C,
        directory: &mut SessionDirectory,
        working_dir: &str,
        name: Option<&str>,
        owner: Option<&str>,
    ) -> Result<TerminalSession, MuxError> {
        let id = control.create_terminal(working_dir, name, owner).await?;
        let session = TerminalSession {
            id,
            working_dir: working_dir.to_owned(),
            display_name: display_name(working_dir, name),
            owner_agent: owner.map(str::to_owned),
            exited: false,
        };
        tracing::info!(terminal_id = %session.id, owner = ?session.owner_agent, "terminal: created");
        directory.insert_terminal(session.clone());
        Ok(session)
    }

    /// Ask the server to kill a terminal. Local state is removed even when
    /// the server call fails; the failure is still returned.
    pub async fn destroy_session<C: ControlPlane>(
        &mut self,
        control: &C,
        directory: &mut SessionDirectory,
        id: &str,
    ) -> Result<(), MuxError> {
        let result = control.destroy_terminal(id).await;
        self.forget(id);
        directory.remove_terminal(id);
        match result {
            Ok(()) => {
                tracing::info!(terminal_id = %id, "terminal: destroyed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(terminal_id = %id, error = %e, "terminal: server destroy failed, removed locally");
                Err(e.into())
            }
        }
    }
}

fn send<S: CommandSink>(sink: &S, command: &Command) -> bool {
    match sink.send_command(command) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(terminal_id = %command.target(), error = %e, "terminal: command dropped");
            false
        }
    }
}
