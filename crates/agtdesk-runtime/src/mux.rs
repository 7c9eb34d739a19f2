//! The multiplexer facade: one owner for every per-session structure, driven
//! by a single task that handles one inbound frame at a time.
//!
//! Nothing here takes a lock. Inbound frames are checked against the current
//! transport generation, decoded, and routed to terminal callbacks or agent
//! transcripts; the resulting updates fan out to listeners synchronously.

use std::collections::HashMap;

use agtdesk_core::{
    AgentEvent, AgentPayload, AgentSession, AgentStatus, AgentTranscript, AgentUpdate, Frame,
    LineAssembler, OutputStream, TerminalEvent, TerminalSession, TranscriptEntry, decode_binary,
    decode_text, display_name, parse_event, parse_line,
};
use agtdesk_transport::{CommandSink, ControlPlane, Inbound, TaggedFrame};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::directory::SessionDirectory;
use crate::error::MuxError;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::terminal::{OutputHandle, TerminalMultiplexer};

/// Counters for inbound traffic that produced no mutation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MuxStats {
    /// Frames tagged with a superseded generation.
    pub stale_frames: u64,
    /// Frames that failed to decode.
    pub undecodable_frames: u64,
    /// Frames addressed to an agent or terminal that is not tracked.
    pub unknown_target_frames: u64,
    /// Agent output lines that were not valid stream records.
    pub rejected_lines: u64,
}

struct AgentState {
    transcript: AgentTranscript,
    lines: LineAssembler,
}

pub struct Multiplexer<S, C> {
    sink: S,
    control: C,
    home: Option<String>,
    directory: SessionDirectory,
    terminals: TerminalMultiplexer,
    registry: SubscriptionRegistry,
    agents: HashMap<String, AgentState>,
    stats: MuxStats,
}

impl<S: CommandSink, C: ControlPlane> Multiplexer<S, C> {
    /// `home` is collapsed to `~` in activity paths.
    pub fn new(sink: S, control: C, home: Option<String>) -> Self {
        Self {
            sink,
            control,
            home,
            directory: SessionDirectory::new(),
            terminals: TerminalMultiplexer::new(),
            registry: SubscriptionRegistry::new(),
            agents: HashMap::new(),
            stats: MuxStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    // ─── Inbound ──────────────────────────────────────────────────

    pub fn handle_frame(&mut self, frame: TaggedFrame) {
        self.handle_frame_at(frame, Utc::now());
    }

    /// Process one frame with an explicit clock. Never fails: anything that
    /// cannot be applied is logged and counted.
    pub fn handle_frame_at(&mut self, frame: TaggedFrame, now: DateTime<Utc>) {
        let current = self.sink.current_generation();
        if frame.generation != current {
            self.stats.stale_frames += 1;
            tracing::debug!(generation = frame.generation, current, "mux: stale frame dropped");
            return;
        }

        let decoded = match &frame.inbound {
            Inbound::Text(text) => decode_text(text),
            Inbound::Binary(bytes) => decode_binary(bytes),
        };
        match decoded {
            Ok(decoded) => self.route(decoded, now),
            Err(e) => {
                self.stats.undecodable_frames += 1;
                tracing::debug!(error = %e, "mux: undecodable frame dropped");
            }
        }
    }

    fn route(&mut self, frame: Frame, now: DateTime<Utc>) {
        match frame {
            Frame::TerminalOutput { id, data } => {
                if !self.directory.has_terminal(&id) {
                    self.unknown_target("terminal", &id);
                    return;
                }
                self.terminals.route_output(&id, &data);
                self.registry
                    .publish_terminal(&id, &TerminalEvent::Output(data));
            }
            Frame::TerminalExit { id, code } => {
                if !self.directory.mark_exited(&id) {
                    self.unknown_target("terminal", &id);
                    return;
                }
                tracing::info!(terminal_id = %id, code = ?code, "mux: terminal exited");
                self.registry
                    .publish_terminal(&id, &TerminalEvent::Exited { code });
            }
            Frame::AgentOutput {
                agent_id,
                stream,
                data,
            } => self.agent_output(&agent_id, stream, data, now),
            Frame::AgentExit { agent_id, code } => self.agent_exit(&agent_id, code, now),
        }
    }

    fn unknown_target(&mut self, kind: &'static str, id: &str) {
        self.stats.unknown_target_frames += 1;
        tracing::debug!(kind, id, "mux: frame for untracked session dropped");
    }

    fn agent_output(
        &mut self,
        agent_id: &str,
        stream: OutputStream,
        data: AgentPayload,
        now: DateTime<Utc>,
    ) {
        let Some(state) = self.agents.get_mut(agent_id) else {
            self.unknown_target("agent", agent_id);
            return;
        };

        if stream == OutputStream::Stderr {
            let text = match data {
                AgentPayload::Text(text) => text,
                AgentPayload::Event(value) => value.to_string(),
            };
            self.registry
                .publish_transcript(agent_id, &AgentUpdate::Stderr(text));
            return;
        }

        let mut events = Vec::new();
        match data {
            AgentPayload::Text(chunk) => {
                let before = state.lines.discarded();
                for line in state.lines.push(&chunk) {
                    match parse_line(&line) {
                        Ok(Some(event)) => events.push(event),
                        Ok(None) => {}
                        Err(e) => {
                            self.stats.rejected_lines += 1;
                            tracing::debug!(agent_id, error = %e, "mux: agent line rejected");
                        }
                    }
                }
                if state.lines.discarded() > before {
                    tracing::warn!(agent_id, "mux: oversized agent line discarded");
                }
            }
            AgentPayload::Event(value) => match parse_event(&value) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.stats.rejected_lines += 1;
                    tracing::debug!(agent_id, error = %e, "mux: agent record rejected");
                }
            },
        }

        let updates = apply_all(&mut state.transcript, events, now);
        self.publish(agent_id, &updates);
    }

    fn agent_exit(&mut self, agent_id: &str, code: Option<i32>, now: DateTime<Utc>) {
        let Some(state) = self.agents.get_mut(agent_id) else {
            self.unknown_target("agent", agent_id);
            return;
        };
        tracing::info!(agent_id, code = ?code, "mux: agent process exited");

        // A final record without a trailing newline is still a record.
        let mut updates = Vec::new();
        if let Some(tail) = state.lines.flush() {
            match parse_line(&tail) {
                Ok(Some(event)) => updates = state.transcript.apply(event, now),
                Ok(None) => {}
                Err(e) => {
                    self.stats.rejected_lines += 1;
                    tracing::debug!(agent_id, error = %e, "mux: trailing agent line rejected");
                }
            }
        }
        updates.extend(state.transcript.process_exited(code));
        self.publish(agent_id, &updates);
    }

    fn publish(&mut self, agent_id: &str, updates: &[AgentUpdate]) {
        for update in updates {
            self.registry.publish_transcript(agent_id, update);
        }
    }

    /// Drive the mux from the transport's frame channel until cancelled or
    /// the channel closes.
    pub async fn pump(
        &mut self,
        frames: &mut mpsc::UnboundedReceiver<TaggedFrame>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("mux: pump cancelled");
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => {
                        tracing::debug!("mux: frame channel closed");
                        break;
                    }
                },
            }
        }
    }

    // ─── Subscriptions ────────────────────────────────────────────

    pub fn subscribe_transcript(
        &mut self,
        agent_id: &str,
        listener: impl FnMut(&AgentUpdate) + Send + 'static,
    ) -> Subscription {
        self.registry.subscribe_transcript(agent_id, listener)
    }

    pub fn subscribe_terminal_output(
        &mut self,
        terminal_id: &str,
        listener: impl FnMut(&TerminalEvent) + Send + 'static,
    ) -> Subscription {
        self.registry.subscribe_terminal_output(terminal_id, listener)
    }

    pub fn unsubscribe(&mut self, sub: &Subscription) -> bool {
        self.registry.unsubscribe(sub)
    }

    pub fn register_output(
        &mut self,
        terminal_id: &str,
        callback: impl FnMut(&[u8]) + Send + 'static,
    ) -> OutputHandle {
        self.terminals.register_output(terminal_id, callback)
    }

    pub fn unregister_output(&mut self, handle: &OutputHandle) -> bool {
        self.terminals.unregister_output(handle)
    }

    // ─── Outbound ─────────────────────────────────────────────────

    /// Deliver a user message to an agent. The User entry is appended only
    /// after the server accepted it.
    pub async fn send_agent_message(&mut self, agent_id: &str, text: &str) -> Result<(), MuxError> {
        if text.trim().is_empty() {
            return Err(MuxError::EmptyMessage);
        }
        if !self.agents.contains_key(agent_id) {
            return Err(MuxError::UnknownAgent(agent_id.to_owned()));
        }
        self.control.send_agent_message(agent_id, text).await?;

        let updates = match self.agents.get_mut(agent_id) {
            Some(state) => state.transcript.push_user_message(text, Utc::now()),
            None => return Ok(()),
        };
        self.publish(agent_id, &updates);
        Ok(())
    }

    pub fn send_terminal_input(&self, terminal_id: &str, bytes: &[u8]) -> bool {
        TerminalMultiplexer::send_input(&self.sink, terminal_id, bytes)
    }

    pub fn resize_terminal(&self, terminal_id: &str, cols: u16, rows: u16) -> bool {
        TerminalMultiplexer::send_resize(&self.sink, terminal_id, cols, rows)
    }

    // ─── Lifecycle ────────────────────────────────────────────────

    pub async fn create_agent(
        &mut self,
        working_dir: &str,
        name: Option<&str>,
    ) -> Result<AgentSession, MuxError> {
        let agent = self.control.create_agent(working_dir, name).await?;
        tracing::info!(agent_id = %agent.id, working_dir, "mux: agent created");
        self.adopt_agent(agent.clone());
        Ok(agent)
    }

    /// Start tracking an agent the server already runs. Re-adopting an
    /// agent refreshes its metadata and keeps its transcript.
    pub fn adopt_agent(&mut self, agent: AgentSession) -> bool {
        let id = agent.id.clone();
        let added = self.directory.insert_agent(agent);
        let home = self.home.clone();
        self.agents.entry(id.clone()).or_insert_with(|| AgentState {
            transcript: AgentTranscript::new(id.clone(), home),
            lines: LineAssembler::new(),
        });
        if added {
            tracing::debug!(agent_id = %id, "mux: agent adopted");
        }
        added
    }

    /// Adopt every agent the server lists. Returns how many were new.
    pub async fn refresh_agents(&mut self) -> Result<usize, MuxError> {
        let listed = self.control.list_agents().await?;
        Ok(listed
            .into_iter()
            .map(|agent| self.adopt_agent(agent))
            .filter(|added| *added)
            .count())
    }

    /// Kill an agent and cascade to the terminals it owns. Local state is
    /// dropped even when the server call fails.
    pub async fn destroy_agent(&mut self, agent_id: &str) -> Result<(), MuxError> {
        if !self.directory.has_agent(agent_id) {
            return Err(MuxError::UnknownAgent(agent_id.to_owned()));
        }

        for terminal_id in self.directory.terminals_owned_by(agent_id) {
            if let Err(e) = self.destroy_terminal(&terminal_id).await {
                tracing::warn!(agent_id, terminal_id = %terminal_id, error = %e, "mux: cascade terminal destroy failed");
            }
        }

        let result = self.control.destroy_agent(agent_id).await;
        self.directory.remove_agent(agent_id);
        self.agents.remove(agent_id);
        let listeners = self.registry.drop_agent(agent_id);
        tracing::info!(agent_id, listeners, "mux: agent removed");
        result.map_err(MuxError::from)
    }

    pub async fn create_terminal(
        &mut self,
        working_dir: &str,
        name: Option<&str>,
        owner: Option<&str>,
    ) -> Result<TerminalSession, MuxError> {
        if let Some(owner) = owner {
            if !self.directory.has_agent(owner) {
                return Err(MuxError::UnknownAgent(owner.to_owned()));
            }
        }
        TerminalMultiplexer::create_session(&self.control, &mut self.directory, working_dir, name, owner)
            .await
    }

    /// Start routing output for a terminal created elsewhere.
    pub fn adopt_terminal(&mut self, terminal_id: &str, working_dir: &str) -> bool {
        if self.directory.has_terminal(terminal_id) {
            return false;
        }
        self.directory.insert_terminal(TerminalSession {
            id: terminal_id.to_owned(),
            working_dir: working_dir.to_owned(),
            display_name: display_name(working_dir, None),
            owner_agent: None,
            exited: false,
        })
    }

    pub async fn destroy_terminal(&mut self, terminal_id: &str) -> Result<(), MuxError> {
        if !self.directory.has_terminal(terminal_id) {
            return Err(MuxError::UnknownTerminal(terminal_id.to_owned()));
        }
        let result = self
            .terminals
            .destroy_session(&self.control, &mut self.directory, terminal_id)
            .await;
        self.registry.drop_terminal(terminal_id);
        result
    }

    // ─── Read access ──────────────────────────────────────────────

    pub fn transcript(&self, agent_id: &str) -> Option<&[TranscriptEntry]> {
        self.agents.get(agent_id).map(|s| s.transcript.entries())
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.agents.get(agent_id).map(|s| s.transcript.status())
    }

    pub fn tool_running(&self, agent_id: &str) -> Option<bool> {
        self.agents.get(agent_id).map(|s| s.transcript.tool_running())
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSession> {
        self.directory.agents()
    }

    pub fn terminals(&self) -> impl Iterator<Item = &TerminalSession> {
        self.directory.terminals()
    }

    pub fn terminal(&self, terminal_id: &str) -> Option<&TerminalSession> {
        self.directory.terminal(terminal_id)
    }

    pub fn stats(&self) -> MuxStats {
        self.stats
    }
}

fn apply_all(
    transcript: &mut AgentTranscript,
    events: Vec<AgentEvent>,
    now: DateTime<Utc>,
) -> Vec<AgentUpdate> {
    events
        .into_iter()
        .flat_map(|event| transcript.apply(event, now))
        .collect()
}
