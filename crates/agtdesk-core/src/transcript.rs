//! Per-agent transcript reconstruction.
//!
//! An [`AgentTranscript`] consumes one agent's [`AgentEvent`]s in wire order
//! and maintains an ordered list of [`TranscriptEntry`]s. Every call returns
//! the [`AgentUpdate`]s it caused so the runtime can fan them out.
//!
//! Invariant: at most one entry has `streaming == true`, and it is always the
//! entry the turn's open message points at.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::activity::derive_activity;
use crate::stream::{AgentEvent, BlockKind, ContentBlock};
use crate::types::{AgentStatus, AgentUpdate, Role, TranscriptEntry};

/// Assistant message currently (or most recently) being built this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenMessage {
    key: Option<String>,
    index: usize,
    text: String,
}

/// Which assistant message the turn is writing into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum MessageState {
    /// No assistant message has been opened this turn.
    #[default]
    Idle,
    /// `index` is receiving deltas and is marked streaming.
    Streaming(OpenMessage),
    /// A message was opened this turn but no longer receives deltas.
    Closed(OpenMessage),
}

#[derive(Debug, Clone, Default)]
struct TurnState {
    message: MessageState,
    /// Key announced by `message-start` before any entry was opened for it.
    pending_key: Option<String>,
    seen_tool_ids: HashSet<String>,
    tool_running: bool,
}

/// Transcript and turn state for a single agent.
#[derive(Debug, Clone)]
pub struct AgentTranscript {
    agent_id: String,
    home: Option<String>,
    entries: Vec<TranscriptEntry>,
    turn: TurnState,
    status: AgentStatus,
    next_seq: u64,
}

impl AgentTranscript {
    /// `home` is used to abbreviate paths in activity entries.
    pub fn new(agent_id: impl Into<String>, home: Option<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            home,
            entries: Vec::new(),
            turn: TurnState::default(),
            status: AgentStatus::Idle,
            next_seq: 0,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn tool_running(&self) -> bool {
        self.turn.tool_running
    }

    /// The entry currently receiving deltas, if any.
    pub fn streaming_entry(&self) -> Option<&TranscriptEntry> {
        match &self.turn.message {
            MessageState::Streaming(m) => self.entries.get(m.index),
            _ => None,
        }
    }

    /// Apply one event and return the resulting updates.
    pub fn apply(&mut self, event: AgentEvent, now: DateTime<Utc>) -> Vec<AgentUpdate> {
        let mut out = Vec::new();
        match event {
            AgentEvent::Init => {
                self.close_streaming(&mut out);
                self.set_tool_running(false, &mut out);
                self.turn = TurnState::default();
                self.set_status(AgentStatus::Working, &mut out);
            }
            AgentEvent::MessageStart { key } => self.message_start(key, &mut out),
            AgentEvent::AssistantFull { key, blocks } => {
                self.assistant_full(key, blocks, now, &mut out)
            }
            AgentEvent::BlockStart { kind } => match kind {
                BlockKind::Text => {
                    if !matches!(self.turn.message, MessageState::Streaming(_)) {
                        let key = self.turn.pending_key.take();
                        self.open_message(key, String::new(), now, &mut out);
                    }
                }
                BlockKind::ToolUse => self.set_tool_running(true, &mut out),
                BlockKind::Thinking | BlockKind::Other => {}
            },
            AgentEvent::BlockDelta { text } => self.delta(text, now, &mut out),
            AgentEvent::BlockStop => {}
            AgentEvent::ToolUse { id, name, input } => {
                self.record_tool(id, &name, &input, now, &mut out)
            }
            AgentEvent::ToolResult => self.set_tool_running(false, &mut out),
            AgentEvent::Result { final_text } => self.finish(final_text, now, &mut out),
            AgentEvent::Error { message } => self.fail(&message, now, &mut out),
        }
        out
    }

    /// Append a message the user sent to this agent.
    pub fn push_user_message(&mut self, text: &str, now: DateTime<Utc>) -> Vec<AgentUpdate> {
        let mut out = Vec::new();
        self.push_entry(Role::User, text.to_owned(), false, now, &mut out);
        out
    }

    /// The agent process exited: finalize the turn.
    pub fn process_exited(&mut self, code: Option<i32>) -> Vec<AgentUpdate> {
        let mut out = Vec::new();
        self.close_streaming(&mut out);
        self.set_tool_running(false, &mut out);
        self.turn = TurnState::default();
        let status = match code {
            None | Some(0) => AgentStatus::Idle,
            Some(_) => AgentStatus::Error,
        };
        self.set_status(status, &mut out);
        out
    }

    // ─── transitions ──────────────────────────────────────────────

    fn message_start(&mut self, key: String, out: &mut Vec<AgentUpdate>) {
        let switch = match &mut self.turn.message {
            MessageState::Streaming(m) if m.key.is_none() => {
                m.key = Some(key);
                return;
            }
            MessageState::Streaming(m) => m.key.as_deref() != Some(key.as_str()),
            _ => true,
        };
        if switch {
            self.close_streaming(out);
            self.turn.pending_key = Some(key);
        }
    }

    fn assistant_full(
        &mut self,
        key: String,
        blocks: Vec<ContentBlock>,
        now: DateTime<Utc>,
        out: &mut Vec<AgentUpdate>,
    ) {
        let text: String = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();

        let target = match &mut self.turn.message {
            MessageState::Streaming(m)
                if m.key.is_none() || m.key.as_deref() == Some(key.as_str()) =>
            {
                m.key = Some(key.clone());
                if !text.is_empty() {
                    m.text = text.clone();
                }
                Some(m.index)
            }
            MessageState::Closed(m) if m.key.as_deref() == Some(key.as_str()) => {
                if !text.is_empty() {
                    m.text = text.clone();
                }
                Some(m.index)
            }
            _ => None,
        };
        match target {
            Some(index) => {
                if !text.is_empty() {
                    self.set_content(index, text, out);
                }
            }
            // A tool-only snapshot for another message still moves the turn
            // onto that message; its first text opens the entry.
            None if text.is_empty() => {
                self.close_streaming(out);
                self.turn.pending_key = Some(key);
            }
            None => {
                if self.turn.pending_key.as_deref() == Some(key.as_str()) {
                    self.turn.pending_key = None;
                }
                self.open_message(Some(key), text, now, out);
            }
        }

        for block in blocks {
            if let ContentBlock::ToolUse { id, name, input } = block {
                self.record_tool(id, &name, &input, now, out);
            }
        }
    }

    fn delta(&mut self, text: String, now: DateTime<Utc>, out: &mut Vec<AgentUpdate>) {
        let index = match &mut self.turn.message {
            MessageState::Streaming(m) => {
                if text.is_empty() {
                    return;
                }
                m.text.push_str(&text);
                Some((m.index, m.text.clone()))
            }
            _ => None,
        };
        match index {
            Some((index, content)) => self.set_content(index, content, out),
            None => {
                let key = self.turn.pending_key.take();
                self.open_message(key, text, now, out);
            }
        }
    }

    /// Settle the turn. The final text overwrites the message the turn last
    /// opened, which may have been left open across tool calls.
    fn finish(&mut self, final_text: String, now: DateTime<Utc>, out: &mut Vec<AgentUpdate>) {
        match std::mem::take(&mut self.turn.message) {
            MessageState::Idle => {
                if !final_text.is_empty() {
                    self.push_entry(Role::Assistant, final_text, false, now, out);
                }
            }
            MessageState::Streaming(m) | MessageState::Closed(m) => {
                let overwrite = !final_text.is_empty() && m.text != final_text;
                let entry = &mut self.entries[m.index];
                if overwrite || entry.streaming {
                    if overwrite {
                        entry.content = final_text;
                    }
                    entry.streaming = false;
                    out.push(AgentUpdate::Updated(entry.clone()));
                }
            }
        }
        self.set_tool_running(false, out);
        self.turn = TurnState::default();
        self.set_status(AgentStatus::Idle, out);
    }

    fn fail(&mut self, message: &str, now: DateTime<Utc>, out: &mut Vec<AgentUpdate>) {
        match std::mem::take(&mut self.turn.message) {
            MessageState::Streaming(m) | MessageState::Closed(m) => {
                let entry = &mut self.entries[m.index];
                entry.content = if m.text.is_empty() {
                    format!("Error: {message}")
                } else {
                    format!("{}\n\nError: {message}", m.text)
                };
                entry.streaming = false;
                out.push(AgentUpdate::Updated(entry.clone()));
            }
            MessageState::Idle => {
                self.push_entry(Role::Assistant, format!("Error: {message}"), false, now, out);
            }
        }
        self.set_tool_running(false, out);
        self.turn = TurnState::default();
        self.set_status(AgentStatus::Error, out);
    }

    /// Emit an activity entry unless `id` was already recorded this turn.
    /// The open assistant message stays open and keeps receiving deltas.
    fn record_tool(
        &mut self,
        id: String,
        name: &str,
        input: &Value,
        now: DateTime<Utc>,
        out: &mut Vec<AgentUpdate>,
    ) {
        if !self.turn.seen_tool_ids.insert(id) {
            return;
        }

        let activity = derive_activity(name, input, self.home.as_deref());
        let mut entry = TranscriptEntry::text(
            self.next_id(),
            &self.agent_id,
            Role::Activity,
            activity.text,
            now,
            false,
        );
        entry.activity_kind = Some(activity.kind);
        entry.activity_detail = activity.detail;
        entry.diff = activity.diff;
        entry.todo_list = activity.todo_list;
        self.entries.push(entry.clone());
        out.push(AgentUpdate::Appended(entry));
    }

    // ─── helpers ──────────────────────────────────────────────────

    /// Open a new streaming assistant entry, closing any current one.
    fn open_message(
        &mut self,
        key: Option<String>,
        text: String,
        now: DateTime<Utc>,
        out: &mut Vec<AgentUpdate>,
    ) {
        self.close_streaming(out);
        let index = self.push_entry(Role::Assistant, text.clone(), true, now, out);
        self.turn.message = MessageState::Streaming(OpenMessage { key, index, text });
    }

    /// Stop the streaming entry (if any) from receiving further deltas.
    fn close_streaming(&mut self, out: &mut Vec<AgentUpdate>) {
        self.turn.message = match std::mem::take(&mut self.turn.message) {
            MessageState::Streaming(m) => {
                let entry = &mut self.entries[m.index];
                entry.streaming = false;
                out.push(AgentUpdate::Updated(entry.clone()));
                MessageState::Closed(m)
            }
            other => other,
        };
    }

    fn push_entry(
        &mut self,
        role: Role,
        content: String,
        streaming: bool,
        now: DateTime<Utc>,
        out: &mut Vec<AgentUpdate>,
    ) -> usize {
        let entry = TranscriptEntry::text(self.next_id(), &self.agent_id, role, content, now, streaming);
        self.entries.push(entry.clone());
        out.push(AgentUpdate::Appended(entry));
        self.entries.len() - 1
    }

    fn set_content(&mut self, index: usize, content: String, out: &mut Vec<AgentUpdate>) {
        let entry = &mut self.entries[index];
        if entry.content != content {
            entry.content = content;
            out.push(AgentUpdate::Updated(entry.clone()));
        }
    }

    fn set_status(&mut self, status: AgentStatus, out: &mut Vec<AgentUpdate>) {
        if self.status != status {
            self.status = status;
            out.push(AgentUpdate::Status(status));
        }
    }

    fn set_tool_running(&mut self, running: bool, out: &mut Vec<AgentUpdate>) {
        if self.turn.tool_running != running {
            self.turn.tool_running = running;
            out.push(AgentUpdate::ToolActivity(running));
        }
    }

    fn next_id(&mut self) -> String {
        self.next_seq += 1;
        format!("{}-{}", self.agent_id, self.next_seq)
    }
}
