use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ─── Sessions ─────────────────────────────────────────────────────

/// A supervised coding-agent process bound to a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub working_dir: String,
    pub display_name: String,
}

/// An interactive shell session, optionally owned by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: String,
    pub working_dir: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_agent: Option<String>,
    /// Set once the server reports the shell process exited.
    #[serde(default)]
    pub exited: bool,
}

/// Name shown for a session: the explicit name, else the last segment of the
/// working directory.
pub fn display_name(working_dir: &str, name: Option<&str>) -> String {
    if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_owned();
    }
    working_dir
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(working_dir)
        .to_owned()
}

// ─── Agent status ─────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Transcript entries ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Activity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Read,
    Write,
    Edit,
    Shell,
    Search,
    Tool,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Shell => "shell",
            Self::Search => "search",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code change extracted from a file-writing tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

impl FromStr for TodoStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Done),
            _ => Err(CoreError::UnknownTodoStatus(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub status: TodoStatus,
}

/// One rendered line of an agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub agent_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True only for the entry currently receiving deltas.
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_kind: Option<ActivityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<FileDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_list: Option<Vec<TodoItem>>,
}

impl TranscriptEntry {
    pub fn text(
        id: String,
        agent_id: &str,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
        streaming: bool,
    ) -> Self {
        Self {
            id,
            agent_id: agent_id.to_owned(),
            role,
            content,
            timestamp,
            streaming,
            activity_kind: None,
            activity_detail: None,
            diff: None,
            todo_list: None,
        }
    }
}

// ─── Subscriber payloads ──────────────────────────────────────────

/// Mutation published to transcript subscribers of one agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    Appended(TranscriptEntry),
    Updated(TranscriptEntry),
    Status(AgentStatus),
    /// Transient "tool in progress" indicator; never a transcript entry.
    ToolActivity(bool),
    /// Raw stderr text from the agent process.
    Stderr(String),
}

/// Event published to terminal-output subscribers of one terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Output(Vec<u8>),
    Exited { code: Option<i32> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn todo_status_parses_agent_spellings() {
        assert_eq!("pending".parse::<TodoStatus>().unwrap(), TodoStatus::Pending);
        assert_eq!(
            "in_progress".parse::<TodoStatus>().unwrap(),
            TodoStatus::InProgress
        );
        assert_eq!("completed".parse::<TodoStatus>().unwrap(), TodoStatus::Done);
        assert!("blocked".parse::<TodoStatus>().is_err());
    }

    #[test]
    fn entry_serializes_without_empty_extras() {
        let ts = DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid")
            .with_timezone(&Utc);
        let entry = TranscriptEntry::text("a1-1".into(), "a1", Role::Assistant, "hi".into(), ts, true);
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["streaming"], true);
        assert!(json.get("diff").is_none());
        assert!(json.get("activity_kind").is_none());
    }

    #[test]
    fn display_name_prefers_explicit_name() {
        assert_eq!(display_name("/Users/vm/project", Some("api")), "api");
        assert_eq!(display_name("/Users/vm/project/", None), "project");
        assert_eq!(display_name("/Users/vm/project", Some("  ")), "project");
        assert_eq!(display_name("/", None), "/");
    }

    #[test]
    fn status_display() {
        assert_eq!(AgentStatus::Working.to_string(), "working");
        assert_eq!(AgentStatus::default(), AgentStatus::Idle);
    }
}
