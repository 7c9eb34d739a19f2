//! Text and JSON rendering of transcript updates for `agtdesk watch`.

use std::collections::HashMap;
use std::io::IsTerminal;

use agtdesk_core::{AgentUpdate, Role, TodoStatus, TranscriptEntry};
use serde_json::json;

/// Resolve a `--color` flag value against whether stdout is a terminal.
pub fn resolve_color(mode: &str) -> bool {
    match mode {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Render one settled transcript entry as display lines.
pub fn format_entry(entry: &TranscriptEntry, color: bool) -> String {
    let paint = |code: &str, text: &str| {
        if color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    };

    match entry.role {
        Role::User => paint("1;36", &format!("> {}", entry.content)),
        Role::Assistant => entry.content.clone(),
        Role::Activity => {
            let mut line = format!("  \u{23fa} {}", entry.content);
            if let Some(diff) = &entry.diff {
                line.push_str(&format!(" (+{} -{})", diff.added, diff.removed));
            }
            let mut out = paint("2", &line);
            for item in entry.todo_list.iter().flatten() {
                let mark = match item.status {
                    TodoStatus::Done => "[x]",
                    TodoStatus::InProgress => "[~]",
                    TodoStatus::Pending => "[ ]",
                };
                out.push('\n');
                out.push_str(&format!("    {mark} {}", item.text));
            }
            out
        }
    }
}

/// One JSON object per update, for `--json` output.
pub fn update_json(update: &AgentUpdate) -> serde_json::Value {
    match update {
        AgentUpdate::Appended(entry) => json!({"event": "appended", "entry": entry}),
        AgentUpdate::Updated(entry) => json!({"event": "updated", "entry": entry}),
        AgentUpdate::Status(status) => json!({"event": "status", "status": status}),
        AgentUpdate::ToolActivity(running) => json!({"event": "tool_activity", "running": running}),
        AgentUpdate::Stderr(text) => json!({"event": "stderr", "text": text}),
    }
}

/// Turns the update stream into printable chunks. Entries are printed once
/// they stop streaming, and again only if their content later changes.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    color: bool,
    json: bool,
    printed: HashMap<String, String>,
}

impl TranscriptPrinter {
    pub fn new(color: bool, json: bool) -> Self {
        Self {
            color,
            json,
            printed: HashMap::new(),
        }
    }

    /// Returns the text to print for this update, if any.
    pub fn render(&mut self, update: &AgentUpdate) -> Option<String> {
        if self.json {
            return Some(update_json(update).to_string());
        }
        match update {
            AgentUpdate::Appended(entry) | AgentUpdate::Updated(entry) => {
                if entry.streaming || self.printed.get(&entry.id) == Some(&entry.content) {
                    return None;
                }
                let revised = self
                    .printed
                    .insert(entry.id.clone(), entry.content.clone())
                    .is_some();
                let body = format_entry(entry, self.color);
                Some(if revised {
                    format!("(revised) {body}")
                } else {
                    body
                })
            }
            AgentUpdate::Status(status) => Some(format!("[{status}]")),
            AgentUpdate::Stderr(text) => Some(format!("stderr: {}", text.trim_end())),
            AgentUpdate::ToolActivity(_) => None,
        }
    }
}
