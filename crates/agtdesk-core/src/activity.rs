//! Activity derivation: maps a tool invocation to a human-readable
//! transcript line plus structured side payloads (diffs, task lists).

use serde_json::Value;

use crate::types::{ActivityKind, FileDiff, TodoItem, TodoStatus};

/// Longest shell command shown before truncation.
pub const MAX_COMMAND_CHARS: usize = 60;

/// Line-diff inputs larger than this (lines before × lines after) skip the
/// LCS pass and report whole-side counts.
const MAX_DIFF_CELLS: usize = 1_000_000;

/// Display form of a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub text: String,
    pub detail: Option<String>,
    pub diff: Option<FileDiff>,
    pub todo_list: Option<Vec<TodoItem>>,
}

impl Activity {
    fn new(kind: ActivityKind, text: String) -> Self {
        Self {
            kind,
            text,
            detail: None,
            diff: None,
            todo_list: None,
        }
    }

    fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

/// Derive the activity for tool `name` invoked with `input`.
///
/// `home` is the home directory used to abbreviate paths to `~`.
pub fn derive_activity(name: &str, input: &Value, home: Option<&str>) -> Activity {
    match name {
        "Read" => path_activity(ActivityKind::Read, "Read", input, home),
        "Write" => {
            let mut activity = path_activity(ActivityKind::Write, "Write", input, home);
            if let (Some(path), Some(content)) = (file_path(input), str_field(input, "content")) {
                activity.diff = Some(FileDiff {
                    path: path.to_owned(),
                    before: None,
                    after: Some(content.to_owned()),
                    added: content.lines().count(),
                    removed: 0,
                });
            }
            activity
        }
        "Edit" => {
            let mut activity = path_activity(ActivityKind::Edit, "Edit", input, home);
            if let Some(path) = file_path(input) {
                let before = str_field(input, "old_string").unwrap_or_default();
                let after = str_field(input, "new_string").unwrap_or_default();
                let (added, removed) = count_line_changes(before, after);
                activity.diff = Some(FileDiff {
                    path: path.to_owned(),
                    before: Some(before.to_owned()),
                    after: Some(after.to_owned()),
                    added,
                    removed,
                });
            }
            activity
        }
        "MultiEdit" => multi_edit_activity(input, home),
        "NotebookEdit" => {
            let path = str_field(input, "notebook_path").or_else(|| file_path(input));
            match path {
                Some(path) => Activity::new(
                    ActivityKind::Edit,
                    format!("Edit {}", shorten_path(path, home)),
                )
                .with_detail(Some(path.to_owned())),
                None => Activity::new(ActivityKind::Edit, "Edit".to_owned()),
            }
        }
        "Bash" => {
            let command = str_field(input, "command").unwrap_or_default();
            Activity::new(ActivityKind::Shell, truncate_command(command))
                .with_detail(Some(command.to_owned()))
        }
        "Grep" => {
            let pattern = str_field(input, "pattern").unwrap_or_default();
            Activity::new(ActivityKind::Search, format!("Search {pattern}"))
                .with_detail(str_field(input, "path").map(str::to_owned))
        }
        "Glob" => {
            let pattern = str_field(input, "pattern").unwrap_or("*");
            Activity::new(ActivityKind::Search, format!("Find {pattern}"))
                .with_detail(str_field(input, "path").map(str::to_owned))
        }
        "WebSearch" => {
            let query = str_field(input, "query").unwrap_or_default();
            Activity::new(ActivityKind::Search, format!("Search web: {query}"))
                .with_detail(Some(query.to_owned()))
        }
        "WebFetch" => {
            let url = str_field(input, "url").unwrap_or_default();
            Activity::new(ActivityKind::Read, format!("Fetch {url}"))
                .with_detail(Some(url.to_owned()))
        }
        "TodoWrite" => todo_activity(input),
        "Task" => {
            let text = match str_field(input, "description") {
                Some(desc) if !desc.is_empty() => format!("Task: {desc}"),
                _ => "Task".to_owned(),
            };
            Activity::new(ActivityKind::Tool, text)
                .with_detail(str_field(input, "prompt").map(str::to_owned))
        }
        _ => Activity::new(ActivityKind::Tool, name.to_owned()),
    }
}

fn path_activity(kind: ActivityKind, verb: &str, input: &Value, home: Option<&str>) -> Activity {
    match file_path(input) {
        Some(path) => Activity::new(kind, format!("{verb} {}", shorten_path(path, home)))
            .with_detail(Some(path.to_owned())),
        None => Activity::new(kind, verb.to_owned()),
    }
}

fn multi_edit_activity(input: &Value, home: Option<&str>) -> Activity {
    let edits = input
        .get("edits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let Some(path) = file_path(input) else {
        return Activity::new(ActivityKind::Edit, "Edit".to_owned());
    };

    let mut befores = Vec::with_capacity(edits.len());
    let mut afters = Vec::with_capacity(edits.len());
    let (mut added, mut removed) = (0, 0);
    for edit in edits {
        let before = str_field(edit, "old_string").unwrap_or_default();
        let after = str_field(edit, "new_string").unwrap_or_default();
        let (a, r) = count_line_changes(before, after);
        added += a;
        removed += r;
        befores.push(before);
        afters.push(after);
    }

    let noun = if edits.len() == 1 { "edit" } else { "edits" };
    let mut activity = Activity::new(
        ActivityKind::Edit,
        format!("Edit {} ({} {noun})", shorten_path(path, home), edits.len()),
    )
    .with_detail(Some(path.to_owned()));
    activity.diff = Some(FileDiff {
        path: path.to_owned(),
        before: Some(befores.join("\n")),
        after: Some(afters.join("\n")),
        added,
        removed,
    });
    activity
}

fn todo_activity(input: &Value) -> Activity {
    let todos: Vec<TodoItem> = input
        .get("todos")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = str_field(item, "content").or_else(|| str_field(item, "text"))?;
                    let status = str_field(item, "status")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(TodoStatus::Pending);
                    Some(TodoItem {
                        text: text.to_owned(),
                        status,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let done = todos
        .iter()
        .filter(|t| t.status == TodoStatus::Done)
        .count();
    let mut activity = Activity::new(
        ActivityKind::Tool,
        format!("Update tasks ({done}/{})", todos.len()),
    );
    activity.todo_list = Some(todos);
    activity
}

/// Abbreviate a path for display.
///
/// The home prefix becomes `~`; paths with more than three `/`-separated
/// segments are reduced to `.../<parent>/<name>`.
pub fn shorten_path(path: &str, home: Option<&str>) -> String {
    let mut display = path.to_owned();
    if let Some(home) = home.map(|h| h.trim_end_matches('/')).filter(|h| !h.is_empty()) {
        if path == home {
            display = "~".to_owned();
        } else if let Some(rest) = path.strip_prefix(home).filter(|r| r.starts_with('/')) {
            display = format!("~{rest}");
        }
    }

    let segments: Vec<&str> = display.split('/').collect();
    if segments.len() > 3 {
        let n = segments.len();
        format!(".../{}/{}", segments[n - 2], segments[n - 1])
    } else {
        display
    }
}

/// Shorten a shell command to `MAX_COMMAND_CHARS` characters plus an ellipsis.
pub fn truncate_command(command: &str) -> String {
    let command = command.trim();
    if command.chars().count() <= MAX_COMMAND_CHARS {
        return command.to_owned();
    }
    let mut short: String = command.chars().take(MAX_COMMAND_CHARS).collect();
    short.push('…');
    short
}

/// Count `(added, removed)` lines between two texts using a longest common
/// subsequence over lines.
pub fn count_line_changes(before: &str, after: &str) -> (usize, usize) {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    if old.is_empty() || new.is_empty() || old.len().saturating_mul(new.len()) > MAX_DIFF_CELLS {
        return (new.len(), old.len());
    }

    let mut prev = vec![0u32; new.len() + 1];
    let mut curr = vec![0u32; new.len() + 1];
    for o in &old {
        for (j, n) in new.iter().enumerate() {
            curr[j + 1] = if o == n {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let common = prev[new.len()] as usize;
    (new.len() - common, old.len() - common)
}

fn file_path(input: &Value) -> Option<&str> {
    str_field(input, "file_path").or_else(|| str_field(input, "path"))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
