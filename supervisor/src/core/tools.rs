//! Fixed tool vocabulary: categories, display names, commit detection.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::types::ToolCategory;

/// Longest display name shown for a tool invocation, in characters.
pub const DISPLAY_NAME_MAX_CHARS: usize = 40;

const READ_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "NotebookRead",
    "WebFetch",
    "WebSearch",
];
const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const COMMAND_TOOLS: &[&str] = &["Bash", "BashOutput", "KillShell"];

/// `git commit` summary line: `[<ref> <hash>] <message>`.
static COMMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\S+) ([a-f0-9]{7,40})\] (.+)").unwrap());

/// Map a tool name onto its category. Unknown tools are `Meta`.
pub fn categorize(tool_name: &str) -> ToolCategory {
    if READ_TOOLS.contains(&tool_name) {
        ToolCategory::Read
    } else if WRITE_TOOLS.contains(&tool_name) {
        ToolCategory::Write
    } else if COMMAND_TOOLS.contains(&tool_name) {
        ToolCategory::Command
    } else {
        ToolCategory::Meta
    }
}

/// Short human label for a tool invocation, derived from its input.
///
/// Falls back to the tool name when the input carries nothing useful.
pub fn display_name(tool_name: &str, category: ToolCategory, input: &Value) -> String {
    let label = match category {
        ToolCategory::Read => str_field(input, "file_path")
            .or_else(|| str_field(input, "notebook_path"))
            .map(base_name)
            .or_else(|| str_field(input, "pattern").map(str::to_string))
            .or_else(|| str_field(input, "url").map(str::to_string))
            .or_else(|| str_field(input, "query").map(str::to_string))
            .or_else(|| str_field(input, "path").map(base_name)),
        ToolCategory::Write => str_field(input, "file_path")
            .or_else(|| str_field(input, "notebook_path"))
            .map(base_name),
        ToolCategory::Command => str_field(input, "command")
            .and_then(|cmd| cmd.split_whitespace().next())
            .map(str::to_string),
        ToolCategory::Meta => str_field(input, "description")
            .or_else(|| str_field(input, "subagent_type"))
            .map(str::to_string),
    };
    truncate_chars(
        label.as_deref().unwrap_or(tool_name),
        DISPLAY_NAME_MAX_CHARS,
    )
}

/// A commit announced in a command's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

/// Find the first `[<ref> <hash>] <message>` line in command output.
pub fn detect_commit(output: &str) -> Option<CommitInfo> {
    let caps = COMMIT_RE.captures(output)?;
    Some(CommitInfo {
        hash: caps[2].to_string(),
        message: caps[3].trim().to_string(),
    })
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
