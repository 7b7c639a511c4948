//! Reader for the Markdown task document the agent works through.
//!
//! The agent rewrites the document between iterations; the supervisor only
//! reads it. Tasks look like:
//!
//! ```markdown
//! ### T001: Parse config
//! - **Status**: pending
//! - **Size**: S
//! - **Deliverables**:
//!   - src/config.rs
//! - **Verify**: `cargo test config`
//! - **Depends on**: T000
//! ```
//!
//! Older documents used bare checkboxes (`- [ ] item`). Those are reported as
//! [`TaskDocument::Legacy`] instead of failing so callers can degrade.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::dependencies::{parse_dependency_refs, parse_inline_dependencies, push_unique};
use crate::core::types::{Task, TaskSize, TaskStatus};

static TASK_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#{2,4}\s+(T\d+)\s*[:\-]\s*(.*?)\s*$").unwrap()
});
static ANY_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s").unwrap());
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\*\*([^*:]+?)\s*:?\s*\*\*\s*:?\s*(.*?)\s*$").unwrap()
});
static NESTED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{2,}[-*]\s+(.+?)\s*$").unwrap());
static SIZE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[(S|M|L)\]\s*$").unwrap());
static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[[ xX]\]").unwrap());

/// Result of reading a task document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDocument {
    NotFound,
    /// Checkbox-style document without task headings.
    Legacy { warning: String },
    Current(TaskList),
}

/// Aggregate completion counts. `completed` counts passed and failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.tasks.iter().filter(|t| t.status.is_terminal()).count(),
            total: self.tasks.len(),
        }
    }
}

/// Read and parse the task document at `path`.
///
/// A missing file is [`TaskDocument::NotFound`]; other I/O failures are errors.
pub fn read_task_document(path: &Path) -> Result<TaskDocument> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "task document not found");
            return Ok(TaskDocument::NotFound);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read task document {}", path.display()));
        }
    };
    Ok(parse_task_document(&contents))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListField {
    Deliverables,
}

struct TaskDraft {
    id: String,
    title: String,
    status: Option<TaskStatus>,
    size: Option<TaskSize>,
    title_size: Option<TaskSize>,
    deliverables: Vec<String>,
    verify: Option<String>,
    dependencies: Vec<String>,
    body: String,
    list: Option<ListField>,
}

impl TaskDraft {
    fn new(id: &str, raw_title: &str) -> Self {
        let title_size = SIZE_TAG_RE
            .captures(raw_title)
            .and_then(|caps| parse_size(&caps[1]));
        let title = SIZE_TAG_RE.replace(raw_title, "").trim().to_string();
        Self {
            id: id.to_string(),
            title,
            status: None,
            size: None,
            title_size,
            deliverables: Vec::new(),
            verify: None,
            dependencies: Vec::new(),
            body: String::new(),
            list: None,
        }
    }

    fn apply_line(&mut self, line: &str) {
        self.body.push_str(line);
        self.body.push('\n');

        if let Some(caps) = FIELD_RE.captures(line) {
            let label = caps[1].trim().to_ascii_lowercase();
            let value = caps[2].trim();
            self.list = None;
            match label.as_str() {
                "status" => self.status = Some(parse_status(value)),
                "size" => self.size = parse_size(value),
                "verify" | "verification" => {
                    let verify = strip_code(value);
                    self.verify = (!verify.is_empty()).then(|| verify.to_string());
                }
                "deliverables" | "deliverable" => {
                    if !value.is_empty() {
                        self.deliverables.push(strip_code(value).to_string());
                    }
                    self.list = Some(ListField::Deliverables);
                }
                "depends on" | "dependencies" | "depends" => {
                    for id in parse_dependency_refs(value) {
                        push_unique(&mut self.dependencies, &id);
                    }
                }
                _ => {}
            }
            return;
        }

        if let Some(caps) = NESTED_ITEM_RE.captures(line) {
            if self.list == Some(ListField::Deliverables) {
                self.deliverables.push(strip_code(&caps[1]).to_string());
            }
            return;
        }

        if !line.trim().is_empty() {
            self.list = None;
        }
    }

    fn finish(mut self) -> Task {
        for id in parse_inline_dependencies(&self.body) {
            if id != self.id {
                push_unique(&mut self.dependencies, &id);
            }
        }
        Task {
            id: self.id,
            title: self.title,
            status: self.status.unwrap_or(TaskStatus::Pending),
            size: self.size.or(self.title_size).unwrap_or(TaskSize::M),
            deliverables: self.deliverables,
            verify: self.verify,
            dependencies: self.dependencies,
        }
    }
}

/// Parse document text. Never fails; unrecognized content is ignored.
pub fn parse_task_document(contents: &str) -> TaskDocument {
    let mut tasks = Vec::new();
    let mut current: Option<TaskDraft> = None;
    let mut checkboxes = 0usize;

    for line in contents.lines() {
        if let Some(caps) = TASK_HEADING_RE.captures(line) {
            if let Some(draft) = current.take() {
                tasks.push(draft.finish());
            }
            current = Some(TaskDraft::new(&caps[1], &caps[2]));
            continue;
        }
        if ANY_HEADING_RE.is_match(line) {
            if let Some(draft) = current.take() {
                tasks.push(draft.finish());
            }
            continue;
        }
        if CHECKBOX_RE.is_match(line) {
            checkboxes += 1;
        }
        if let Some(draft) = current.as_mut() {
            draft.apply_line(line);
        }
    }
    if let Some(draft) = current.take() {
        tasks.push(draft.finish());
    }

    if tasks.is_empty() && checkboxes > 0 {
        return TaskDocument::Legacy {
            warning: format!(
                "legacy checkbox task format ({checkboxes} items) is not supported; \
                 convert items to `### T001: Title` task headings"
            ),
        };
    }
    debug!(tasks = tasks.len(), "parsed task document");
    TaskDocument::Current(TaskList { tasks })
}

fn parse_status(value: &str) -> TaskStatus {
    let normalized: String = value
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    match normalized.trim_matches('_') {
        "in_progress" | "inprogress" | "wip" | "started" => TaskStatus::InProgress,
        "passed" | "pass" | "done" | "complete" | "completed" => TaskStatus::Passed,
        "failed" | "fail" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

fn parse_size(value: &str) -> Option<TaskSize> {
    let value = strip_code(value).to_ascii_lowercase();
    let word = value.split(|c: char| !c.is_ascii_alphabetic()).next()?;
    match word {
        "s" | "small" => Some(TaskSize::S),
        "m" | "medium" => Some(TaskSize::M),
        "l" | "large" => Some(TaskSize::L),
        _ => None,
    }
}

fn strip_code(value: &str) -> &str {
    value.trim().trim_matches('`').trim()
}
