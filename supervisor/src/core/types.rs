//! Shared deterministic types for supervisor core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};

/// Coarse classification of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Write,
    Command,
    Meta,
}

impl ToolCategory {
    /// Phase the agent is considered to be in while a tool of this category runs.
    pub fn phase(self) -> Phase {
        match self {
            ToolCategory::Read => Phase::Reading,
            ToolCategory::Write => Phase::Editing,
            ToolCategory::Command => Phase::Running,
            ToolCategory::Meta => Phase::Thinking,
        }
    }

    /// Priority used to pick the displayed phase when several tools are in flight.
    ///
    /// `Command > Write > Read > Meta`.
    pub fn priority(self) -> u8 {
        match self {
            ToolCategory::Command => 3,
            ToolCategory::Write => 2,
            ToolCategory::Read => 1,
            ToolCategory::Meta => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Write => "write",
            ToolCategory::Command => "command",
            ToolCategory::Meta => "meta",
        }
    }
}

/// Execution phase of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Reading,
    Editing,
    Writing,
    Running,
    Thinking,
    Done,
}

/// Per-iteration tool counters. Monotonic until the iteration is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub tools_started: u32,
    pub tools_completed: u32,
    pub tools_errored: u32,
    pub reads: u32,
    pub writes: u32,
    pub commands: u32,
    pub meta_ops: u32,
}

impl Stats {
    pub(crate) fn record_category(&mut self, category: ToolCategory) {
        match category {
            ToolCategory::Read => self.reads += 1,
            ToolCategory::Write => self.writes += 1,
            ToolCategory::Command => self.commands += 1,
            ToolCategory::Meta => self.meta_ops += 1,
        }
    }
}

/// Lifecycle status of a task in the task document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
}

impl TaskStatus {
    /// True once the agent has settled the task either way.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Passed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Relative task size used for budget accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskSize {
    S,
    M,
    L,
}

impl TaskSize {
    pub fn points(self) -> u32 {
        match self {
            TaskSize::S => 1,
            TaskSize::M => 2,
            TaskSize::L => 4,
        }
    }

    /// M and L tasks are "large" for conservative scheduling.
    pub fn is_large(self) -> bool {
        matches!(self, TaskSize::M | TaskSize::L)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskSize::S => "S",
            TaskSize::M => "M",
            TaskSize::L => "L",
        }
    }
}

/// A unit of work parsed from the task document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub size: TaskSize,
    pub deliverables: Vec<String>,
    pub verify: Option<String>,
    /// Referenced task ids, in first-mention order.
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn size_points(&self) -> u32 {
        self.size.points()
    }
}

/// Sealed output of one control-loop pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub duration_ms: u64,
    pub stats: Stats,
    pub error: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
}

impl IterationResult {
    pub fn failed(iteration: u32, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            iteration,
            duration_ms,
            stats: Stats::default(),
            error: Some(error.into()),
            commit_hash: None,
            commit_message: None,
        }
    }
}
