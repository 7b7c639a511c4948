//! Per-iteration state machine driven by [`ParserEvent`]s.
//!
//! Tracks the agent's phase, pairs tool starts with their results by id,
//! coalesces consecutive same-category tools into display groups, counts
//! activity, and picks up commits announced in command output.
//!
//! The machine never fails. Out-of-order or unknown events are absorbed and
//! only show up through counters and the activity log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::activity::{ActivityItem, ActivityLog, DEFAULT_ACTIVITY_CAP};
use crate::core::events::ParserEvent;
use crate::core::tools::{CommitInfo, categorize, detect_commit, display_name};
use crate::core::types::{Phase, Stats, ToolCategory};

/// Longest `task_text` kept, in characters.
pub const TASK_TEXT_MAX_CHARS: usize = 100;

/// A tool invocation that has started but not finished.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTool {
    pub id: String,
    pub name: String,
    pub category: ToolCategory,
    pub start_time: DateTime<Utc>,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTool {
    pub id: String,
    pub name: String,
    pub category: ToolCategory,
    pub duration_ms: u64,
    pub is_error: bool,
    pub output: String,
}

/// Maximal run of consecutively completed tools sharing one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolGroup {
    pub category: ToolCategory,
    pub tools: Vec<CompletedTool>,
    pub total_duration_ms: u64,
}

/// The agent's own end-of-session summary, kept as received.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub duration_ms: Option<u64>,
    pub is_error: bool,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct IterationState {
    pub iteration: u32,
    pub total_iterations: u32,
    pub phase: Phase,
    pub start_time: DateTime<Utc>,
    /// First text the agent produced this iteration. Set once.
    pub task_text: Option<String>,
    pub active_tools: HashMap<String, ActiveTool>,
    pub completed_tools: Vec<CompletedTool>,
    pub tool_groups: Vec<ToolGroup>,
    pub stats: Stats,
    pub activity_log: ActivityLog,
    pub result: Option<SessionResult>,
    /// First commit observed this iteration. Set once.
    pub last_commit: Option<CommitInfo>,
}

impl IterationState {
    fn new(iteration: u32, total_iterations: u32, activity_cap: usize, now: DateTime<Utc>) -> Self {
        Self {
            iteration,
            total_iterations,
            phase: Phase::Idle,
            start_time: now,
            task_text: None,
            active_tools: HashMap::new(),
            completed_tools: Vec::new(),
            tool_groups: Vec::new(),
            stats: Stats::default(),
            activity_log: ActivityLog::new(activity_cap),
            result: None,
            last_commit: None,
        }
    }
}

/// Owns one [`IterationState`] and mutates it only through event handling.
///
/// Not thread-safe; feed it from the single consumer of the event stream.
#[derive(Debug, Clone)]
pub struct IterationStateMachine {
    state: IterationState,
    activity_cap: usize,
}

impl IterationStateMachine {
    pub fn new(iteration: u32, total_iterations: u32) -> Self {
        Self::with_activity_cap(iteration, total_iterations, DEFAULT_ACTIVITY_CAP)
    }

    pub fn with_activity_cap(iteration: u32, total_iterations: u32, activity_cap: usize) -> Self {
        Self {
            state: IterationState::new(iteration, total_iterations, activity_cap, Utc::now()),
            activity_cap,
        }
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Start a fresh iteration, keeping the current numbering unless overridden.
    pub fn reset(&mut self, iteration: Option<u32>, total_iterations: Option<u32>) {
        self.reset_at(iteration, total_iterations, Utc::now());
    }

    pub fn reset_at(
        &mut self,
        iteration: Option<u32>,
        total_iterations: Option<u32>,
        now: DateTime<Utc>,
    ) {
        let iteration = iteration.unwrap_or(self.state.iteration);
        let total_iterations = total_iterations.unwrap_or(self.state.total_iterations);
        self.state = IterationState::new(iteration, total_iterations, self.activity_cap, now);
    }

    /// Apply one event. Returns the activity items it appended, in order.
    pub fn handle(&mut self, event: &ParserEvent) -> Vec<ActivityItem> {
        self.handle_at(event, Utc::now())
    }

    /// Like [`Self::handle`] with an explicit clock reading.
    pub fn handle_at(&mut self, event: &ParserEvent, now: DateTime<Utc>) -> Vec<ActivityItem> {
        if self.state.phase == Phase::Done {
            return Vec::new();
        }
        let mut appended = Vec::new();
        match event {
            ParserEvent::Text { text } => self.on_text(text, now, &mut appended),
            ParserEvent::ToolStart {
                tool_use_id,
                tool_name,
                input,
            } => self.on_tool_start(tool_use_id, tool_name, input, now, &mut appended),
            ParserEvent::ToolEnd {
                tool_use_id,
                content,
                is_error,
            } => self.on_tool_end(tool_use_id, content, *is_error, now, &mut appended),
            ParserEvent::Result {
                duration_ms,
                is_error,
                num_turns,
                total_cost_usd,
                usage,
            } => {
                self.state.result = Some(SessionResult {
                    duration_ms: *duration_ms,
                    is_error: *is_error,
                    num_turns: *num_turns,
                    total_cost_usd: *total_cost_usd,
                    usage: usage.clone(),
                });
                self.state.phase = Phase::Done;
            }
            ParserEvent::Init { .. } | ParserEvent::Error { .. } => {}
        }
        for item in &appended {
            self.state.activity_log.push(item.clone());
        }
        appended
    }

    fn on_text(&mut self, text: &str, now: DateTime<Utc>, appended: &mut Vec<ActivityItem>) {
        let trimmed = text.trim();
        if self.state.task_text.is_none() && !trimmed.is_empty() {
            self.state.task_text = Some(trimmed.chars().take(TASK_TEXT_MAX_CHARS).collect());
        }
        if self.state.phase == Phase::Idle {
            self.state.phase = Phase::Thinking;
        }
        if !trimmed.is_empty() {
            appended.push(ActivityItem::Thought {
                timestamp: now,
                text: trimmed.to_string(),
            });
        }
    }

    fn on_tool_start(
        &mut self,
        id: &str,
        name: &str,
        input: &Value,
        now: DateTime<Utc>,
        appended: &mut Vec<ActivityItem>,
    ) {
        let category = categorize(name);
        self.state.active_tools.insert(
            id.to_string(),
            ActiveTool {
                id: id.to_string(),
                name: name.to_string(),
                category,
                start_time: now,
                input: input.clone(),
            },
        );
        self.state.stats.tools_started += 1;
        self.state.phase = category.phase();
        appended.push(ActivityItem::ToolStart {
            timestamp: now,
            tool_use_id: id.to_string(),
            tool_name: name.to_string(),
            display_name: display_name(name, category, input),
        });
    }

    fn on_tool_end(
        &mut self,
        id: &str,
        content: &str,
        is_error: bool,
        now: DateTime<Utc>,
        appended: &mut Vec<ActivityItem>,
    ) {
        let Some(active) = self.state.active_tools.remove(id) else {
            return;
        };
        let duration_ms = (now - active.start_time).num_milliseconds().max(0) as u64;
        let completed = CompletedTool {
            id: active.id.clone(),
            name: active.name.clone(),
            category: active.category,
            duration_ms,
            is_error,
            output: content.to_string(),
        };

        let stats = &mut self.state.stats;
        stats.tools_completed += 1;
        if is_error {
            stats.tools_errored += 1;
        }
        stats.record_category(active.category);

        self.state.completed_tools.push(completed.clone());
        self.coalesce(completed);

        appended.push(ActivityItem::ToolComplete {
            timestamp: now,
            tool_use_id: active.id.clone(),
            tool_name: active.name.clone(),
            display_name: display_name(&active.name, active.category, &active.input),
            duration_ms,
            is_error,
        });

        self.state.phase = self
            .state
            .active_tools
            .values()
            .map(|tool| tool.category)
            .max_by_key(|category| category.priority())
            .map_or(Phase::Thinking, ToolCategory::phase);

        if active.category == ToolCategory::Command
            && !is_error
            && let Some(commit) = detect_commit(content)
        {
            appended.push(ActivityItem::Commit {
                timestamp: now,
                hash: commit.hash.clone(),
                message: commit.message.clone(),
            });
            if self.state.last_commit.is_none() {
                self.state.last_commit = Some(commit);
            }
        }
    }

    fn coalesce(&mut self, tool: CompletedTool) {
        match self.state.tool_groups.last_mut() {
            Some(group) if group.category == tool.category => {
                group.total_duration_ms += tool.duration_ms;
                group.tools.push(tool);
            }
            _ => self.state.tool_groups.push(ToolGroup {
                category: tool.category,
                total_duration_ms: tool.duration_ms,
                tools: vec![tool],
            }),
        }
    }
}
