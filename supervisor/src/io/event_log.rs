//! Product-facing lifecycle sinks: the per-run JSONL log and console lines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::lifecycle::{EventSink, LifecycleEvent, LifecycleKind};

/// Paths for one run's artifacts under `.supervisor/runs/<run-id>/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(".supervisor").join("runs").join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            dir,
        }
    }
}

/// Run id derived from the start time, e.g. `run-20260119-142501`.
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    format!("run-{}", started_at.format("%Y%m%d-%H%M%S"))
}

/// Appends each event as one JSON line, flushing after every write.
pub struct JsonlEventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlEventLog {
    pub fn create(paths: &RunPaths) -> Result<Self> {
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run dir {}", paths.dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.events_path)
            .with_context(|| format!("open event log {}", paths.events_path.display()))?;
        Ok(Self {
            path: paths.events_path.clone(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, event: &LifecycleEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("serialize lifecycle event")?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&mut self, event: LifecycleEvent) {
        // Logging must never stop the loop.
        if let Err(err) = self.append(&event) {
            warn!(err = %err, path = %self.path.display(), "failed to append lifecycle event");
        }
    }
}

/// Prints one `label: key=value` line per event to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&mut self, event: LifecycleEvent) {
        println!("{}", console_line(&event.kind));
    }
}

pub fn console_line(kind: &LifecycleKind) -> String {
    match kind {
        LifecycleKind::IterationStart {
            iteration,
            max_iterations,
            selected_tasks,
            budget_points,
        } => format!(
            "iteration: n={iteration}/{max_iterations} tasks={} budget={budget_points}",
            join_or_dash(selected_tasks)
        ),
        LifecycleKind::ToolObserved {
            tool_name,
            display_name,
            category,
            ..
        } => format!(
            "tool: {} name={tool_name} target={display_name}",
            category.as_str()
        ),
        LifecycleKind::CommitObserved { hash, message, .. } => {
            format!("commit: hash={hash} message={message}")
        }
        LifecycleKind::TaskCompleted {
            task_id,
            completed,
            total,
            ..
        } => format!(
            "task: completed={} progress={completed}/{total}",
            task_id.as_deref().unwrap_or("-")
        ),
        LifecycleKind::IterationDone {
            iteration,
            duration_ms,
            stats,
        } => format!(
            "done: n={iteration} duration_ms={duration_ms} tools={} errors={} \
             reads={} writes={} commands={} meta={}",
            stats.tools_completed,
            stats.tools_errored,
            stats.reads,
            stats.writes,
            stats.commands,
            stats.meta_ops
        ),
        LifecycleKind::Stuck {
            iteration,
            iterations_without_progress,
        } => format!(
            "stuck: n={iteration} iterations_without_progress={iterations_without_progress}"
        ),
        LifecycleKind::Complete {
            iteration,
            completed,
            total,
        } => format!("complete: n={iteration} progress={completed}/{total}"),
        LifecycleKind::MaxIterations {
            max_iterations,
            completed,
            total,
        } => format!("max_iterations: limit={max_iterations} progress={completed}/{total}"),
        LifecycleKind::Failed { iteration, error } => {
            format!("failed: n={iteration} error={error}")
        }
        LifecycleKind::Warning { message } => format!("warning: {message}"),
    }
}

fn join_or_dash(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(",")
    }
}
