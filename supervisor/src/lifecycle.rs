//! Structured lifecycle events emitted by the control loop.
//!
//! Sinks are injected rather than global so tests and embedders can capture
//! the stream. Disk and console sinks live in [`crate::io::event_log`].

use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::types::{Stats, ToolCategory};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn now(kind: LifecycleKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleKind {
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        selected_tasks: Vec<String>,
        budget_points: u32,
    },
    ToolObserved {
        iteration: u32,
        tool_name: String,
        display_name: String,
        category: ToolCategory,
    },
    CommitObserved {
        iteration: u32,
        hash: String,
        message: String,
    },
    TaskCompleted {
        iteration: u32,
        task_id: Option<String>,
        completed: usize,
        total: usize,
    },
    IterationDone {
        iteration: u32,
        duration_ms: u64,
        stats: Stats,
    },
    Stuck {
        iteration: u32,
        iterations_without_progress: u32,
    },
    Complete {
        iteration: u32,
        completed: usize,
        total: usize,
    },
    MaxIterations {
        max_iterations: u32,
        completed: usize,
        total: usize,
    },
    Failed {
        iteration: u32,
        error: String,
    },
    Warning {
        message: String,
    },
}

/// Receiver of lifecycle events.
pub trait EventSink {
    fn emit(&mut self, event: LifecycleEvent);
}

impl EventSink for Vec<LifecycleEvent> {
    fn emit(&mut self, event: LifecycleEvent) {
        self.push(event);
    }
}

impl EventSink for Sender<LifecycleEvent> {
    fn emit(&mut self, event: LifecycleEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.send(event);
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: LifecycleEvent) {
        match &event.kind {
            LifecycleKind::Stuck { .. }
            | LifecycleKind::Failed { .. }
            | LifecycleKind::Warning { .. }
            | LifecycleKind::MaxIterations { .. } => warn!(event = ?event.kind, "lifecycle"),
            _ => info!(event = ?event.kind, "lifecycle"),
        }
    }
}

/// Sends every event to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&mut self, event: LifecycleEvent) {
        for sink in &mut self.sinks {
            (**sink).emit(event.clone());
        }
    }
}
