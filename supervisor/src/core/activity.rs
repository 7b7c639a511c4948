//! Bounded, append-only activity feed for one iteration.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_ACTIVITY_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityItem {
    Thought {
        timestamp: DateTime<Utc>,
        text: String,
    },
    ToolStart {
        timestamp: DateTime<Utc>,
        tool_use_id: String,
        tool_name: String,
        display_name: String,
    },
    ToolComplete {
        timestamp: DateTime<Utc>,
        tool_use_id: String,
        tool_name: String,
        display_name: String,
        duration_ms: u64,
        is_error: bool,
    },
    Commit {
        timestamp: DateTime<Utc>,
        hash: String,
        message: String,
    },
}

impl ActivityItem {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ActivityItem::Thought { timestamp, .. }
            | ActivityItem::ToolStart { timestamp, .. }
            | ActivityItem::ToolComplete { timestamp, .. }
            | ActivityItem::Commit { timestamp, .. } => *timestamp,
        }
    }
}

/// Keeps the most recent `cap` items; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    items: VecDeque<ActivityItem>,
    cap: usize,
}

impl ActivityLog {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, item: ActivityItem) {
        if self.cap == 0 {
            return;
        }
        while self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Items in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityItem> {
        self.items.iter()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAP)
    }
}
