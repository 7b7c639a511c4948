//! Budget-constrained selection of the tasks to attempt in one iteration.
//!
//! Selection never reorders: in-progress work comes first, then pending tasks
//! in document order. Authoring order is the only tie-break.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::types::{Task, TaskStatus};

pub const DEFAULT_BUDGET_POINTS: u32 = 4;

/// Outcome of one scheduling pass. Computed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetResult {
    pub selected_tasks: Vec<Task>,
    pub total_points: u32,
    pub remaining_budget: u32,
    pub skipped_tasks: Vec<Task>,
    pub warnings: Vec<String>,
}

impl BudgetResult {
    pub fn selected_ids(&self) -> Vec<String> {
        self.selected_tasks.iter().map(|t| t.id.clone()).collect()
    }
}

/// Pick tasks for one iteration within `budget_points`.
///
/// In-progress tasks that do not fit are deferred with a warning. With
/// `conservative`, at most one M/L pending task is selected and nothing after it.
pub fn select_tasks(tasks: &[Task], budget_points: u32, conservative: bool) -> BudgetResult {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let in_progress = tasks.iter().filter(|t| t.status == TaskStatus::InProgress);
    let pending = tasks.iter().filter(|t| t.status == TaskStatus::Pending);

    let mut remaining = budget_points;
    let mut selected: Vec<Task> = Vec::new();
    let mut skipped: Vec<Task> = Vec::new();
    let mut warnings = Vec::new();

    for task in in_progress {
        let points = task.size_points();
        if points <= remaining {
            remaining -= points;
            selected.push(task.clone());
        } else {
            warnings.push(format!(
                "{} is in progress but needs {} points (only {} left); deferring",
                task.id, points, remaining
            ));
        }
    }

    for task in pending {
        if conservative && selected.last().is_some_and(|last| last.size.is_large()) {
            skipped.push(task.clone());
            continue;
        }

        if let Some(reason) = unmet_dependency(task, &by_id) {
            warnings.push(reason);
            skipped.push(task.clone());
            continue;
        }

        let points = task.size_points();
        if points <= remaining {
            remaining -= points;
            selected.push(task.clone());
            if conservative && task.size.is_large() {
                break;
            }
        } else {
            skipped.push(task.clone());
        }
    }

    BudgetResult {
        total_points: selected.iter().map(Task::size_points).sum(),
        remaining_budget: remaining,
        selected_tasks: selected,
        skipped_tasks: skipped,
        warnings,
    }
}

fn unmet_dependency(task: &Task, by_id: &HashMap<&str, &Task>) -> Option<String> {
    for dep in &task.dependencies {
        match by_id.get(dep.as_str()) {
            None => {
                return Some(format!(
                    "{} depends on unknown task {}; skipping",
                    task.id, dep
                ));
            }
            Some(found) if found.status != TaskStatus::Passed => {
                return Some(format!(
                    "{} depends on {} which is {}; skipping",
                    task.id,
                    dep,
                    found.status.as_str()
                ));
            }
            Some(_) => {}
        }
    }
    None
}
