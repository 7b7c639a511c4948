//! Per-iteration prompt rendering.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::budget::BudgetResult;
use crate::core::types::Task;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    title: &'a str,
    status: &'static str,
    size: &'static str,
    deliverables: &'a [String],
    verify: Option<&'a str>,
}

impl<'a> TaskContext<'a> {
    fn from_task(task: &'a Task) -> Self {
        Self {
            id: &task.id,
            title: &task.title,
            status: task.status.as_str(),
            size: task.size.as_str(),
            deliverables: &task.deliverables,
            verify: task.verify.as_deref(),
        }
    }
}

/// Inputs for one iteration's prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub spec_path: &'a Path,
    pub iteration: u32,
    pub max_iterations: u32,
    pub budget_points: u32,
    pub selection: &'a BudgetResult,
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("iteration", ITERATION_TEMPLATE)
            .expect("iteration template should be valid");
        Self { env }
    }

    pub fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let tasks: Vec<TaskContext<'_>> = input
            .selection
            .selected_tasks
            .iter()
            .map(TaskContext::from_task)
            .collect();
        let task_count = tasks.len();
        let template = self.env.get_template("iteration")?;
        let rendered = template
            .render(context! {
                spec_path => input.spec_path.display().to_string(),
                iteration => input.iteration,
                max_iterations => input.max_iterations,
                budget_points => input.budget_points,
                total_points => input.selection.total_points,
                tasks => tasks,
                warnings => &input.selection.warnings,
            })
            .context("render iteration prompt")?;
        debug!(bytes = rendered.len(), tasks = task_count, "rendered prompt");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::select_tasks;
    use crate::core::types::{TaskSize, TaskStatus};

    fn task(id: &str, status: TaskStatus, size: TaskSize) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Build {id}"),
            status,
            size,
            deliverables: vec![format!("src/{}.rs", id.to_lowercase())],
            verify: Some("cargo test".to_string()),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn renders_selected_tasks() {
        let tasks = vec![
            task("T001", TaskStatus::InProgress, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task("T003", TaskStatus::Pending, TaskSize::L),
        ];
        let selection = select_tasks(&tasks, 4, false);
        let prompt = PromptBuilder::new()
            .render(&PromptInputs {
                spec_path: Path::new("docs/tasks.md"),
                iteration: 2,
                max_iterations: 10,
                budget_points: 4,
                selection: &selection,
            })
            .expect("render");
        assert!(prompt.contains("`docs/tasks.md`"));
        assert!(prompt.contains("iteration 2 of at most 10"));
        assert!(prompt.contains("### T001: Build T001 [S]"));
        assert!(prompt.contains("Continue it."));
        assert!(prompt.contains("- src/t002.rs"));
        assert!(prompt.contains("Verify with: `cargo test`"));
        assert!(!prompt.contains("### T003"));
    }

    #[test]
    fn renders_fallback_when_nothing_selected() {
        let selection = select_tasks(&[], 4, false);
        let prompt = PromptBuilder::new()
            .render(&PromptInputs {
                spec_path: Path::new("tasks.md"),
                iteration: 1,
                max_iterations: 3,
                budget_points: 4,
                selection: &selection,
            })
            .expect("render");
        assert!(prompt.contains("No tasks fit this iteration"));
        assert!(!prompt.contains("Scheduler notes"));
    }
}
