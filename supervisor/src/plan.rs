//! Read-only views of a task document: `supervisor plan` and `supervisor status`.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::budget::{BudgetResult, select_tasks};
use crate::io::task_doc::{TaskDocument, TaskList, read_task_document};

/// Load a current-format document, rejecting missing and legacy ones.
pub fn load_current(spec_path: &Path) -> Result<TaskList> {
    match read_task_document(spec_path)? {
        TaskDocument::Current(list) => Ok(list),
        TaskDocument::NotFound => Err(anyhow!(
            "task document not found: {}",
            spec_path.display()
        )),
        TaskDocument::Legacy { warning } => Err(anyhow!(warning)),
    }
}

/// What the scheduler would hand the agent next.
pub fn plan(spec_path: &Path, budget_points: u32, conservative: bool) -> Result<BudgetResult> {
    let list = load_current(spec_path)?;
    Ok(select_tasks(&list.tasks, budget_points, conservative))
}

pub fn render_plan(result: &BudgetResult, budget_points: u32) -> String {
    let mut out = String::new();
    for warning in &result.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    for task in &result.selected_tasks {
        let _ = writeln!(
            out,
            "select: {} size={} points={} title={}",
            task.id,
            task.size.as_str(),
            task.size_points(),
            task.title
        );
    }
    let _ = writeln!(
        out,
        "budget: used={}/{budget_points} remaining={} skipped={}",
        result.total_points,
        result.remaining_budget,
        result.skipped_tasks.len()
    );
    out
}

pub fn render_status(list: &TaskList) -> String {
    let mut out = String::new();
    for task in &list.tasks {
        let _ = write!(
            out,
            "{} {} [{}] {}",
            task.id,
            task.status.as_str(),
            task.size.as_str(),
            task.title
        );
        if !task.dependencies.is_empty() {
            let _ = write!(out, " (depends on {})", task.dependencies.join(", "));
        }
        out.push('\n');
    }
    let progress = list.progress();
    let _ = writeln!(
        out,
        "progress: {}/{} complete={}",
        progress.completed,
        progress.total,
        progress.is_complete()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskSize, TaskStatus};
    use crate::test_support::{TaskDocFixture, task, task_with_deps};

    #[test]
    fn plan_selects_within_budget() {
        let fx = TaskDocFixture::new(&[
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task_with_deps("T003", TaskStatus::Pending, TaskSize::S, &["T002"]),
            task("T004", TaskStatus::Pending, TaskSize::S),
        ])
        .expect("fixture");
        let result = plan(fx.spec_path(), 4, false).expect("plan");
        assert_eq!(result.selected_ids(), vec!["T002", "T004"]);

        let text = render_plan(&result, 4);
        assert!(text.contains("select: T002 size=M points=2 title=T002 title"));
        assert!(text.contains("budget: used=3/4 remaining=1"));
    }

    #[test]
    fn status_lists_tasks_and_progress() {
        let fx = TaskDocFixture::new(&[
            task("T001", TaskStatus::Passed, TaskSize::S),
            task_with_deps("T002", TaskStatus::InProgress, TaskSize::L, &["T001"]),
        ])
        .expect("fixture");
        let list = load_current(fx.spec_path()).expect("load");
        let text = render_status(&list);
        assert!(text.contains("T001 passed [S] T001 title\n"));
        assert!(text.contains("T002 in_progress [L] T002 title (depends on T001)\n"));
        assert!(text.ends_with("progress: 1/2 complete=false\n"));
    }

    #[test]
    fn missing_and_legacy_documents_are_errors() {
        let fx = TaskDocFixture::new(&[]).expect("fixture");
        assert!(load_current(&fx.root().join("nope.md")).is_err());
        fx.write_raw("- [ ] one\n").expect("write");
        let err = load_current(fx.spec_path()).unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
