//! The iteration control loop behind `supervisor run`.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::core::budget::select_tasks;
use crate::core::types::{IterationResult, Task};
use crate::exit_codes;
use crate::io::config::SupervisorConfig;
use crate::io::stubs::StubDetector;
use crate::io::task_doc::{Progress, TaskDocument, TaskList, read_task_document};
use crate::iteration::{IterationRequest, IterationRunner};
use crate::lifecycle::{EventSink, LifecycleEvent, LifecycleKind};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every task is passed or failed.
    Complete,
    /// `stuck_threshold` consecutive iterations completed nothing.
    Stuck,
    /// The iteration cap was reached with work remaining.
    MaxIterations,
    /// The document could not be used or an iteration failed.
    Error { message: String },
}

impl LoopStop {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopStop::Complete => exit_codes::COMPLETE,
            LoopStop::Stuck => exit_codes::STUCK,
            LoopStop::MaxIterations => exit_codes::MAX_ITERATIONS,
            LoopStop::Error { .. } => exit_codes::ERROR,
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations_run: u32,
    /// Progress as last observed.
    pub progress: Progress,
    pub results: Vec<IterationResult>,
    pub stop: LoopStop,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        self.stop.exit_code()
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub stuck_threshold: u32,
    pub budget_points: u32,
    pub conservative: bool,
    /// Directory the agent works in; also scanned for stubs.
    pub workdir: PathBuf,
}

impl LoopConfig {
    pub fn from_config(cfg: &SupervisorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            stuck_threshold: cfg.stuck_threshold,
            budget_points: cfg.budget_points,
            conservative: cfg.conservative,
            workdir: workdir.into(),
        }
    }
}

/// Run iterations until the task document is complete, the agent is stuck, the
/// iteration cap is reached, or something fails.
///
/// Never returns an error: failures stop the loop with [`LoopStop::Error`] after
/// a `Failed` lifecycle event.
#[instrument(skip_all, fields(spec = %spec_path.display(), max_iterations = config.max_iterations))]
pub fn run_loop<R: IterationRunner, D: StubDetector>(
    spec_path: &Path,
    runner: &mut R,
    detector: &D,
    sink: &mut dyn EventSink,
    config: &LoopConfig,
) -> LoopOutcome {
    let mut outcome = LoopOutcome {
        iterations_run: 0,
        progress: Progress::default(),
        results: Vec::new(),
        stop: LoopStop::Complete,
    };

    let mut tasks = match load_task_list(spec_path) {
        Ok(list) => list.tasks,
        Err(message) => return fail(sink, outcome, 0, message),
    };
    outcome.progress = progress_of(&tasks);
    if outcome.progress.is_complete() {
        info!(total = outcome.progress.total, "nothing left to do");
        emit_complete(sink, 0, outcome.progress);
        return outcome;
    }

    let mut without_progress = 0u32;
    for iteration in 1..=config.max_iterations {
        let selection = select_tasks(&tasks, config.budget_points, config.conservative);
        for message in &selection.warnings {
            sink.emit(LifecycleEvent::now(LifecycleKind::Warning {
                message: message.clone(),
            }));
        }
        sink.emit(LifecycleEvent::now(LifecycleKind::IterationStart {
            iteration,
            max_iterations: config.max_iterations,
            selected_tasks: selection.selected_ids(),
            budget_points: config.budget_points,
        }));

        let request = IterationRequest {
            iteration,
            max_iterations: config.max_iterations,
            budget_points: config.budget_points,
            workdir: config.workdir.clone(),
            spec_path: spec_path.to_path_buf(),
            selection,
        };
        outcome.iterations_run = iteration;
        let result = match runner.run_iteration(&request, sink) {
            Ok(result) => result,
            Err(err) => return fail(sink, outcome, iteration, format!("{err:#}")),
        };
        sink.emit(LifecycleEvent::now(LifecycleKind::IterationDone {
            iteration,
            duration_ms: result.duration_ms,
            stats: result.stats,
        }));
        let iteration_error = result.error.clone();
        let commit = result
            .commit_hash
            .clone()
            .map(|hash| (hash, result.commit_message.clone().unwrap_or_default()));
        outcome.results.push(result);
        if let Some(error) = iteration_error {
            return fail(sink, outcome, iteration, error);
        }

        let before = outcome.progress;
        if let Some(list) = reread_task_list(spec_path, sink) {
            let newly = newly_completed(&tasks, &list.tasks);
            tasks = list.tasks;
            outcome.progress = progress_of(&tasks);
            let gained = outcome.progress.completed.saturating_sub(before.completed);
            for offset in 0..gained {
                sink.emit(LifecycleEvent::now(LifecycleKind::TaskCompleted {
                    iteration,
                    task_id: newly.get(offset).cloned(),
                    completed: before.completed + offset + 1,
                    total: outcome.progress.total,
                }));
            }
        }

        if outcome.progress.completed > before.completed {
            without_progress = 0;
            for path in detector.detect(&config.workdir) {
                sink.emit(LifecycleEvent::now(LifecycleKind::Warning {
                    message: format!("possible stub left in {}", path.display()),
                }));
            }
        } else {
            without_progress += 1;
            info!(without_progress, "iteration completed no tasks");
        }

        if let Some((hash, message)) = commit {
            sink.emit(LifecycleEvent::now(LifecycleKind::CommitObserved {
                iteration,
                hash,
                message,
            }));
        }

        if without_progress >= config.stuck_threshold {
            warn!(without_progress, "stuck");
            sink.emit(LifecycleEvent::now(LifecycleKind::Stuck {
                iteration,
                iterations_without_progress: without_progress,
            }));
            outcome.stop = LoopStop::Stuck;
            return outcome;
        }
        if outcome.progress.is_complete() {
            emit_complete(sink, iteration, outcome.progress);
            outcome.stop = LoopStop::Complete;
            return outcome;
        }
    }

    sink.emit(LifecycleEvent::now(LifecycleKind::MaxIterations {
        max_iterations: config.max_iterations,
        completed: outcome.progress.completed,
        total: outcome.progress.total,
    }));
    outcome.stop = LoopStop::MaxIterations;
    outcome
}

fn fail(
    sink: &mut dyn EventSink,
    mut outcome: LoopOutcome,
    iteration: u32,
    message: String,
) -> LoopOutcome {
    warn!(iteration, error = %message, "loop failed");
    sink.emit(LifecycleEvent::now(LifecycleKind::Failed {
        iteration,
        error: message.clone(),
    }));
    outcome.stop = LoopStop::Error { message };
    outcome
}

fn emit_complete(sink: &mut dyn EventSink, iteration: u32, progress: Progress) {
    sink.emit(LifecycleEvent::now(LifecycleKind::Complete {
        iteration,
        completed: progress.completed,
        total: progress.total,
    }));
}

fn progress_of(tasks: &[Task]) -> Progress {
    TaskList {
        tasks: tasks.to_vec(),
    }
    .progress()
}

/// Initial read: anything but a current-format document is fatal.
fn load_task_list(spec_path: &Path) -> Result<TaskList, String> {
    match read_task_document(spec_path) {
        Ok(TaskDocument::Current(list)) => Ok(list),
        Ok(TaskDocument::NotFound) => Err(format!(
            "task document not found: {}",
            spec_path.display()
        )),
        Ok(TaskDocument::Legacy { warning }) => Err(warning),
        Err(err) => Err(format!("{err:#}")),
    }
}

/// Re-read after an iteration. An unusable document counts as no change.
fn reread_task_list(spec_path: &Path, sink: &mut dyn EventSink) -> Option<TaskList> {
    let message = match read_task_document(spec_path) {
        Ok(TaskDocument::Current(list)) => return Some(list),
        Ok(TaskDocument::NotFound) => {
            format!("task document disappeared: {}", spec_path.display())
        }
        Ok(TaskDocument::Legacy { warning }) => warning,
        Err(err) => format!("{err:#}"),
    };
    warn!(message = %message, "progress unchanged");
    sink.emit(LifecycleEvent::now(LifecycleKind::Warning { message }));
    None
}

/// Ids that are passed/failed in `after` but were not in `before`, in document order.
fn newly_completed(before: &[Task], after: &[Task]) -> Vec<String> {
    after
        .iter()
        .filter(|task| task.status.is_terminal())
        .filter(|task| {
            !before
                .iter()
                .any(|prev| prev.id == task.id && prev.status.is_terminal())
        })
        .map(|task| task.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskSize, TaskStatus};
    use crate::test_support::{
        FakeStubDetector, ScriptedIterationRunner, ScriptedStep, TaskDocFixture, task,
    };

    struct Fixture {
        docs: TaskDocFixture,
        spec: PathBuf,
        config: LoopConfig,
    }

    fn fixture(tasks: &[Task]) -> Fixture {
        let docs = TaskDocFixture::new(tasks).expect("fixture");
        let config = LoopConfig {
            max_iterations: 5,
            stuck_threshold: 3,
            budget_points: 4,
            conservative: false,
            workdir: docs.root().to_path_buf(),
        };
        Fixture {
            spec: docs.spec_path().to_path_buf(),
            docs,
            config,
        }
    }

    fn three_tasks() -> Vec<Task> {
        vec![
            task("T001", TaskStatus::Pending, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task("T003", TaskStatus::Pending, TaskSize::L),
        ]
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<&LifecycleKind> {
        events.iter().map(|e| &e.kind).collect()
    }

    #[test]
    fn completes_when_every_task_finishes() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner = ScriptedIterationRunner::new(
            tasks,
            vec![
                ScriptedStep::complete(&["T001", "T002"]),
                ScriptedStep::Progress {
                    statuses: vec![("T003".to_string(), TaskStatus::Failed)],
                    commit: Some(("abc1234".to_string(), "T003".to_string())),
                },
            ],
        );
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);

        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.iterations_run, 2);
        assert_eq!(outcome.progress, Progress { completed: 3, total: 3 });
        assert_eq!(detector.calls(), 2);

        let completed: Vec<(Option<String>, usize)> = events
            .iter()
            .filter_map(|e| match &e.kind {
                LifecycleKind::TaskCompleted {
                    task_id, completed, ..
                } => Some((task_id.clone(), *completed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            completed,
            vec![
                (Some("T001".to_string()), 1),
                (Some("T002".to_string()), 2),
                (Some("T003".to_string()), 3),
            ]
        );
        assert!(kinds(&events).iter().any(|k| matches!(
            k,
            LifecycleKind::CommitObserved { iteration: 2, hash, .. } if hash == "abc1234"
        )));
        assert!(matches!(
            kinds(&events).last(),
            Some(LifecycleKind::Complete { iteration: 2, completed: 3, total: 3 })
        ));
    }

    #[test]
    fn selection_is_recomputed_each_iteration() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner =
            ScriptedIterationRunner::new(tasks, vec![ScriptedStep::complete(&["T001", "T002"])]);
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);

        let selected: Vec<Vec<String>> = runner
            .requests()
            .iter()
            .map(|r| r.selection.selected_ids())
            .collect();
        assert_eq!(selected[0], vec!["T001", "T002"]);
        assert_eq!(selected[1], vec!["T003"]);
    }

    #[test]
    fn stops_stuck_after_threshold_without_progress() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner = ScriptedIterationRunner::new(tasks, Vec::new());
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);

        assert_eq!(outcome.stop, LoopStop::Stuck);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.iterations_run, 3);
        assert_eq!(runner.requests().len(), 3);
        assert_eq!(detector.calls(), 0);
        assert!(matches!(
            kinds(&events).last(),
            Some(LifecycleKind::Stuck {
                iteration: 3,
                iterations_without_progress: 3
            })
        ));
    }

    #[test]
    fn progress_resets_the_stuck_counter() {
        let tasks = three_tasks();
        let mut fx = fixture(&tasks);
        fx.config.max_iterations = 10;
        let mut runner = ScriptedIterationRunner::new(
            tasks,
            vec![
                ScriptedStep::NoProgress,
                ScriptedStep::NoProgress,
                ScriptedStep::complete(&["T001"]),
                ScriptedStep::NoProgress,
                ScriptedStep::NoProgress,
            ],
        );
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);
        assert_eq!(outcome.stop, LoopStop::Stuck);
        assert_eq!(outcome.iterations_run, 6);
    }

    #[test]
    fn stops_at_max_iterations() {
        let tasks = three_tasks();
        let mut fx = fixture(&tasks);
        fx.config.max_iterations = 2;
        let mut runner = ScriptedIterationRunner::new(
            tasks,
            vec![
                ScriptedStep::complete(&["T001"]),
                ScriptedStep::complete(&["T002"]),
            ],
        );
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);
        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert_eq!(outcome.exit_code(), 2);
        assert!(matches!(
            kinds(&events).last(),
            Some(LifecycleKind::MaxIterations {
                max_iterations: 2,
                completed: 2,
                total: 3
            })
        ));
    }

    #[test]
    fn iteration_error_stops_without_retry() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner = ScriptedIterationRunner::new(
            tasks,
            vec![ScriptedStep::Fail("agent exited with status Some(1)".to_string())],
        );
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);
        assert_eq!(
            outcome.stop,
            LoopStop::Error {
                message: "agent exited with status Some(1)".to_string()
            }
        );
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(runner.requests().len(), 1);
        assert!(matches!(
            kinds(&events).last(),
            Some(LifecycleKind::Failed { iteration: 1, .. })
        ));
    }

    #[test]
    fn runner_crash_is_an_error_stop() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner = ScriptedIterationRunner::new(
            tasks,
            vec![ScriptedStep::Crash("spawn failed".to_string())],
        );
        let detector = FakeStubDetector::default();
        let mut events = Vec::new();
        let outcome = run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);
        assert!(matches!(
            outcome.stop,
            LoopStop::Error { ref message } if message == "spawn failed"
        ));
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn missing_document_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = LoopConfig {
            max_iterations: 3,
            stuck_threshold: 3,
            budget_points: 4,
            conservative: false,
            workdir: temp.path().to_path_buf(),
        };
        let mut runner = ScriptedIterationRunner::new(Vec::new(), Vec::new());
        let mut events = Vec::new();
        let outcome = run_loop(
            &temp.path().join("missing.md"),
            &mut runner,
            &FakeStubDetector::default(),
            &mut events,
            &config,
        );
        assert!(matches!(outcome.stop, LoopStop::Error { .. }));
        assert_eq!(outcome.iterations_run, 0);
        assert!(runner.requests().is_empty());
    }

    #[test]
    fn legacy_document_is_an_error() {
        let fx = fixture(&[]);
        fx.docs
            .write_raw("# Todo\n\n- [ ] first\n- [x] second\n")
            .expect("write");
        let mut runner = ScriptedIterationRunner::new(Vec::new(), Vec::new());
        let mut events = Vec::new();
        let outcome = run_loop(
            &fx.spec,
            &mut runner,
            &FakeStubDetector::default(),
            &mut events,
            &fx.config,
        );
        assert!(matches!(outcome.stop, LoopStop::Error { .. }));
        assert!(runner.requests().is_empty());
    }

    #[test]
    fn already_complete_document_runs_nothing() {
        let tasks = vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Failed, TaskSize::M),
        ];
        let fx = fixture(&tasks);
        let mut runner = ScriptedIterationRunner::new(tasks, Vec::new());
        let mut events = Vec::new();
        let outcome = run_loop(
            &fx.spec,
            &mut runner,
            &FakeStubDetector::default(),
            &mut events,
            &fx.config,
        );
        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.iterations_run, 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn stub_findings_become_warnings() {
        let tasks = three_tasks();
        let fx = fixture(&tasks);
        let mut runner =
            ScriptedIterationRunner::new(tasks, vec![ScriptedStep::complete(&["T001"])]);
        let detector = FakeStubDetector::new(vec![PathBuf::from("src/lib.rs")]);
        let mut events = Vec::new();
        run_loop(&fx.spec, &mut runner, &detector, &mut events, &fx.config);
        assert!(kinds(&events).iter().any(|k| matches!(
            k,
            LifecycleKind::Warning { message } if message == "possible stub left in src/lib.rs"
        )));
    }

    #[test]
    fn scheduler_warnings_are_emitted_before_iteration_start() {
        let tasks = vec![
            task("T001", TaskStatus::InProgress, TaskSize::L),
            task("T002", TaskStatus::Pending, TaskSize::S),
        ];
        let mut fx = fixture(&tasks);
        fx.config.budget_points = 2;
        fx.config.max_iterations = 1;
        let mut runner = ScriptedIterationRunner::new(tasks, Vec::new());
        let mut events = Vec::new();
        run_loop(
            &fx.spec,
            &mut runner,
            &FakeStubDetector::default(),
            &mut events,
            &fx.config,
        );
        let kinds = kinds(&events);
        assert!(matches!(kinds[0], LifecycleKind::Warning { .. }));
        assert!(matches!(
            kinds[1],
            LifecycleKind::IterationStart { selected_tasks, .. }
                if selected_tasks == &vec!["T002".to_string()]
        ));
    }
}
