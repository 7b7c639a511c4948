//! Test-only helpers: task builders, document fixtures, and scripted collaborators.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{IterationResult, Stats, Task, TaskSize, TaskStatus};
use crate::io::stubs::StubDetector;
use crate::iteration::{IterationRequest, IterationRunner};
use crate::lifecycle::EventSink;

/// Create a deterministic task with no deliverables or dependencies.
pub fn task(id: &str, status: TaskStatus, size: TaskSize) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        status,
        size,
        deliverables: Vec::new(),
        verify: None,
        dependencies: Vec::new(),
    }
}

/// Same as [`task`] with explicit dependencies.
pub fn task_with_deps(id: &str, status: TaskStatus, size: TaskSize, deps: &[&str]) -> Task {
    Task {
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        ..task(id, status, size)
    }
}

/// Render tasks as a Markdown task document the reader accepts.
pub fn render_task_doc(tasks: &[Task]) -> String {
    let mut out = String::from("# Tasks\n\n");
    for task in tasks {
        out.push_str(&format!("### {}: {}\n", task.id, task.title));
        out.push_str(&format!("- **Status**: {}\n", task.status.as_str()));
        out.push_str(&format!("- **Size**: {}\n", task.size.as_str()));
        if !task.deliverables.is_empty() {
            out.push_str("- **Deliverables**:\n");
            for item in &task.deliverables {
                out.push_str(&format!("  - {item}\n"));
            }
        }
        if let Some(verify) = &task.verify {
            out.push_str(&format!("- **Verify**: `{verify}`\n"));
        }
        if !task.dependencies.is_empty() {
            out.push_str(&format!(
                "- **Depends on**: {}\n",
                task.dependencies.join(", ")
            ));
        }
        out.push('\n');
    }
    out
}

pub fn write_task_doc(path: &Path, tasks: &[Task]) -> Result<()> {
    fs::write(path, render_task_doc(tasks))
        .with_context(|| format!("write task doc {}", path.display()))
}

/// Temporary working directory holding a `tasks.md` document.
pub struct TaskDocFixture {
    dir: TempDir,
    spec_path: PathBuf,
}

impl TaskDocFixture {
    pub fn new(tasks: &[Task]) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let spec_path = dir.path().join("tasks.md");
        write_task_doc(&spec_path, tasks)?;
        Ok(Self { dir, spec_path })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn spec_path(&self) -> &Path {
        &self.spec_path
    }

    /// Replace the document with raw Markdown.
    pub fn write_raw(&self, contents: &str) -> Result<()> {
        fs::write(&self.spec_path, contents)
            .with_context(|| format!("write {}", self.spec_path.display()))
    }
}

/// What a scripted iteration does.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Update task statuses in the document, optionally reporting a commit.
    Progress {
        statuses: Vec<(String, TaskStatus)>,
        commit: Option<(String, String)>,
    },
    /// Leave the document untouched.
    NoProgress,
    /// Return a result carrying this error.
    Fail(String),
    /// Return `Err` without producing a result.
    Crash(String),
}

impl ScriptedStep {
    pub fn complete(ids: &[&str]) -> Self {
        ScriptedStep::Progress {
            statuses: ids
                .iter()
                .map(|id| (id.to_string(), TaskStatus::Passed))
                .collect(),
            commit: None,
        }
    }
}

/// Iteration runner that edits the task document according to a script.
///
/// Once the script is exhausted every further iteration is `NoProgress`.
#[derive(Debug)]
pub struct ScriptedIterationRunner {
    tasks: Vec<Task>,
    steps: VecDeque<ScriptedStep>,
    requests: Vec<IterationRequest>,
}

impl ScriptedIterationRunner {
    pub fn new(tasks: Vec<Task>, steps: Vec<ScriptedStep>) -> Self {
        Self {
            tasks,
            steps: steps.into(),
            requests: Vec::new(),
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> &[IterationRequest] {
        &self.requests
    }
}

impl IterationRunner for ScriptedIterationRunner {
    fn run_iteration(
        &mut self,
        request: &IterationRequest,
        _sink: &mut dyn EventSink,
    ) -> Result<IterationResult> {
        self.requests.push(request.clone());
        let step = self.steps.pop_front().unwrap_or(ScriptedStep::NoProgress);
        let mut result = IterationResult {
            iteration: request.iteration,
            duration_ms: 1,
            stats: Stats::default(),
            error: None,
            commit_hash: None,
            commit_message: None,
        };
        match step {
            ScriptedStep::Progress { statuses, commit } => {
                for (id, status) in statuses {
                    let task = self
                        .tasks
                        .iter_mut()
                        .find(|t| t.id == id)
                        .ok_or_else(|| anyhow!("scripted step names unknown task {id}"))?;
                    task.status = status;
                }
                write_task_doc(&request.spec_path, &self.tasks)?;
                if let Some((hash, message)) = commit {
                    result.commit_hash = Some(hash);
                    result.commit_message = Some(message);
                }
            }
            ScriptedStep::NoProgress => {}
            ScriptedStep::Fail(error) => result.error = Some(error),
            ScriptedStep::Crash(error) => return Err(anyhow!(error)),
        }
        Ok(result)
    }
}

/// Stub detector returning canned findings and counting calls.
#[derive(Debug, Default)]
pub struct FakeStubDetector {
    findings: Vec<PathBuf>,
    calls: Cell<u32>,
}

impl FakeStubDetector {
    pub fn new(findings: Vec<PathBuf>) -> Self {
        Self {
            findings,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl StubDetector for FakeStubDetector {
    fn detect(&self, _workdir: &Path) -> Vec<PathBuf> {
        self.calls.set(self.calls.get() + 1);
        self.findings.clone()
    }
}
