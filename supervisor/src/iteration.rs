//! One iteration: render the prompt, run the agent, fold its events into state.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::activity::ActivityItem;
use crate::core::budget::BudgetResult;
use crate::core::iteration_state::IterationStateMachine;
use crate::core::tools::categorize;
use crate::core::types::IterationResult;
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::config::SupervisorConfig;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::lifecycle::{EventSink, LifecycleEvent, LifecycleKind};

/// Everything the loop hands to a runner for a single iteration.
#[derive(Debug, Clone)]
pub struct IterationRequest {
    pub iteration: u32,
    pub max_iterations: u32,
    pub budget_points: u32,
    pub workdir: PathBuf,
    pub spec_path: PathBuf,
    pub selection: BudgetResult,
}

/// Runs one iteration of agent work.
///
/// `Err` and `IterationResult::error` both stop the loop with ERROR; the
/// former is for failures to run at all, the latter for a run that failed.
pub trait IterationRunner {
    fn run_iteration(
        &mut self,
        request: &IterationRequest,
        sink: &mut dyn EventSink,
    ) -> Result<IterationResult>;
}

/// Limits applied to each agent invocation.
#[derive(Debug, Clone, Copy)]
pub struct IterationLimits {
    pub timeout: Duration,
    pub idle_timeout: Duration,
    pub stderr_limit_bytes: usize,
    pub activity_cap: usize,
}

impl IterationLimits {
    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.iteration_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            stderr_limit_bytes: cfg.stderr_limit_bytes,
            activity_cap: cfg.activity_log_cap,
        }
    }
}

impl Default for IterationLimits {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Production runner: agent process, then parser, then state machine.
pub struct AgentIteration<A: AgentRunner> {
    agent: A,
    machine: IterationStateMachine,
    prompts: PromptBuilder,
    limits: IterationLimits,
}

impl<A: AgentRunner> AgentIteration<A> {
    pub fn new(agent: A, limits: IterationLimits) -> Self {
        Self {
            agent,
            machine: IterationStateMachine::with_activity_cap(0, 0, limits.activity_cap),
            prompts: PromptBuilder::new(),
            limits,
        }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// State of the most recent iteration.
    pub fn machine(&self) -> &IterationStateMachine {
        &self.machine
    }
}

impl<A: AgentRunner> IterationRunner for AgentIteration<A> {
    #[instrument(skip_all, fields(iteration = request.iteration))]
    fn run_iteration(
        &mut self,
        request: &IterationRequest,
        sink: &mut dyn EventSink,
    ) -> Result<IterationResult> {
        self.machine
            .reset(Some(request.iteration), Some(request.max_iterations));
        let prompt = self
            .prompts
            .render(&PromptInputs {
                spec_path: &request.spec_path,
                iteration: request.iteration,
                max_iterations: request.max_iterations,
                budget_points: request.budget_points,
                selection: &request.selection,
            })
            .context("build iteration prompt")?;
        let agent_request = AgentRequest {
            workdir: request.workdir.clone(),
            prompt,
            timeout: self.limits.timeout,
            idle_timeout: self.limits.idle_timeout,
            stderr_limit_bytes: self.limits.stderr_limit_bytes,
        };

        info!(tasks = ?request.selection.selected_ids(), "running agent");
        let machine = &mut self.machine;
        let iteration = request.iteration;
        let outcome = self.agent.run(&agent_request, &mut |event| {
            for item in machine.handle(&event) {
                if let Some(kind) = observed(iteration, item) {
                    sink.emit(LifecycleEvent::now(kind));
                }
            }
        })?;

        let state = self.machine.state();
        debug!(phase = ?state.phase, stats = ?state.stats, "iteration finished");
        Ok(IterationResult {
            iteration,
            duration_ms: outcome.duration_ms,
            stats: state.stats,
            error: outcome.error,
            commit_hash: state.last_commit.as_ref().map(|c| c.hash.clone()),
            commit_message: state.last_commit.as_ref().map(|c| c.message.clone()),
        })
    }
}

/// Tool starts are surfaced live; the commit is reported once by the loop from
/// the sealed result.
fn observed(iteration: u32, item: ActivityItem) -> Option<LifecycleKind> {
    match item {
        ActivityItem::ToolStart {
            tool_name,
            display_name,
            ..
        } => Some(LifecycleKind::ToolObserved {
            iteration,
            category: categorize(&tool_name),
            tool_name,
            display_name,
        }),
        ActivityItem::Thought { .. }
        | ActivityItem::ToolComplete { .. }
        | ActivityItem::Commit { .. } => None,
    }
}
