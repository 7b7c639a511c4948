//! Agent runner abstraction.
//!
//! The [`AgentRunner`] trait decouples the iteration runner from the actual
//! agent backend (a `claude`-style CLI emitting stream-json on stdout). Tests use
//! scripted runners that replay canned events without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::events::ParserEvent;
use crate::core::line_parser::LineParser;
use crate::io::config::AgentConfig;
use crate::io::process::stream_command;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text, written to the agent's stdin.
    pub prompt: String,
    /// Maximum wall-clock time for the invocation.
    pub timeout: Duration,
    /// Maximum time without any stdout before the agent is killed.
    pub idle_timeout: Duration,
    /// Truncate captured stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunOutcome {
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    /// Set when the invocation failed (non-zero exit, timeout, error result).
    pub error: Option<String>,
}

impl AgentRunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    /// Run the agent, reporting each decoded event to `on_event` as it arrives.
    ///
    /// `Err` is reserved for failures to run at all (e.g. spawn errors); an agent
    /// that ran and failed is reported through [`AgentRunOutcome::error`].
    fn run(
        &self,
        request: &AgentRequest,
        on_event: &mut dyn FnMut(ParserEvent),
    ) -> Result<AgentRunOutcome>;
}

/// Runner that spawns a stream-json agent CLI.
#[derive(Debug, Clone)]
pub struct ClaudeAgentRunner {
    program: String,
    args: Vec<String>,
}

impl ClaudeAgentRunner {
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut parts = config.command.iter();
        let program = parts.next().cloned().unwrap_or_else(|| "claude".to_string());
        let mut args: Vec<String> = parts.cloned().collect();
        args.extend(config.args.iter().cloned());
        if let Some(model) = &config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Self { program, args }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl AgentRunner for ClaudeAgentRunner {
    #[instrument(
        skip_all,
        fields(program = %self.program, timeout_secs = request.timeout.as_secs())
    )]
    fn run(
        &self,
        request: &AgentRequest,
        on_event: &mut dyn FnMut(ParserEvent),
    ) -> Result<AgentRunOutcome> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&request.workdir);

        let started = Instant::now();
        let mut parser = LineParser::new();
        let mut result_is_error = false;
        let mut forward = |event: ParserEvent| {
            if let ParserEvent::Result { is_error, .. } = &event {
                result_is_error |= *is_error;
            }
            on_event(event);
        };

        let output = stream_command(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.idle_timeout,
            request.stderr_limit_bytes,
            &mut |chunk| {
                for event in parser.feed(chunk) {
                    forward(event);
                }
            },
        )
        .with_context(|| format!("run agent {}", self.program))?;
        for event in parser.flush() {
            forward(event);
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let error = if output.timed_out {
            Some(format!(
                "agent timed out after {}s",
                request.timeout.as_secs()
            ))
        } else if output.idle_timed_out {
            Some(format!(
                "agent produced no output for {}s",
                request.idle_timeout.as_secs()
            ))
        } else if !output.status.success() {
            let stderr = output.stderr_text();
            let stderr = stderr.trim();
            Some(if stderr.is_empty() {
                format!("agent exited with status {:?}", output.status.code())
            } else {
                format!(
                    "agent exited with status {:?}: {stderr}",
                    output.status.code()
                )
            })
        } else if result_is_error {
            Some("agent reported an error result".to_string())
        } else {
            None
        };

        match &error {
            Some(err) => warn!(err = %err, duration_ms, "agent failed"),
            None => debug!(duration_ms, "agent completed"),
        }
        Ok(AgentRunOutcome {
            duration_ms,
            exit_code: output.status.code(),
            error,
        })
    }
}
