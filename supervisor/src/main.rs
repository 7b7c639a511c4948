//! Iteration supervisor CLI.
//!
//! Drives an external coding agent through a Markdown task list, one budgeted
//! iteration at a time, until the list is complete or the agent stalls.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;

use supervisor::exit_codes;
use supervisor::io::agent::ClaudeAgentRunner;
use supervisor::io::config::{SupervisorConfig, load_config};
use supervisor::io::event_log::{ConsoleSink, JsonlEventLog, RunPaths, run_id_for};
use supervisor::io::stubs::GitStubDetector;
use supervisor::iteration::{AgentIteration, IterationLimits};
use supervisor::lifecycle::{FanoutSink, TracingSink};
use supervisor::looping::{LoopConfig, run_loop};
use supervisor::plan::{load_current, plan, render_plan, render_status};

const DEFAULT_CONFIG_PATH: &str = ".supervisor/config.toml";

#[derive(Parser)]
#[command(
    name = "supervisor",
    version,
    about = "Iteration supervisor for an external coding agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run iterations until the task list is complete, stuck, or out of iterations.
    Run {
        /// Markdown task document.
        spec: PathBuf,
        /// Config file (defaults to `.supervisor/config.toml` under the workdir).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        stuck_threshold: Option<u32>,
        /// Size points per iteration.
        #[arg(long)]
        budget: Option<u32>,
        /// At most one M/L task per iteration.
        #[arg(long)]
        conservative: bool,
        /// Directory the agent works in (defaults to the current directory).
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Print which tasks the next iteration would attempt.
    Plan {
        spec: PathBuf,
        #[arg(long)]
        budget: Option<u32>,
        #[arg(long)]
        conservative: bool,
    },
    /// Print per-task status and overall progress.
    Status { spec: PathBuf },
}

fn main() {
    supervisor::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            spec,
            config,
            max_iterations,
            stuck_threshold,
            budget,
            conservative,
            workdir,
        } => {
            let workdir = match workdir {
                Some(dir) => dir,
                None => std::env::current_dir().context("resolve current directory")?,
            };
            let config_path = config.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_PATH));
            let mut cfg = load_config(&config_path)?;
            apply_overrides(&mut cfg, max_iterations, stuck_threshold, budget, conservative);
            cfg.validate().context("invalid command-line overrides")?;
            cmd_run(&spec, &workdir, &cfg)
        }
        Command::Plan {
            spec,
            budget,
            conservative,
        } => {
            let cfg = load_config(Path::new(DEFAULT_CONFIG_PATH))?;
            let budget = budget.unwrap_or(cfg.budget_points);
            let result = plan(&spec, budget, conservative || cfg.conservative)?;
            print!("{}", render_plan(&result, budget));
            Ok(exit_codes::COMPLETE)
        }
        Command::Status { spec } => {
            let list = load_current(&spec)?;
            print!("{}", render_status(&list));
            Ok(exit_codes::COMPLETE)
        }
    }
}

fn apply_overrides(
    cfg: &mut SupervisorConfig,
    max_iterations: Option<u32>,
    stuck_threshold: Option<u32>,
    budget: Option<u32>,
    conservative: bool,
) {
    if let Some(value) = max_iterations {
        cfg.max_iterations = value;
    }
    if let Some(value) = stuck_threshold {
        cfg.stuck_threshold = value;
    }
    if let Some(value) = budget {
        cfg.budget_points = value;
    }
    cfg.conservative |= conservative;
}

fn cmd_run(spec: &Path, workdir: &Path, cfg: &SupervisorConfig) -> Result<i32> {
    let spec = std::path::absolute(spec).context("resolve task document path")?;
    let paths = RunPaths::new(workdir, &run_id_for(Utc::now()));
    let event_log = JsonlEventLog::create(&paths)?;
    debug!(path = %event_log.path().display(), "event log");
    let mut sink = FanoutSink::new()
        .with(ConsoleSink)
        .with(TracingSink)
        .with(event_log);

    let mut runner = AgentIteration::new(
        ClaudeAgentRunner::from_config(&cfg.agent),
        IterationLimits::from_config(cfg),
    );
    let outcome = run_loop(
        &spec,
        &mut runner,
        &GitStubDetector,
        &mut sink,
        &LoopConfig::from_config(cfg, workdir),
    );
    Ok(outcome.exit_code())
}
