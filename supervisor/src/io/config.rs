//! Supervisor configuration stored under `.supervisor/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::activity::DEFAULT_ACTIVITY_CAP;
use crate::core::budget::DEFAULT_BUDGET_POINTS;

/// Supervisor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values in
/// [`SupervisorConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Hard ceiling on iterations per run.
    pub max_iterations: u32,

    /// Consecutive iterations without a newly completed task before giving up.
    pub stuck_threshold: u32,

    /// Size points the scheduler may spend per iteration.
    pub budget_points: u32,

    /// Select at most one M/L task per iteration.
    pub conservative: bool,

    /// Activity items retained per iteration.
    pub activity_log_cap: usize,

    /// Wall-clock budget for one agent invocation, in seconds.
    pub iteration_timeout_secs: u64,

    /// Kill the agent after this long without any output, in seconds.
    pub idle_timeout_secs: u64,

    /// Truncate captured agent stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and leading arguments (e.g. `["claude"]`).
    pub command: Vec<String>,
    /// Extra arguments appended after the command.
    pub args: Vec<String>,
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
            args: [
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            model: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            stuck_threshold: 3,
            budget_points: DEFAULT_BUDGET_POINTS,
            conservative: false,
            activity_log_cap: DEFAULT_ACTIVITY_CAP,
            iteration_timeout_secs: 30 * 60,
            idle_timeout_secs: 5 * 60,
            stderr_limit_bytes: 100_000,
            agent: AgentConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.stuck_threshold == 0 {
            return Err(anyhow!("stuck_threshold must be > 0"));
        }
        if self.budget_points == 0 {
            return Err(anyhow!("budget_points must be > 0"));
        }
        if self.iteration_timeout_secs == 0 {
            return Err(anyhow!("iteration_timeout_secs must be > 0"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(anyhow!("idle_timeout_secs must be > 0"));
        }
        if self.stderr_limit_bytes == 0 {
            return Err(anyhow!("stderr_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SupervisorConfig::default()`.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SupervisorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SupervisorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SupervisorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".supervisor/config.toml");
        let cfg = SupervisorConfig {
            conservative: true,
            agent: AgentConfig {
                model: Some("sonnet".to_string()),
                ..AgentConfig::default()
            },
            ..SupervisorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 4\n[agent]\ncommand = [\"my-agent\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 4);
        assert_eq!(cfg.stuck_threshold, 3);
        assert_eq!(cfg.agent.command, vec!["my-agent"]);
        assert_eq!(cfg.agent.args, AgentConfig::default().args);
    }

    #[test]
    fn rejects_zero_stuck_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "stuck_threshold = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("stuck_threshold"));
    }
}
