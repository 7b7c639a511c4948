//! Side-effecting helpers: files, git, child processes.

pub mod agent;
pub mod config;
pub mod event_log;
pub mod git;
pub mod process;
pub mod prompt;
pub mod stubs;
pub mod task_doc;
