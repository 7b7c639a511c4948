//! Iteration supervisor for an external coding agent.
//!
//! The supervisor feeds an agent a budgeted slice of a Markdown task list,
//! follows its `stream-json` output, and decides after each iteration whether
//! to continue. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (line parsing, iteration state,
//!   budget scheduling). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (task document, config, agent
//!   process, git, event log). Isolated behind traits for tests.
//!
//! Orchestration modules ([`iteration`], [`looping`], [`plan`]) combine the two
//! to implement CLI commands. Progress is reported through [`lifecycle`] sinks.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod iteration;
pub mod lifecycle;
pub mod logging;
pub mod looping;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
