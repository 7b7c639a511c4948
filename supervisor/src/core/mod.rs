//! Deterministic, pure logic shared by the supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod activity;
pub mod budget;
pub mod dependencies;
pub mod events;
pub mod iteration_state;
pub mod line_parser;
pub mod tools;
pub mod types;
