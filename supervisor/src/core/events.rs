//! Typed events decoded from the agent's line protocol.

use serde::Serialize;
use serde_json::Value;

/// One domain event produced by [`crate::core::line_parser::LineParser`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserEvent {
    /// Session initialization (`system` envelope).
    Init {
        session_id: Option<String>,
        model: Option<String>,
    },
    /// The agent invoked a tool.
    ToolStart {
        tool_use_id: String,
        tool_name: String,
        input: Value,
    },
    /// A tool invocation finished; correlated to its start by `tool_use_id`.
    ToolEnd {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    /// Free text from the agent.
    Text { text: String },
    /// Terminal summary for the session.
    Result {
        duration_ms: Option<u64>,
        is_error: bool,
        num_turns: Option<u32>,
        total_cost_usd: Option<f64>,
        usage: Option<Value>,
    },
    /// A line looked like a message but could not be decoded.
    Error {
        error: String,
        raw_line: Option<String>,
    },
}
