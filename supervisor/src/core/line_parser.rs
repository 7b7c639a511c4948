//! Incremental decoder for the agent's `stream-json` output.
//!
//! The agent writes one JSON envelope per line. Output arrives in arbitrary
//! chunks, so the parser buffers the bytes after the last newline and only
//! decodes complete lines. Splitting a stream differently never changes the
//! resulting events, only when they become available.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::events::ParserEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    System {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: Message,
    },
    User {
        message: Message,
    },
    Result {
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        usage: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Content,
}

/// Message content is either a block list or a bare string.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Content {
    Blocks(Vec<ContentBlock>),
    Text(String),
    #[default]
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
    #[default]
    Empty,
}

impl ToolResultContent {
    /// Flatten to plain text; non-text blocks are dropped.
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            ToolResultContent::Empty => String::new(),
        }
    }
}

/// Line-buffered `stream-json` parser.
///
/// Not thread-safe; feed it from the single consumer of the stream.
#[derive(Debug, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
    pending_tool_ids: BTreeSet<String>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return events for every line it completes.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<ParserEvent> {
        self.buffer.extend_from_slice(chunk.as_ref());
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.parse_line(&line[..line.len() - 1], &mut events);
        }
        events
    }

    /// Decode whatever remains in the buffer as a final, unterminated line.
    pub fn flush(&mut self) -> Vec<ParserEvent> {
        let line = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        self.parse_line(&line, &mut events);
        events
    }

    /// Drop buffered bytes and forget in-flight tool ids.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_tool_ids.clear();
    }

    /// Tool-use ids started but not yet finished. Diagnostic only.
    pub fn pending_tool_ids(&self) -> &BTreeSet<String> {
        &self.pending_tool_ids
    }

    fn parse_line(&mut self, raw: &[u8], events: &mut Vec<ParserEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        if !line.starts_with('{') {
            trace!(line, "skipping non-json line");
            return;
        }

        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(err = %err, "failed to decode line");
                events.push(ParserEvent::Error {
                    error: err.to_string(),
                    raw_line: Some(line.to_string()),
                });
                return;
            }
        };

        match envelope {
            Envelope::System { session_id, model } => {
                events.push(ParserEvent::Init { session_id, model });
            }
            Envelope::Assistant { message } => self.assistant_events(message, events),
            Envelope::User { message } => self.user_events(message, events),
            Envelope::Result {
                duration_ms,
                is_error,
                num_turns,
                total_cost_usd,
                usage,
            } => events.push(ParserEvent::Result {
                duration_ms,
                is_error,
                num_turns,
                total_cost_usd,
                usage,
            }),
            Envelope::Unknown => trace!("ignoring unknown envelope type"),
        }
    }

    fn assistant_events(&mut self, message: Message, events: &mut Vec<ParserEvent>) {
        let blocks = match message.content {
            Content::Blocks(blocks) => blocks,
            Content::Text(text) => {
                events.push(ParserEvent::Text { text });
                return;
            }
            Content::Empty => return,
        };
        for block in blocks {
            match block {
                ContentBlock::Text { text } => events.push(ParserEvent::Text { text }),
                ContentBlock::ToolUse { id, name, input } => {
                    self.pending_tool_ids.insert(id.clone());
                    events.push(ParserEvent::ToolStart {
                        tool_use_id: id,
                        tool_name: name,
                        input,
                    });
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
            }
        }
    }

    fn user_events(&mut self, message: Message, events: &mut Vec<ParserEvent>) {
        let Content::Blocks(blocks) = message.content else {
            return;
        };
        for block in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                if !self.pending_tool_ids.remove(&tool_use_id) {
                    debug!(tool_use_id = %tool_use_id, "tool result for unknown tool use");
                }
                events.push(ParserEvent::ToolEnd {
                    tool_use_id,
                    content: content.into_text(),
                    is_error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ASSISTANT_LINE: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Reading config"},{"type":"tool_use","id":"toolu_1","name":"Read","input":{"file_path":"/repo/src/config.rs"}}]}}"#;
    const USER_LINE: &str = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"fn main() {}"}]}}"#;

    fn parse_all(input: &str) -> Vec<ParserEvent> {
        let mut parser = LineParser::new();
        let mut events = parser.feed(input);
        events.extend(parser.flush());
        events
    }

    #[test]
    fn system_envelope_emits_init() {
        let events = parse_all(
            "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s-1\",\"model\":\"opus\"}\n",
        );
        assert_eq!(
            events,
            vec![ParserEvent::Init {
                session_id: Some("s-1".to_string()),
                model: Some("opus".to_string()),
            }]
        );
    }

    #[test]
    fn assistant_blocks_preserve_order() {
        let events = parse_all(&format!("{ASSISTANT_LINE}\n"));
        assert_eq!(
            events,
            vec![
                ParserEvent::Text {
                    text: "Reading config".to_string()
                },
                ParserEvent::ToolStart {
                    tool_use_id: "toolu_1".to_string(),
                    tool_name: "Read".to_string(),
                    input: json!({"file_path": "/repo/src/config.rs"}),
                },
            ]
        );
    }

    #[test]
    fn tool_result_clears_pending_id() {
        let mut parser = LineParser::new();
        parser.feed(format!("{ASSISTANT_LINE}\n"));
        assert!(parser.pending_tool_ids().contains("toolu_1"));

        let events = parser.feed(format!("{USER_LINE}\n"));
        assert!(parser.pending_tool_ids().is_empty());
        assert_eq!(
            events,
            vec![ParserEvent::ToolEnd {
                tool_use_id: "toolu_1".to_string(),
                content: "fn main() {}".to_string(),
                is_error: false,
            }]
        );
    }

    #[test]
    fn unmatched_tool_result_is_still_emitted() {
        let events = parse_all(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"ghost","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}],"is_error":true}]}}"#,
        );
        assert_eq!(
            events,
            vec![ParserEvent::ToolEnd {
                tool_use_id: "ghost".to_string(),
                content: "a\nb".to_string(),
                is_error: true,
            }]
        );
    }

    #[test]
    fn result_passes_optional_fields_through() {
        let events = parse_all(
            r#"{"type":"result","subtype":"success","duration_ms":1200,"is_error":false,"num_turns":3}"#,
        );
        assert_eq!(
            events,
            vec![ParserEvent::Result {
                duration_ms: Some(1200),
                is_error: false,
                num_turns: Some(3),
                total_cost_usd: None,
                usage: None,
            }]
        );
    }

    #[test]
    fn noise_and_blank_lines_are_ignored() {
        let events = parse_all("\n   \nwarning: something\n[progress] 50%\n");
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_json_reports_error_and_continues() {
        let input = format!("{{\"type\":\"assistant\",\n{USER_LINE}\n");
        let events = parse_all(&input);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ParserEvent::Error { raw_line, .. } => {
                assert_eq!(raw_line.as_deref(), Some("{\"type\":\"assistant\","));
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(matches!(events[1], ParserEvent::ToolEnd { .. }));
    }

    #[test]
    fn unknown_envelope_type_is_ignored() {
        let events = parse_all("{\"type\":\"stream_event\",\"event\":{}}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn chunking_does_not_change_events() {
        let stream = format!(
            "{{\"type\":\"system\",\"session_id\":\"s\"}}\n{ASSISTANT_LINE}\nnoise\n{USER_LINE}\n{{\"type\":\"result\",\"is_error\":false}}"
        );
        let whole = parse_all(&stream);
        assert_eq!(whole.len(), 5);

        let bytes = stream.as_bytes();
        for chunk_size in [1, 2, 3, 7, 16, 64, 255] {
            let mut parser = LineParser::new();
            let mut events = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                events.extend(parser.feed(chunk));
            }
            events.extend(parser.flush());
            assert_eq!(events, whole, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn split_multibyte_character_decodes_intact() {
        let line = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"héllo → wörld\"}]}}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').expect("accent") + 1;
        let mut parser = LineParser::new();
        let mut events = parser.feed(&bytes[..split]);
        assert!(events.is_empty());
        events.extend(parser.feed(&bytes[split..]));
        assert_eq!(
            events,
            vec![ParserEvent::Text {
                text: "héllo → wörld".to_string()
            }]
        );
    }

    #[test]
    fn events_wait_for_newline_until_flush() {
        let mut parser = LineParser::new();
        assert!(parser.feed(ASSISTANT_LINE).is_empty());
        assert_eq!(parser.flush().len(), 2);
        assert!(parser.flush().is_empty());
    }

    #[test]
    fn reset_drops_partial_line_and_pending_ids() {
        let mut parser = LineParser::new();
        parser.feed(format!("{ASSISTANT_LINE}\n{{\"type\":\"res"));
        parser.reset();
        assert!(parser.pending_tool_ids().is_empty());
        assert!(parser.flush().is_empty());
    }
}
