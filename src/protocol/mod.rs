//! Wire protocol for the chat event stream
//!
//! The backend answers a chat POST with a chunked body framed as
//! newline-separated records; meaningful lines carry a `data: ` prefix
//! followed by a JSON object with a `type` discriminator. Transport chunks
//! split lines at arbitrary byte positions, so [`LineFramer`] carries the
//! trailing partial line across reads. All legacy field-name shims
//! (`content`/`text` on thoughts, `content`/`chunk` on answers) are resolved
//! here, at the parsing boundary, so the session layer only ever sees
//! normalized [`StreamEvent`] values.

use serde::Deserialize;
use serde_json::Value;

use crate::conversation::{Citation, ToolRun};

const DATA_PREFIX: &str = "data: ";

/// A normalized event from the chat stream, one per `data: ` record.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metadata {
        conversation_id: Option<i64>,
        citations: Vec<Citation>,
        retrieval: Option<Value>,
    },
    Thought {
        content: String,
    },
    ToolCall {
        tool: String,
        input: Value,
    },
    ToolResult {
        result: Value,
    },
    /// Legacy simple-mode tool trace, distinct from the thought sequence.
    Tool(ToolRun),
    Answer {
        text: String,
    },
    Audit {
        report: Option<Value>,
    },
    Done {
        quality: Option<Value>,
    },
}

/// Result of parsing one prefixed line. A record can carry a typed event,
/// a soft error, or both (the error never terminates the stream).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedRecord {
    pub event: Option<StreamEvent>,
    pub error: Option<String>,
}

/// Raw serde mirror of one stream record, before normalization.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    // thought / error payloads
    content: Option<String>,
    text: Option<String>,
    // tool_call / tool_result
    tool: Option<String>,
    input: Option<Value>,
    result: Option<Value>,
    // legacy `tool` trace
    name: Option<String>,
    thought: Option<String>,
    output: Option<Value>,
    // answer
    chunk: Option<String>,
    // metadata
    conversation_id: Option<i64>,
    citations: Option<Vec<Citation>>,
    retrieval: Option<Value>,
    // audit / done
    report: Option<Value>,
    quality: Option<Value>,
    // soft error
    error: Option<Value>,
}

/// Parse one line of the stream body.
///
/// Returns `None` for lines without the `data: ` prefix (blank separators,
/// comments) and for prefixed lines whose JSON does not decode — the latter
/// are logged and skipped, never fatal.
pub fn parse_line(line: &str) -> Option<ParsedRecord> {
    let payload = line.strip_prefix(DATA_PREFIX)?;

    let raw: RawEvent = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(%err, line = %line, "skipping malformed stream record");
            return None;
        }
    };

    Some(normalize(raw))
}

fn normalize(raw: RawEvent) -> ParsedRecord {
    let error = raw.error.as_ref().map(stringify);

    let event = match raw.kind.as_deref() {
        Some("metadata") => Some(StreamEvent::Metadata {
            conversation_id: raw.conversation_id,
            citations: raw.citations.unwrap_or_default(),
            retrieval: raw.retrieval,
        }),
        Some("thought") => {
            // Reasoning mode sends `content`, the older pipeline `text`.
            // A thought with neither is dropped, matching the console.
            raw.content
                .or(raw.text)
                .filter(|c| !c.is_empty())
                .map(|content| StreamEvent::Thought { content })
        }
        Some("tool_call") => raw.tool.map(|tool| StreamEvent::ToolCall {
            tool,
            input: raw.input.unwrap_or(Value::Null),
        }),
        Some("tool_result") => Some(StreamEvent::ToolResult {
            result: raw.result.unwrap_or(Value::Null),
        }),
        Some("tool") => raw.name.map(|name| {
            StreamEvent::Tool(ToolRun {
                name,
                thought: raw.thought,
                input: raw.input.unwrap_or(Value::Null),
                output: raw.output.unwrap_or(Value::Null),
            })
        }),
        Some("answer") => {
            let text = raw.content.or(raw.chunk).unwrap_or_default();
            Some(StreamEvent::Answer { text })
        }
        Some("audit") => Some(StreamEvent::Audit { report: raw.report }),
        Some("done") => Some(StreamEvent::Done {
            quality: raw.quality,
        }),
        Some(other) => {
            tracing::debug!(kind = %other, "ignoring unknown stream event type");
            None
        }
        None => None,
    };

    ParsedRecord { event, error }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reassembles newline-delimited records from arbitrarily split transport
/// chunks. The trailing partial line is held until its newline arrives.
///
/// The carry is raw bytes: chunks can split a multi-byte UTF-8 character,
/// so decoding happens per complete line, never per chunk.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.carry.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush the trailing record at end-of-input, for streams whose final
    /// line is not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.carry);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
