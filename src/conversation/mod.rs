//! Conversation types and message-log state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in the append-only message log.
///
/// User messages are appended optimistically before the network call
/// completes; assistant messages only once the turn reaches a terminal
/// state. Entries are never mutated after being appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thoughts: Vec<ThoughtStep>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), Vec::new())
    }

    pub fn assistant(content: impl Into<String>, thoughts: Vec<ThoughtStep>) -> Self {
        Self::new(Role::Assistant, content.into(), thoughts)
    }

    fn new(role: Role, content: String, thoughts: Vec<ThoughtStep>) -> Self {
        let now = Utc::now();
        Self {
            // Server-side ids are assigned on persistence; locally created
            // entries use a millisecond timestamp like the web console did.
            id: now.timestamp_millis(),
            role,
            content,
            created_at: now,
            thoughts,
        }
    }
}

/// One step of the reasoning trace attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThoughtStep {
    Thought { content: String },
    ToolCall { tool: String, input: Value },
    ToolResult { result: Value },
    Error { content: String },
}

/// Retrieval context for the current answer. A turn has at most one
/// citation set; each `metadata` event replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: i64,
    pub source: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub snippet: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_type: Option<String>,
}

/// Legacy coarse-grained tool trace entry (simple-mode `tool` events).
/// Kept as a flat list parallel to the ThoughtStep sequence, never merged
/// into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub input: Value,
    pub output: Value,
}

/// Sidebar entry from `GET /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Full record from `GET /conversations/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_step_tagging() {
        let step = ThoughtStep::ToolCall {
            tool: "kb_search".into(),
            input: serde_json::json!({"query": "dax"}),
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["tool"], "kb_search");

        let back: ThoughtStep = serde_json::from_value(v).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = Message::user("hello");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "user");
        // No reasoning trace on a user turn.
        assert!(v.get("thoughts").is_none());
    }

    #[test]
    fn record_tolerates_missing_fields() {
        let rec: ConversationRecord = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(rec.id, 7);
        assert!(rec.mode.is_none());
        assert!(rec.messages.is_empty());
    }
}
