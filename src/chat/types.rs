// src/chat/types.rs
// Turn request/response types and the outward SSE event union.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Typed part within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        name: String,
        success: bool,
        output: String,
    },
}

/// A conversation message. Ids are generated before persistence so a message
/// produced mid-stream can be referenced by clients before it is saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    pub created_at: i64,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            attachments: Vec::new(),
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::Text { text: text.into() }])
    }

    /// Concatenated text content of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// Turn submission
// ============================================================================

/// One message as submitted by a client (UI shape: either typed parts or a
/// bare content string)
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

impl IncomingMessage {
    pub fn text(&self) -> String {
        let from_parts: String = self
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if from_parts.is_empty() {
            self.content.clone().unwrap_or_default()
        } else {
            from_parts
        }
    }
}

/// Turn submission: conversation id, ordered prior messages (the newest user
/// message included), and the model selector.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub id: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(alias = "selectedChatModel")]
    pub selected_chat_model: String,
}

impl TurnRequest {
    /// The most recent user message; its absence is a client error.
    pub fn most_recent_user_message(&self) -> Option<&IncomingMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

// ============================================================================
// Usage
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub reasoning_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }

    pub fn is_zero(&self) -> bool {
        *self == Usage::default()
    }
}

// ============================================================================
// Outward stream events
// ============================================================================

/// Events sent to the client, one SSE frame each. A stream carries zero or
/// more content events, at most one `usage`, and exactly one terminal frame
/// (`done` or `error`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// Start of the assistant message; carries the pre-generated message id
    #[serde(rename = "message_start")]
    MessageStart { message_id: String },

    #[serde(rename = "text_delta")]
    TextDelta { delta: String },

    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { delta: String },

    /// Tool call issued - emitted as soon as the model names the tool
    #[serde(rename = "tool_call_start")]
    ToolCallStart {
        call_id: String,
        name: String,
    },

    #[serde(rename = "tool_call_result")]
    ToolCallResult {
        call_id: String,
        name: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },

    /// Token usage - at most once per turn, after the last content event
    #[serde(rename = "usage")]
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        reasoning_tokens: u32,
    },

    /// Terminal: stream completed
    #[serde(rename = "done")]
    Done,

    /// Terminal: stream errored
    #[serde(rename = "error")]
    Error { message: String },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done | ChatEvent::Error { .. })
    }
}
