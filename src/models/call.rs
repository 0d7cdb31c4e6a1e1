use serde::{ Serialize, Deserialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "bot")]
    Assistant,
    System,
    /// Tool calls, function results and any role the provider adds later.
    #[serde(other)]
    Other,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Other => "other",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            conversation_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Call status as reported by the provider's call endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Forwarding,
    Ended,
    Failed,
    #[serde(other)]
    Unknown,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }
}

/// Persisted record of one call. Created with the minimal fields when the
/// call starts and completed by [`CallUpdate`] once it has been reconciled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub user_id: String,
    pub call_id: String,
    pub assistant_id: String,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub summary: Option<String>,
}

impl CallRecord {
    pub fn started(user_id: &str, call_id: &str, assistant_id: &str, start_time: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            call_id: call_id.to_string(),
            assistant_id: assistant_id.to_string(),
            start_time,
            end_time: None,
            messages: Vec::new(),
            transcript: String::new(),
            summary: None,
        }
    }

    pub fn apply(&mut self, update: CallUpdate) {
        self.end_time = Some(update.end_time);
        self.messages = update.messages;
        self.transcript = update.transcript;
        self.summary = update.summary;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUpdate {
    pub end_time: i64,
    pub messages: Vec<Message>,
    pub transcript: String,
    pub summary: Option<String>,
}

/// Renders messages as `role: content` lines, the fallback transcript when the
/// provider does not return one.
pub fn transcript_from_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
