//! The wire message and the known message type tags.
//!
//! Unlike a closed enum of payload structs, a [`Message`] carries its type as
//! an open string tag plus ordered string arguments.  New message types can
//! be introduced by either side without touching the framing: a peer that
//! does not recognise a tag decodes it as [`MessageType::Other`] and ignores it.

use serde::{Deserialize, Serialize};

/// Sender name used on every message produced by the server.
pub const SERVER_SENDER: &str = "server";

// ── Message type tags ─────────────────────────────────────────────────────────

/// Message type tags understood by this version of the protocol.
///
/// Client → server: `Auth` through `LowerHand`.
/// Server → client: `AuthOk` through `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Client → server
    Auth,
    NextTask,
    SendAnswer,
    AskOverview,
    AskTaskById,
    SendDeliver,
    Warning,
    RaiseHand,
    LowerHand,
    // Server → client
    AuthOk,
    AuthErr,
    SendTask,
    SendOverview,
    EndTest,
    TestPaused,
    TestResumed,
    TimeExpired,
    Error,
    /// Any tag this version does not know about.
    Other(String),
}

impl MessageType {
    /// Returns the tag as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Auth => "AUTH",
            MessageType::NextTask => "NEXT_TASK",
            MessageType::SendAnswer => "SEND_ANSWER",
            MessageType::AskOverview => "ASK_OVERVIEW",
            MessageType::AskTaskById => "ASK_TASK_BY_ID",
            MessageType::SendDeliver => "SEND_DELIVER",
            MessageType::Warning => "WARNING",
            MessageType::RaiseHand => "RAISE_HAND",
            MessageType::LowerHand => "LOWER_HAND",
            MessageType::AuthOk => "AUTH_OK",
            MessageType::AuthErr => "AUTH_ERR",
            MessageType::SendTask => "SEND_TASK",
            MessageType::SendOverview => "SEND_OVERVIEW",
            MessageType::EndTest => "END_TEST",
            MessageType::TestPaused => "TEST_PAUSED",
            MessageType::TestResumed => "TEST_RESUMED",
            MessageType::TimeExpired => "TIME_EXPIRED",
            MessageType::Error => "ERROR",
            MessageType::Other(tag) => tag,
        }
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "AUTH" => MessageType::Auth,
            "NEXT_TASK" => MessageType::NextTask,
            "SEND_ANSWER" => MessageType::SendAnswer,
            "ASK_OVERVIEW" => MessageType::AskOverview,
            "ASK_TASK_BY_ID" => MessageType::AskTaskById,
            "SEND_DELIVER" => MessageType::SendDeliver,
            "WARNING" => MessageType::Warning,
            "RAISE_HAND" => MessageType::RaiseHand,
            "LOWER_HAND" => MessageType::LowerHand,
            "AUTH_OK" => MessageType::AuthOk,
            "AUTH_ERR" => MessageType::AuthErr,
            "SEND_TASK" => MessageType::SendTask,
            "SEND_OVERVIEW" => MessageType::SendOverview,
            "END_TEST" => MessageType::EndTest,
            "TEST_PAUSED" => MessageType::TestPaused,
            "TEST_RESUMED" => MessageType::TestResumed,
            "TIME_EXPIRED" => MessageType::TimeExpired,
            "ERROR" => MessageType::Error,
            other => MessageType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One protocol message.
///
/// Arguments keep their insertion order on the wire.  Duplicate keys are
/// allowed; [`Message::arg`] returns the value written last.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub message_type: String,
    pub token: String,
    pub args: Vec<(String, String)>,
}

impl Message {
    /// Creates a message with no arguments.
    pub fn new(sender: impl Into<String>, message_type: MessageType, token: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message_type: message_type.as_str().to_string(),
            token: token.into(),
            args: Vec::new(),
        }
    }

    /// Creates a server-originated message addressed to the holder of `token`.
    pub fn from_server(message_type: MessageType, token: impl Into<String>) -> Self {
        Self::new(SERVER_SENDER, message_type, token)
    }

    /// Appends an argument and returns the message, for chained construction.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push_arg(key, value);
        self
    }

    /// Appends an argument in place.
    pub fn push_arg(&mut self, key: impl Into<String>, value: impl ToString) {
        self.args.push((key.into(), value.to_string()));
    }

    /// Returns the value of the last argument named `key`.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses the last argument named `key` as an integer.
    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        self.arg(key).and_then(|v| v.trim().parse().ok())
    }

    /// Returns the parsed type tag.
    pub fn kind(&self) -> MessageType {
        MessageType::from(self.message_type.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
