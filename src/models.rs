use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System label every unprocessed message carries
pub const INBOX_LABEL: &str = "INBOX";

/// A single message header, in the order the message carried it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A fully fetched message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub headers: Vec<Header>,
}

impl Message {
    /// Value of the first header with this name (ASCII case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

/// Where a label shows up in the Gmail UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVisibility {
    /// `labelShow`, `labelShowIfUnread` or `labelHide`
    pub label_list: String,
    /// `show` or `hide`
    pub message_list: String,
}

impl Default for LabelVisibility {
    fn default() -> Self {
        Self {
            label_list: "labelShow".to_string(),
            message_list: "show".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub visibility: LabelVisibility,
}

/// Serialized reply ready for the send call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    /// RFC 822 message, CRLF line endings
    pub bytes: Vec<u8>,
    /// Thread of the message being answered
    pub thread_id: Option<String>,
}

impl RawReply {
    /// Lossy text view, for logs and assertions
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Step of the per-message sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStage {
    Fetch,
    Compose,
    Send,
    Relabel,
}

/// What happened to one message during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Replied,
    AlreadyReplied,
    Failed {
        stage: ProcessingStage,
        error: String,
    },
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub listed: usize,
    pub replied: usize,
    pub already_replied: usize,
    pub failed: usize,
    /// Set when the API asked us to back off; the rest of the cycle was skipped
    pub rate_limited_for: Option<u64>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self {
            cycle_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            listed: 0,
            replied: 0,
            already_replied: 0,
            failed: 0,
            rate_limited_for: None,
        }
    }

    pub fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Replied => self.replied += 1,
            MessageOutcome::AlreadyReplied => self.already_replied += 1,
            MessageOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

impl Default for CycleReport {
    fn default() -> Self {
        Self::new()
    }
}
