pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single SMS-style message inside a polled thread snapshot
///
/// Structural equality over all fields is the dedup identity when repeated
/// polls of the same thread are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub from: String,
    pub text: String,
    pub time: DateTime<Utc>,
}

/// One polled conversation or voicemail item as the backend reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Backend thread identifier, stable across polls of the same thread
    pub id: String,
    /// Phone-number-like key before normalization
    pub number: String,
    /// Poll timestamp; must strictly increase within a merged history
    pub time: DateTime<Utc>,
    pub messages: Vec<SmsMessage>,
    pub is_read: bool,
    pub is_archived: bool,
    pub is_spam: bool,
    pub is_trash: bool,
}

/// The merged, append-only history of snapshots sharing a normalized number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub number: String,
    pub entries: Vec<ThreadSnapshot>,
}

impl Conversation {
    pub fn new(number: String) -> Self {
        Self {
            number,
            entries: Vec::new(),
        }
    }

    /// Timestamp of the most recently appended snapshot
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|entry| entry.time)
    }

    /// Total messages across all appended snapshots
    pub fn message_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.messages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One addressbook entry as the backend reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub number: String,
    pub name: String,
    pub phone_type: String,
    /// Raw provider payload, compared structurally when diffing polls
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Normalize a phone-number-like string to its merge key
///
/// Strips everything but digits and drops a leading country `1` from
/// eleven-digit numbers. Inputs without any digits (relay names, hidden
/// callers) are kept as trimmed text so they still form a stable key.
pub fn normalize_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return raw.trim().to_string();
    }
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}
