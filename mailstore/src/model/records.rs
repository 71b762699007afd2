use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::flags::{Flag, FlagSet};
use super::folder_class::FolderClasses;

/// Mailbox address as stored in the address-list columns (JSON array)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }
}

/// One header line. Names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of a folder row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: i64,
    pub name: String,
    pub visible_limit: u32,
    pub last_checked: i64,
    pub last_pushed: i64,
    pub push_state: Option<String>,
    pub status: Option<String>,
    pub classes: FolderClasses,
    pub integrate: bool,
    pub in_top_group: bool,
}

/// Snapshot of a message row.
///
/// `flags` merges the dedicated flag columns with the extra-flags text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMessage {
    pub id: i64,
    pub folder_id: i64,
    pub uid: Option<String>,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub flags: FlagSet,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub date: Option<DateTime<Utc>>,
    pub internal_date: Option<DateTime<Utc>>,
    pub preview: Option<String>,
    pub mime_type: Option<String>,
    pub attachment_count: u32,
    pub empty: bool,
    pub thread: Option<ThreadNode>,
    /// Filled by `LocalFolder::populate_headers`
    #[serde(default)]
    pub headers: Vec<HeaderField>,
}

impl LocalMessage {
    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn thread_root(&self) -> Option<i64> {
        self.thread.as_ref().map(ThreadNode::effective_root)
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Conversation linkage of one message row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNode {
    pub id: i64,
    pub message_row: i64,
    /// `None` only when the node is its own root
    pub root: Option<i64>,
    pub parent: Option<i64>,
}

impl ThreadNode {
    pub fn effective_root(&self) -> i64 {
        self.root.unwrap_or(self.id)
    }

    pub fn is_root(&self) -> bool {
        self.root.is_none()
    }
}

/// Outcome of thread resolution for one incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread node of a reusable placeholder, if one existed
    pub thread_id: Option<i64>,
    /// Message row of that placeholder
    pub msg_id: Option<i64>,
    pub message_id: Option<String>,
    pub root: Option<i64>,
    pub parent: Option<i64>,
}

/// Snapshot of an attachment row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub message_row: i64,
    pub store_data: Option<String>,
    pub content_uri: Option<String>,
    pub size: u64,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub content_id: Option<String>,
    pub content_disposition: Option<String>,
}

/// Stored content of a message
#[derive(Debug, Clone, Default)]
pub struct StoredBody {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<AttachmentRecord>,
}

pub(crate) fn to_millis(date: &DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
