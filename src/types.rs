//! Data model shared by the watcher, the pipeline, and subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Transport-assigned message identifier returned by a search (an IMAP UID).
pub type MessageId = u32;

/// Lifecycle of the watcher's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Metadata reported when a mailbox is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxInfo {
    pub name: String,
    pub read_only: bool,
    /// Number of messages in the mailbox.
    pub exists: u32,
    pub recent: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// A header value as the decoder reports it: one value, or all values of a repeated header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// First (or only) value.
    pub fn first(&self) -> &str {
        match self {
            Self::Single(v) => v,
            Self::Multi(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Append another occurrence, promoting a single value to a list.
    pub fn push(&mut self, value: String) {
        match self {
            Self::Single(existing) => {
                let first = std::mem::take(existing);
                *self = Self::Multi(vec![first, value]);
            }
            Self::Multi(vs) => vs.push(value),
        }
    }
}

/// Message headers keyed by lowercase header name.
pub type HeaderMap = BTreeMap<String, HeaderValue>;

/// Kind of a decoded body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Text,
    Html,
}

/// The decoded message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    pub kind: TextKind,
    pub content: String,
}

impl TextPart {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: TextKind::Text,
            content: content.into(),
        }
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self {
            kind: TextKind::Html,
            content: content.into(),
        }
    }
}

/// Decoder-supplied description of an attachment, handed to filename policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentInfo {
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    /// Decoded size in bytes as reported by the decoder.
    pub size: usize,
}

/// Where an attachment's content ended up.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentStorage {
    /// Persistence disabled; content held in memory.
    Memory {
        #[serde(skip)]
        content: Arc<[u8]>,
    },
    /// Written to disk.
    Disk { path: PathBuf },
    /// Persistence was attempted and failed.
    Failed { error: String },
}

/// An attachment as reported to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    pub size: u64,
    pub storage: AttachmentStorage,
}

impl AttachmentMeta {
    /// Path written on disk, if persisted.
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.storage {
            AttachmentStorage::Disk { path } => Some(path),
            _ => None,
        }
    }

    /// In-memory content, if persistence was disabled.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.storage {
            AttachmentStorage::Memory { content } => Some(content),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.storage, AttachmentStorage::Failed { .. })
    }
}

/// The aggregated result of one fully decoded message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MailRecord {
    /// Sequence number of the originating message, valid for the current session only.
    pub seq: u32,
    pub headers: HeaderMap,
    pub body: Option<TextPart>,
    pub attachments: Vec<AttachmentMeta>,
}

impl MailRecord {
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject").map(HeaderValue::first)
    }
}
