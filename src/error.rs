//! Error types for the mail listener.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors. Raised synchronously at construction, never at runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid attachments directory")]
    InvalidAttachmentDirectory,

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Command {command} failed: {response}")]
    Command { command: String, response: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?} waiting for the server")]
    Timeout(Duration),

    #[error("Connection closed by server")]
    Closed,

    #[error("Not connected")]
    NotConnected,

    #[error("Message with UID {uid} not returned by the server")]
    MissingMessage { uid: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// MIME decoder errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Decoder finished without an end-of-message event")]
    Truncated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime errors surfaced to subscribers as `error` events.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),

    #[error("Failed to open mailbox {mailbox}: {source}")]
    MailboxOpen {
        mailbox: String,
        #[source]
        source: TransportError,
    },

    #[error("Search failed: {0}")]
    Search(#[source] TransportError),

    #[error("Fetch of UID {uid} failed: {source}")]
    Fetch {
        uid: u32,
        #[source]
        source: TransportError,
    },

    #[error("Message stream failed: {0}")]
    Stream(#[source] TransportError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to write attachment {filename} to {}: {source}", path.display())]
    Attachment {
        filename: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WatchError {
    /// UID of the message this error concerns, when known before a seq number exists.
    pub fn uid(&self) -> Option<u32> {
        match self {
            Self::Fetch { uid, .. } => Some(*uid),
            _ => None,
        }
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
