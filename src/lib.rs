//! Mail Listener — watch a mailbox, decode matching messages, publish events.

pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod fetch;
pub mod persist;
pub mod pipeline;
pub mod transport;
pub mod types;
pub mod watcher;

pub use config::{ImapOptions, WatchConfig, WatchOptions};
pub use error::{ConfigError, DecodeError, TransportError, WatchError};
pub use events::{EventKind, EventStream, MailEvent};
pub use types::{AttachmentMeta, ConnectionState, MailRecord};
pub use watcher::MailListener;
