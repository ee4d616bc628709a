//! Mailbox transport seam.
//!
//! The watcher drives a [`Transport`] and reacts to the [`TransportSignal`]s it pushes.
//! [`imap::ImapTransport`] is the production implementation.

pub mod imap;
pub mod protocol;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::types::{MailboxInfo, MessageId};

pub use imap::ImapTransport;

/// Connection-level signals pushed by a transport.
#[derive(Debug)]
pub enum TransportSignal {
    /// Connected and authenticated.
    Ready,
    /// Connection closed (after `disconnect` or a failure).
    Close,
    Error(TransportError),
    /// New messages arrived in the open mailbox.
    Mail { count: u32 },
    /// Flags or other metadata changed in the open mailbox.
    Update { seq: Option<u32> },
}

pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

/// Fetch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Mark the message `\Seen` as a side effect of fetching it.
    pub mark_seen: bool,
}

/// Raw message bytes, in chunks.
pub type BodyStream = BoxStream<'static, TransportResult<Vec<u8>>>;

/// A fetched message: its session sequence number and raw body.
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: MessageId,
    /// Size reported by the server, when known.
    pub size: Option<u64>,
    pub body: BodyStream,
}

impl fmt::Debug for FetchedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedMessage")
            .field("seq", &self.seq)
            .field("uid", &self.uid)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Protocol operations the watcher needs from a mailbox client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request a connection. Outcome and later notifications arrive on `signals`.
    fn connect(&self, signals: SignalSender);

    /// Request disconnection. `Close` is signalled once the connection is gone.
    fn disconnect(&self);

    async fn open_box(&self, name: &str, read_only: bool) -> TransportResult<MailboxInfo>;

    async fn search(&self, criteria: &[String]) -> TransportResult<Vec<MessageId>>;

    async fn fetch(&self, id: MessageId, options: FetchOptions) -> TransportResult<FetchedMessage>;
}
