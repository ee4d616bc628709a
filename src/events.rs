//! Subscriber-facing event surface with multi-subscriber fan-out.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::WatchError;
use crate::types::{AttachmentMeta, HeaderMap, MailRecord, MailboxInfo, TextPart};

/// Names of the event categories, for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerConnected,
    ServerDisconnected,
    Mailbox,
    Headers,
    Body,
    Attachment,
    Mail,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerConnected => "server:connected",
            Self::ServerDisconnected => "server:disconnected",
            Self::Mailbox => "mailbox",
            Self::Headers => "headers",
            Self::Body => "body",
            Self::Attachment => "attachment",
            Self::Mail => "mail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_error<S: Serializer>(error: &Arc<WatchError>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

/// One event emitted by the listener.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MailEvent {
    #[serde(rename = "server:connected")]
    ServerConnected,
    #[serde(rename = "server:disconnected")]
    ServerDisconnected,
    Mailbox(MailboxInfo),
    Headers { seq: u32, headers: HeaderMap },
    Body { seq: u32, body: TextPart },
    Attachment { seq: u32, attachment: AttachmentMeta },
    Mail { seq: u32, mail: MailRecord },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u32>,
        #[serde(serialize_with = "serialize_error")]
        error: Arc<WatchError>,
    },
}

impl MailEvent {
    pub fn error(error: WatchError, seq: Option<u32>) -> Self {
        Self::Error {
            seq,
            error: Arc::new(error),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::ServerConnected => EventKind::ServerConnected,
            Self::ServerDisconnected => EventKind::ServerDisconnected,
            Self::Mailbox(_) => EventKind::Mailbox,
            Self::Headers { .. } => EventKind::Headers,
            Self::Body { .. } => EventKind::Body,
            Self::Attachment { .. } => EventKind::Attachment,
            Self::Mail { .. } => EventKind::Mail,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Sequence number of the message this event belongs to, if any.
    pub fn seq(&self) -> Option<u32> {
        match self {
            Self::Headers { seq, .. }
            | Self::Body { seq, .. }
            | Self::Attachment { seq, .. }
            | Self::Mail { seq, .. } => Some(*seq),
            Self::Error { seq, .. } => *seq,
            _ => None,
        }
    }

    /// Transport UID carried by an error raised before the message had a sequence number.
    pub fn uid(&self) -> Option<u32> {
        match self {
            Self::Error { error, .. } => error.uid(),
            _ => None,
        }
    }
}

struct Subscriber {
    kinds: Option<Vec<EventKind>>,
    tx: mpsc::UnboundedSender<MailEvent>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Fan-out of events to every live subscriber, in emission order.
///
/// Each subscriber gets its own unbounded queue, so a slow consumer never loses events.
/// Events emitted with no subscribers are dropped.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> EventStream {
        self.register(None)
    }

    /// Subscribe to the listed event kinds only.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventStream {
        self.register(Some(kinds.to_vec()))
    }

    fn register(&self, kinds: Option<Vec<EventKind>>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber { kinds, tx });
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Deliver an event to all interested subscribers, pruning closed ones.
    pub fn emit(&self, event: MailEvent) {
        let kind = event.kind();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sub| !sub.tx.is_closed());
        if subscribers.is_empty() {
            debug!(event = %kind, "No subscribers, event dropped");
            return;
        }
        for sub in subscribers.iter().filter(|s| s.wants(kind)) {
            let _ = sub.tx.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A subscriber's view of the event sequence.
pub struct EventStream {
    inner: UnboundedReceiverStream<MailEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once the listener is dropped.
    pub async fn recv(&mut self) -> Option<MailEvent> {
        self.inner.as_mut().recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<MailEvent> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = MailEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn fan_out_preserves_order_per_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(MailEvent::ServerConnected);
        bus.emit(MailEvent::Mailbox(MailboxInfo::default()));
        bus.emit(MailEvent::ServerDisconnected);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.unwrap().kind(), EventKind::ServerConnected);
            assert_eq!(sub.recv().await.unwrap().kind(), EventKind::Mailbox);
            assert_eq!(sub.recv().await.unwrap().kind(), EventKind::ServerDisconnected);
        }
    }

    #[tokio::test]
    async fn filtered_subscription() {
        let bus = EventBus::new();
        let mut errors = bus.subscribe_to(&[EventKind::Error]);

        bus.emit(MailEvent::ServerConnected);
        bus.emit(MailEvent::error(WatchError::Search(TransportError::Closed), None));

        let event = errors.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::Error);
        assert!(errors.try_recv().is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(a);
        bus.emit(MailEvent::ServerConnected);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(MailEvent::ServerConnected).unwrap();
        assert_eq!(json["event"], "server:connected");

        let err = MailEvent::error(
            WatchError::Fetch {
                uid: 4,
                source: TransportError::Closed,
            },
            None,
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["event"], "error");
        assert!(json["error"].as_str().unwrap().contains("UID 4"));
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn fetch_errors_correlate_by_uid() {
        let fetch = MailEvent::error(
            WatchError::Fetch {
                uid: 12,
                source: TransportError::MissingMessage { uid: 12 },
            },
            None,
        );
        assert_eq!(fetch.seq(), None);
        assert_eq!(fetch.uid(), Some(12));

        let search = MailEvent::error(WatchError::Search(TransportError::Closed), None);
        assert_eq!(search.uid(), None);
        assert_eq!(MailEvent::ServerConnected.uid(), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!(EventKind::ServerConnected.to_string(), "server:connected");
        assert_eq!(EventKind::Mail.as_str(), "mail");
    }
}
