//! Connection lifecycle and notification-driven searches.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{ImapOptions, WatchConfig, WatchOptions};
use crate::decoder::{MailParserDecoder, MimeDecoder};
use crate::error::{ConfigError, WatchError};
use crate::events::{EventBus, EventKind, EventStream, MailEvent};
use crate::fetch::FetchCoordinator;
use crate::pipeline::{AttachmentSink, PipelineContext};
use crate::transport::{ImapTransport, Transport, TransportSignal};
use crate::types::ConnectionState;

/// Watches one mailbox and publishes [`MailEvent`]s to subscribers.
///
/// Construction validates the configuration and never touches the network.
/// `start` must be called from inside a tokio runtime.
pub struct MailListener {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<WatchConfig>,
    transport: Arc<dyn Transport>,
    coordinator: Arc<FetchCoordinator>,
    events: EventBus,
    state: watch::Sender<ConnectionState>,
}

impl MailListener {
    pub fn new(
        options: WatchOptions,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn MimeDecoder>,
    ) -> Result<Self, ConfigError> {
        let config = Arc::new(WatchConfig::try_from(options)?);
        let events = EventBus::new();

        let pipeline = Arc::new(PipelineContext {
            decoder,
            decoder_options: config.decoder_options.clone(),
            attachments: config.attachments.clone().map(AttachmentSink::new),
            events: events.clone(),
        });
        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::clone(&transport),
            pipeline,
            config.search_filter.clone(),
            config.mark_seen,
        ));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                coordinator,
                events,
                state,
            }),
        })
    }

    /// Listener backed by [`ImapTransport`] and [`MailParserDecoder`].
    pub fn imap(options: WatchOptions, imap: ImapOptions) -> Result<Self, ConfigError> {
        Self::new(
            options,
            Arc::new(ImapTransport::new(imap)),
            Arc::new(MailParserDecoder::new()),
        )
    }

    /// Request a connection. Progress is reported through events and [`Self::state`].
    pub fn start(&self) {
        info!(mailbox = %self.inner.config.mailbox, "Starting mail listener");
        self.inner.set_state(ConnectionState::Connecting);

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.transport.connect(tx);
        tokio::spawn(Arc::clone(&self.inner).run_signals(rx));
    }

    /// Request disconnection. `server:disconnected` follows once the transport closes.
    pub fn stop(&self) {
        info!("Stopping mail listener");
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.transport.disconnect();
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventStream {
        self.inner.events.subscribe_to(kinds)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.inner.config
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: MailEvent) {
        self.events.emit(event);
    }

    async fn run_signals(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<TransportSignal>) {
        let mut mailbox_open = false;

        while let Some(signal) = signals.recv().await {
            match signal {
                TransportSignal::Ready => {
                    mailbox_open = self.open_mailbox().await;
                }
                TransportSignal::Mail { count } => {
                    if mailbox_open {
                        debug!(count, "New mail notification");
                        self.spawn_search();
                    } else {
                        debug!(count, "Mail notification before mailbox open, ignored");
                    }
                }
                TransportSignal::Update { seq } => {
                    if mailbox_open {
                        debug!(?seq, "Mailbox update notification");
                        self.spawn_search();
                    }
                }
                TransportSignal::Close => {
                    mailbox_open = false;
                    info!("Server disconnected");
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(MailEvent::ServerDisconnected);
                }
                TransportSignal::Error(e) => {
                    warn!("Connection error: {e}");
                    self.set_state(ConnectionState::Errored);
                    self.emit(MailEvent::error(WatchError::Connection(e), None));
                }
            }
        }
        debug!("Transport signal channel closed");
    }

    /// Open the configured mailbox. Returns whether notifications should now trigger searches.
    async fn open_mailbox(self: &Arc<Self>) -> bool {
        let mailbox = &self.config.mailbox;
        let read_only = !self.config.mark_seen;

        let info = match self.transport.open_box(mailbox, read_only).await {
            Ok(info) => info,
            Err(source) => {
                warn!(mailbox = %mailbox, "Failed to open mailbox: {source}");
                self.emit(MailEvent::error(
                    WatchError::MailboxOpen {
                        mailbox: mailbox.clone(),
                        source,
                    },
                    None,
                ));
                return false;
            }
        };

        info!(
            mailbox = %info.name,
            exists = info.exists,
            read_only = info.read_only,
            "Mailbox open"
        );
        self.set_state(ConnectionState::Ready);
        self.emit(MailEvent::ServerConnected);
        self.emit(MailEvent::Mailbox(info));

        if self.config.fetch_on_start {
            self.spawn_search();
        }
        true
    }

    fn spawn_search(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            coordinator.search().await;
        });
    }
}
