//! End-to-end listener behaviour against a scripted transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::io::AsyncWriteExt;

use mail_listener::config::AttachmentOptions;
use mail_listener::decoder::{
    DecodedAttachment, DecoderEvent, DecoderOptions, DecoderStream, MailParserDecoder,
    MimeDecoder, Release,
};
use mail_listener::error::TransportResult;
use mail_listener::transport::{
    FetchOptions, FetchedMessage, SignalSender, Transport, TransportSignal,
};
use mail_listener::types::{AttachmentInfo, HeaderMap, MailboxInfo, MessageId, TextPart};
use mail_listener::{
    ConfigError, ConnectionState, EventKind, EventStream, MailEvent, MailListener,
    TransportError, WatchError, WatchOptions,
};

const TIMEOUT: Duration = Duration::from_secs(5);

const WITH_ATTACHMENT: &str = concat!(
    "From: Alice <alice@example.com>\r\n",
    "Subject: Invoice\r\n",
    "MIME-Version: 1.0\r\n",
    "Content-Type: multipart/mixed; boundary=\"B\"\r\n",
    "\r\n",
    "--B\r\n",
    "Content-Type: text/plain\r\n",
    "\r\n",
    "Invoice attached.\r\n",
    "--B\r\n",
    "Content-Type: application/pdf; name=\"invoice.pdf\"\r\n",
    "Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n",
    "Content-Transfer-Encoding: base64\r\n",
    "\r\n",
    "JVBERi0xLjQK\r\n",
    "--B--\r\n",
);

/// Transport that serves canned messages and records every call.
#[derive(Default)]
struct StubTransport {
    signals: Mutex<Option<SignalSender>>,
    auto_ready: bool,
    open_fails: bool,
    search_fails: bool,
    ids: Vec<MessageId>,
    failing_fetches: HashSet<MessageId>,
    message: Option<&'static str>,
    searches: AtomicUsize,
    fetched: Mutex<Vec<MessageId>>,
    fetch_options: Mutex<Vec<FetchOptions>>,
    opened: Mutex<Vec<(String, bool)>>,
}

impl StubTransport {
    fn ready(ids: Vec<MessageId>) -> Self {
        Self {
            auto_ready: true,
            ids,
            ..Self::default()
        }
    }

    fn signal(&self, signal: TransportSignal) {
        let guard = self.signals.lock().unwrap();
        guard.as_ref().expect("connected").send(signal).unwrap();
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn connect(&self, signals: SignalSender) {
        if self.auto_ready {
            signals.send(TransportSignal::Ready).unwrap();
        }
        *self.signals.lock().unwrap() = Some(signals);
    }

    fn disconnect(&self) {
        if let Some(tx) = self.signals.lock().unwrap().as_ref() {
            let _ = tx.send(TransportSignal::Close);
        }
    }

    async fn open_box(&self, name: &str, read_only: bool) -> TransportResult<MailboxInfo> {
        self.opened.lock().unwrap().push((name.to_string(), read_only));
        if self.open_fails {
            return Err(TransportError::Command {
                command: "EXAMINE".into(),
                response: "NO no such mailbox".into(),
            });
        }
        Ok(MailboxInfo {
            name: name.to_string(),
            read_only,
            exists: self.ids.len() as u32,
            ..MailboxInfo::default()
        })
    }

    async fn search(&self, _criteria: &[String]) -> TransportResult<Vec<MessageId>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.search_fails {
            return Err(TransportError::Command {
                command: "UID SEARCH".into(),
                response: "BAD invalid criteria".into(),
            });
        }
        Ok(self.ids.clone())
    }

    async fn fetch(&self, id: MessageId, options: FetchOptions) -> TransportResult<FetchedMessage> {
        self.fetched.lock().unwrap().push(id);
        self.fetch_options.lock().unwrap().push(options);
        if self.failing_fetches.contains(&id) {
            return Err(TransportError::MissingMessage { uid: id });
        }
        let raw = match self.message {
            Some(raw) => raw.to_string(),
            None => format!("From: a@example.com\r\nSubject: message {id}\r\n\r\nbody {id}\r\n"),
        };
        Ok(FetchedMessage {
            seq: id,
            uid: id,
            size: Some(raw.len() as u64),
            body: Box::pin(stream::iter(vec![Ok(raw.into_bytes())])),
        })
    }
}

/// Decoder producing one attachment whose content trickles in slowly.
struct SlowAttachmentDecoder;

impl MimeDecoder for SlowAttachmentDecoder {
    fn decode(&self, _raw: Vec<u8>, _options: &DecoderOptions) -> DecoderStream {
        let (mut writer, reader) = tokio::io::duplex(8);
        tokio::spawn(async move {
            for chunk in [&b"slow "[..], b"attachment ", b"content"] {
                tokio::time::sleep(Duration::from_millis(30)).await;
                if writer.write_all(chunk).await.is_err() {
                    return;
                }
            }
        });

        Box::pin(stream::iter(vec![
            Ok(DecoderEvent::Headers(HeaderMap::new())),
            Ok(DecoderEvent::Text(TextPart::text("see attached"))),
            Ok(DecoderEvent::Attachment(DecodedAttachment {
                info: AttachmentInfo {
                    filename: Some("slow.txt".into()),
                    content_type: "text/plain".into(),
                    content_id: None,
                    size: 0,
                },
                content: Box::new(reader),
                release: Release::noop(),
            })),
            Ok(DecoderEvent::End),
        ]))
    }
}

fn listener(
    options: WatchOptions,
    transport: &Arc<StubTransport>,
    decoder: Arc<dyn MimeDecoder>,
) -> MailListener {
    let transport: Arc<dyn Transport> = transport.clone();
    MailListener::new(options, transport, decoder).unwrap()
}

fn fetch_on_start() -> WatchOptions {
    WatchOptions {
        fetch_on_start: true,
        ..WatchOptions::default()
    }
}

fn persist_to(directory: &std::path::Path) -> WatchOptions {
    WatchOptions {
        fetch_on_start: true,
        attachments: true,
        attachment_options: AttachmentOptions {
            directory: Some(directory.to_string_lossy().into_owned()),
            custom_filename: None,
        },
        ..WatchOptions::default()
    }
}

async fn next(events: &mut EventStream) -> MailEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Collect events until `done` returns true for the collected set.
async fn collect_until(
    events: &mut EventStream,
    done: impl Fn(&[MailEvent]) -> bool,
) -> Vec<MailEvent> {
    let mut got = Vec::new();
    while !done(&got) {
        got.push(next(events).await);
    }
    got
}

fn count(events: &[MailEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test]
fn invalid_attachment_directory_fails_construction() {
    let transport = Arc::new(StubTransport::default());
    for directory in [None, Some(String::new())] {
        let options = WatchOptions {
            attachments: true,
            attachment_options: AttachmentOptions {
                directory,
                custom_filename: None,
            },
            ..WatchOptions::default()
        };
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let result = MailListener::new(options, dyn_transport, Arc::new(MailParserDecoder::new()));
        assert!(matches!(result, Err(ConfigError::InvalidAttachmentDirectory)));
    }
    assert!(transport.signals.lock().unwrap().is_none());
}

#[tokio::test]
async fn start_opens_mailbox_and_fetches() {
    let transport = Arc::new(StubTransport::ready(vec![7]));
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe();
    let mut state = listener.state();

    listener.start();
    let got = collect_until(&mut events, |e| count(e, EventKind::Mail) == 1).await;

    let kinds: Vec<_> = got.iter().map(MailEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ServerConnected,
            EventKind::Mailbox,
            EventKind::Headers,
            EventKind::Body,
            EventKind::Mail,
        ]
    );
    let MailEvent::Mail { seq, mail } = &got[4] else {
        panic!("expected mail");
    };
    assert_eq!(*seq, 7);
    assert_eq!(mail.subject(), Some("message 7"));

    // mark_seen is off, so the mailbox is opened read-only.
    assert_eq!(
        transport.opened.lock().unwrap().as_slice(),
        &[("INBOX".to_string(), true)]
    );
    state.wait_for(|s| *s == ConnectionState::Ready).await.unwrap();
}

#[tokio::test]
async fn mark_seen_opens_read_write_and_reaches_every_fetch() {
    let transport = Arc::new(StubTransport::ready(vec![1, 2]));
    let options = WatchOptions {
        mark_seen: true,
        ..fetch_on_start()
    };
    let listener = listener(options, &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Mail]);

    listener.start();
    collect_until(&mut events, |e| e.len() == 2).await;

    assert_eq!(
        transport.opened.lock().unwrap().as_slice(),
        &[("INBOX".to_string(), false)]
    );
    let seen = transport.fetch_options.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|o| o.mark_seen));
}

#[tokio::test]
async fn without_mark_seen_fetches_peek() {
    let transport = Arc::new(StubTransport::ready(vec![5]));
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Mail]);

    listener.start();
    next(&mut events).await;

    assert_eq!(
        transport.fetch_options.lock().unwrap().as_slice(),
        &[FetchOptions { mark_seen: false }]
    );
}

#[tokio::test]
async fn per_message_order_with_slow_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(StubTransport::ready(vec![1]));
    let listener = listener(persist_to(dir.path()), &transport, Arc::new(SlowAttachmentDecoder));
    let mut events = listener.subscribe_to(&[
        EventKind::Headers,
        EventKind::Body,
        EventKind::Attachment,
        EventKind::Mail,
    ]);

    listener.start();
    let got = collect_until(&mut events, |e| count(e, EventKind::Mail) == 1).await;

    let kinds: Vec<_> = got.iter().map(MailEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Headers, EventKind::Body, EventKind::Attachment, EventKind::Mail]
    );

    let MailEvent::Attachment { attachment, .. } = &got[2] else {
        panic!("expected attachment");
    };
    let path = attachment.path().expect("written to disk");
    assert_eq!(std::fs::read(path).unwrap(), b"slow attachment content");
    assert_eq!(attachment.size, 23);
}

#[tokio::test]
async fn failed_fetch_is_isolated() {
    let transport = Arc::new(StubTransport {
        failing_fetches: HashSet::from([2]),
        ..StubTransport::ready(vec![1, 2, 3])
    });
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Mail, EventKind::Error]);

    listener.start();
    let got = collect_until(&mut events, |e| e.len() == 3).await;

    let mut mailed: Vec<_> = got
        .iter()
        .filter_map(|e| match e {
            MailEvent::Mail { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    mailed.sort_unstable();
    assert_eq!(mailed, vec![1, 3]);

    let errors: Vec<_> = got
        .iter()
        .filter_map(|e| match e {
            MailEvent::Error { seq, .. } => Some((*seq, e.uid())),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![(None, Some(2))]);
}

#[tokio::test]
async fn empty_search_emits_nothing() {
    let transport = Arc::new(StubTransport::ready(vec![]));
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe();

    listener.start();
    let got = collect_until(&mut events, |e| e.len() == 2).await;
    assert_eq!(got[1].kind(), EventKind::Mailbox);

    wait_for(|| transport.searches() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_none());
    assert!(transport.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn search_error_emits_one_error_and_fetches_nothing() {
    let transport = Arc::new(StubTransport {
        search_fails: true,
        ..StubTransport::ready(vec![1, 2])
    });
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Error, EventKind::Mail]);

    listener.start();
    let event = next(&mut events).await;
    assert!(matches!(
        &event,
        MailEvent::Error { seq: None, error } if matches!(**error, WatchError::Search(_))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_none());
    assert!(transport.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn attachment_write_failure_reports_error_not_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"").unwrap();

    let transport = Arc::new(StubTransport {
        message: Some(WITH_ATTACHMENT),
        ..StubTransport::ready(vec![4])
    });
    let listener = listener(persist_to(&blocker), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Attachment, EventKind::Error, EventKind::Mail]);

    listener.start();
    let got = collect_until(&mut events, |e| count(e, EventKind::Mail) == 1).await;

    assert_eq!(count(&got, EventKind::Attachment), 0);
    assert!(matches!(
        &got[0],
        MailEvent::Error { seq: Some(4), error } if matches!(**error, WatchError::Attachment { .. })
    ));
    let MailEvent::Mail { mail, .. } = &got[1] else {
        panic!("expected mail after the error");
    };
    assert_eq!(mail.attachments.len(), 1);
    assert!(mail.attachments[0].is_failed());
}

#[tokio::test]
async fn custom_filename_policy_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(StubTransport {
        message: Some(WITH_ATTACHMENT),
        ..StubTransport::ready(vec![9])
    });
    let options = persist_to(dir.path())
        .with_custom_filename(|info| format!("renamed-{}", info.filename.as_deref().unwrap_or("x")));
    let listener = listener(options, &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe_to(&[EventKind::Attachment]);

    listener.start();
    let MailEvent::Attachment { attachment, .. } = next(&mut events).await else {
        panic!("expected attachment");
    };
    assert_eq!(attachment.filename, "renamed-invoice.pdf");
    assert_eq!(
        std::fs::read(dir.path().join("renamed-invoice.pdf")).unwrap(),
        b"%PDF-1.4\n"
    );
}

#[tokio::test]
async fn each_notification_triggers_one_search() {
    let transport = Arc::new(StubTransport::default());
    let listener = listener(WatchOptions::default(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe();

    listener.start();
    // Before the mailbox is open notifications are ignored.
    transport.signal(TransportSignal::Mail { count: 1 });
    transport.signal(TransportSignal::Ready);
    collect_until(&mut events, |e| count(e, EventKind::Mailbox) == 1).await;
    assert_eq!(transport.searches(), 0);

    transport.signal(TransportSignal::Mail { count: 1 });
    transport.signal(TransportSignal::Mail { count: 2 });
    transport.signal(TransportSignal::Update { seq: Some(1) });
    wait_for(|| transport.searches() == 3).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.searches(), 3);
}

#[tokio::test]
async fn mailbox_open_failure_blocks_searches() {
    let transport = Arc::new(StubTransport {
        open_fails: true,
        ..StubTransport::ready(vec![1])
    });
    let listener = listener(fetch_on_start(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe();

    listener.start();
    let event = next(&mut events).await;
    assert!(matches!(
        &event,
        MailEvent::Error { error, .. } if matches!(**error, WatchError::MailboxOpen { .. })
    ));

    transport.signal(TransportSignal::Mail { count: 1 });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.searches(), 0);
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn stop_and_transport_errors_drive_state() {
    let transport = Arc::new(StubTransport::ready(vec![]));
    let listener = listener(WatchOptions::default(), &transport, Arc::new(MailParserDecoder::new()));
    let mut events = listener.subscribe();
    let mut state = listener.state();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    listener.start();
    collect_until(&mut events, |e| count(e, EventKind::Mailbox) == 1).await;
    state.wait_for(|s| *s == ConnectionState::Ready).await.unwrap();

    transport.signal(TransportSignal::Error(TransportError::Closed));
    let event = next(&mut events).await;
    assert!(matches!(
        &event,
        MailEvent::Error { seq: None, error } if matches!(**error, WatchError::Connection(_))
    ));
    state.wait_for(|s| *s == ConnectionState::Errored).await.unwrap();

    listener.stop();
    assert_eq!(next(&mut events).await.kind(), EventKind::ServerDisconnected);
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
}
