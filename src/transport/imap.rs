//! IMAP transport — raw IMAP4rev1 over rustls (or plain TCP).
//!
//! One blocking session thread owns the socket. Async callers send it commands over a
//! channel and await a oneshot reply. Once a mailbox is open the session waits in
//! `IDLE` (or `NOOP` polling) and turns unsolicited `EXISTS` / `FETCH` / `EXPUNGE`
//! responses into [`TransportSignal`]s.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use secrecy::ExposeSecret;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::protocol::{self, StatusKind, TaggedStatus, Untagged};
use super::{BodyStream, FetchOptions, FetchedMessage, SignalSender, Transport, TransportSignal};
use crate::config::{ImapOptions, KeepaliveOptions};
use crate::error::{TransportError, TransportResult};
use crate::types::{MailboxInfo, MessageId};

/// Socket read timeout; bounds how long the session waits before checking for commands.
const READ_TICK: Duration = Duration::from_millis(250);

/// Chunk size of the body stream handed to the pipeline.
const BODY_CHUNK: usize = 64 * 1024;

/// A fetched message as read off the wire.
struct RawFetch {
    seq: u32,
    uid: u32,
    size: Option<u64>,
    body: Vec<u8>,
}

enum Command {
    OpenBox {
        name: String,
        read_only: bool,
        reply: oneshot::Sender<TransportResult<MailboxInfo>>,
    },
    Search {
        criteria: Vec<String>,
        reply: oneshot::Sender<TransportResult<Vec<MessageId>>>,
    },
    Fetch {
        uid: MessageId,
        mark_seen: bool,
        reply: oneshot::Sender<TransportResult<RawFetch>>,
    },
    Logout,
}

/// Handle to the current session thread.
struct SessionHandle {
    commands: mpsc::Sender<Command>,
    alive: Arc<AtomicBool>,
}

/// IMAP client implementing [`Transport`].
pub struct ImapTransport {
    options: Arc<ImapOptions>,
    session: Mutex<Option<SessionHandle>>,
}

impl ImapTransport {
    pub fn new(options: ImapOptions) -> Self {
        Self {
            options: Arc::new(options),
            session: Mutex::new(None),
        }
    }

    fn sender(&self) -> TransportResult<mpsc::Sender<Command>> {
        let guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|s| s.alive.load(Ordering::SeqCst))
            .map(|s| s.commands.clone())
            .ok_or(TransportError::NotConnected)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<TransportResult<T>>) -> Command,
    ) -> TransportResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender()?
            .send(make(tx))
            .map_err(|_| TransportError::NotConnected)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl Transport for ImapTransport {
    fn connect(&self, signals: SignalSender) {
        let mut guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.as_ref().is_some_and(|s| s.alive.load(Ordering::SeqCst)) {
            debug!(host = %self.options.host, "IMAP session already running");
            return;
        }

        let (tx, rx) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let options = Arc::clone(&self.options);
        let thread_alive = Arc::clone(&alive);

        let spawned = std::thread::Builder::new()
            .name("imap-session".into())
            .spawn(move || {
                run_session(&options, &rx, &signals);
                thread_alive.store(false, Ordering::SeqCst);
            });

        match spawned {
            Ok(_) => {
                *guard = Some(SessionHandle { commands: tx, alive });
            }
            Err(e) => {
                warn!("Failed to spawn IMAP session thread: {e}");
                alive.store(false, Ordering::SeqCst);
            }
        }
    }

    fn disconnect(&self) {
        let guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = guard.as_ref() {
            let _ = handle.commands.send(Command::Logout);
        }
    }

    async fn open_box(&self, name: &str, read_only: bool) -> TransportResult<MailboxInfo> {
        let name = name.to_string();
        self.request(|reply| Command::OpenBox {
            name,
            read_only,
            reply,
        })
        .await
    }

    async fn search(&self, criteria: &[String]) -> TransportResult<Vec<MessageId>> {
        let criteria = criteria.to_vec();
        self.request(|reply| Command::Search { criteria, reply }).await
    }

    async fn fetch(&self, id: MessageId, options: FetchOptions) -> TransportResult<FetchedMessage> {
        let raw = self
            .request(|reply| Command::Fetch {
                uid: id,
                mark_seen: options.mark_seen,
                reply,
            })
            .await?;
        Ok(FetchedMessage {
            seq: raw.seq,
            uid: raw.uid,
            size: raw.size,
            body: chunked(raw.body),
        })
    }
}

/// Split a fetched body into a chunked stream.
fn chunked(body: Vec<u8>) -> BodyStream {
    let chunks: Vec<TransportResult<Vec<u8>>> =
        body.chunks(BODY_CHUNK).map(|c| Ok(c.to_vec())).collect();
    Box::pin(stream::iter(chunks))
}

/// Session thread body: connect, serve commands, always end with `Close`.
fn run_session(options: &ImapOptions, commands: &mpsc::Receiver<Command>, signals: &SignalSender) {
    let mut session = match Session::open(options) {
        Ok(session) => session,
        Err(e) => {
            warn!(host = %options.host, "IMAP connection failed: {e}");
            let _ = signals.send(TransportSignal::Error(e));
            let _ = signals.send(TransportSignal::Close);
            return;
        }
    };

    info!(host = %options.host, user = %options.user, "IMAP session ready");
    let _ = signals.send(TransportSignal::Ready);

    if let Err(e) = session.serve(commands, signals) {
        warn!(host = %options.host, "IMAP session ended with error: {e}");
        let _ = signals.send(TransportSignal::Error(e));
    }
    session.shutdown();
    info!(host = %options.host, "IMAP session closed");
    let _ = signals.send(TransportSignal::Close);
}

// ── Connection ──────────────────────────────────────────────────────

enum Conn {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Conn {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(s) => s,
            Self::Tls(s) => &s.sock,
        }
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

fn connect_tcp(options: &ImapOptions) -> TransportResult<TcpStream> {
    let connect_err = |reason: String| TransportError::Connect {
        host: options.host.clone(),
        port: options.port,
        reason,
    };
    let addrs = (options.host.as_str(), options.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?;

    let mut last_error = "no addresses resolved".to_string();
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, options.conn_timeout()) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(connect_err(last_error))
}

fn wrap_tls(options: &ImapOptions, tcp: TcpStream) -> TransportResult<Conn> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let server_name = rustls_pki_types::ServerName::try_from(options.host.clone())
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(Conn::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Session ─────────────────────────────────────────────────────────

/// A response deadline, remembering the timeout it was derived from.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    fn check(&self) -> TransportResult<()> {
        if Instant::now() >= self.at {
            return Err(TransportError::Timeout(self.timeout));
        }
        Ok(())
    }
}

/// One line of a command response, with any literals it carried.
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

struct Response {
    lines: Vec<ResponseLine>,
    status: TaggedStatus,
}

/// What the session does after handling a command.
#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Session {
    reader: BufReader<Conn>,
    partial: Vec<u8>,
    tag: u32,
    capabilities: Vec<String>,
    /// Mailbox open and watched for notifications.
    selected: bool,
    exists: u32,
    keepalive: KeepaliveOptions,
    command_timeout: Duration,
}

impl Session {
    fn open(options: &ImapOptions) -> TransportResult<Self> {
        let tcp = connect_tcp(options)?;
        tcp.set_read_timeout(Some(READ_TICK))?;
        tcp.set_nodelay(true)?;

        let conn = if options.tls {
            wrap_tls(options, tcp)?
        } else {
            Conn::Plain(tcp)
        };

        let mut session = Self::new(conn, options);

        let greeting = session.read_line(Deadline::after(options.conn_timeout()))?;
        let preauth = match protocol::parse_untagged(&greeting) {
            Some(Untagged::Ok { code }) => {
                if let Some(caps) = code.as_deref().and_then(protocol::capabilities_from_code) {
                    session.capabilities = caps;
                }
                false
            }
            Some(Untagged::Other(text)) if text.to_ascii_uppercase().starts_with("PREAUTH") => true,
            Some(Untagged::Bye(text)) => return Err(TransportError::Connect {
                host: options.host.clone(),
                port: options.port,
                reason: format!("server refused connection: {text}"),
            }),
            _ => {
                return Err(TransportError::Protocol(format!(
                    "unexpected greeting: {}",
                    greeting.trim_end()
                )));
            }
        };

        if !preauth {
            let login = format!(
                "LOGIN {} {}",
                protocol::quote(&options.user),
                protocol::quote(options.password.expose_secret())
            );
            session
                .execute_with_timeout("LOGIN", &login, options.auth_timeout(), None)
                .map_err(|e| match e {
                    TransportError::Command { response, .. } => TransportError::Auth(response),
                    other => other,
                })?;
        }

        let response = session.execute("CAPABILITY", "CAPABILITY", None)?;
        for line in &response.lines {
            if let Some(Untagged::Capability(caps)) = protocol::parse_untagged(&line.text) {
                session.capabilities = caps;
            }
        }
        debug!(capabilities = ?session.capabilities, "IMAP capabilities");

        Ok(session)
    }

    fn new(conn: Conn, options: &ImapOptions) -> Self {
        Self {
            reader: BufReader::new(conn),
            partial: Vec::new(),
            tag: 0,
            capabilities: Vec::new(),
            selected: false,
            exists: 0,
            keepalive: options.keepalive.clone(),
            command_timeout: options.command_timeout(),
        }
    }

    fn supports_idle(&self) -> bool {
        !self.keepalive.force_noop && protocol::has_capability(&self.capabilities, "IDLE")
    }

    fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("A{}", self.tag)
    }

    fn write_line(&mut self, line: &str) -> TransportResult<()> {
        let conn = self.reader.get_mut();
        conn.write_all(line.as_bytes())?;
        conn.write_all(b"\r\n")?;
        conn.flush()?;
        Ok(())
    }

    /// One read attempt. `Ok(None)` when no complete line arrived within a tick.
    fn try_read_line(&mut self) -> TransportResult<Option<String>> {
        match self.reader.read_until(b'\n', &mut self.partial) {
            Ok(0) => Err(TransportError::Closed),
            Ok(_) if self.partial.ends_with(b"\n") => {
                let line = std::mem::take(&mut self.partial);
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            Ok(_) => Ok(None),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_line(&mut self, deadline: Deadline) -> TransportResult<String> {
        loop {
            if let Some(line) = self.try_read_line()? {
                return Ok(line);
            }
            deadline.check()?;
        }
    }

    fn read_literal(&mut self, len: usize, deadline: Deadline) -> TransportResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut out[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(e) if is_timeout(&e) => deadline.check()?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    /// Read one logical response line, pulling in any literals it announces.
    fn read_response_line(&mut self, deadline: Deadline) -> TransportResult<ResponseLine> {
        let text = self.read_line(deadline)?;
        self.complete_line(text, deadline)
    }

    /// Like [`Self::read_response_line`] but returns `Ok(None)` if no line started within a tick.
    fn poll_response_line(&mut self) -> TransportResult<Option<ResponseLine>> {
        match self.try_read_line()? {
            Some(text) => {
                let deadline = Deadline::after(self.command_timeout);
                self.complete_line(text, deadline).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Read the literals announced by `text` and the line continuations after them.
    fn complete_line(&mut self, mut text: String, deadline: Deadline) -> TransportResult<ResponseLine> {
        let mut literals = Vec::new();
        while let Some(len) = protocol::literal_size(&text) {
            literals.push(self.read_literal(len, deadline)?);
            let tail = self.read_line(deadline)?;
            text = format!("{}{}", text.trim_end(), tail.trim_end());
        }
        Ok(ResponseLine { text, literals })
    }

    fn execute(
        &mut self,
        verb: &str,
        command: &str,
        signals: Option<&SignalSender>,
    ) -> TransportResult<Response> {
        let timeout = self.command_timeout;
        self.execute_with_timeout(verb, command, timeout, signals)
    }

    /// Send a tagged command and collect its response. `verb` names it in errors so
    /// arguments (credentials) never leak into messages.
    fn execute_with_timeout(
        &mut self,
        verb: &str,
        command: &str,
        timeout: Duration,
        signals: Option<&SignalSender>,
    ) -> TransportResult<Response> {
        let tag = self.next_tag();
        debug!(tag = %tag, command = %verb, "IMAP command");
        self.write_line(&format!("{tag} {command}"))?;

        let deadline = Deadline::after(timeout);
        let mut lines = Vec::new();
        loop {
            let line = self.read_response_line(deadline)?;
            if let Some(status) = protocol::parse_tagged(&line.text, &tag) {
                return match status.kind {
                    StatusKind::Ok => Ok(Response { lines, status }),
                    StatusKind::No | StatusKind::Bad => Err(TransportError::Command {
                        command: verb.to_string(),
                        response: status.text,
                    }),
                };
            }
            if let Some(signals) = signals {
                self.observe(&line.text, signals, false);
            }
            lines.push(line);
        }
    }

    /// Track unsolicited mailbox changes. Flag updates only count outside our own
    /// commands (`during_wait`), so our own FETCHes do not echo back as updates.
    fn observe(&mut self, line: &str, signals: &SignalSender, during_wait: bool) {
        if !self.selected {
            return;
        }
        match protocol::parse_untagged(line) {
            Some(Untagged::Exists(n)) => {
                if n > self.exists {
                    let count = n - self.exists;
                    debug!(exists = n, new = count, "New mail");
                    let _ = signals.send(TransportSignal::Mail { count });
                }
                self.exists = n;
            }
            Some(Untagged::Expunge(seq)) => {
                self.exists = self.exists.saturating_sub(1);
                if during_wait {
                    let _ = signals.send(TransportSignal::Update { seq: Some(seq) });
                }
            }
            Some(Untagged::Fetch { seq, .. }) if during_wait => {
                let _ = signals.send(TransportSignal::Update { seq: Some(seq) });
            }
            Some(Untagged::Bye(text)) => {
                debug!("Server said BYE: {text}");
            }
            _ => {}
        }
    }

    fn serve(&mut self, commands: &mpsc::Receiver<Command>, signals: &SignalSender) -> TransportResult<()> {
        loop {
            if !self.selected {
                let Ok(command) = commands.recv() else {
                    self.logout();
                    return Ok(());
                };
                if self.handle(command, signals)? == Flow::Stop {
                    return Ok(());
                }
                continue;
            }

            match commands.try_recv() {
                Ok(command) => {
                    if self.handle(command, signals)? == Flow::Stop {
                        return Ok(());
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    self.logout();
                    return Ok(());
                }
                Err(TryRecvError::Empty) => {}
            }

            let pending = if self.supports_idle() {
                self.idle(commands, signals)?
            } else {
                self.noop_wait(commands, signals)?
            };
            match pending {
                Waited::Command(command) => {
                    if self.handle(command, signals)? == Flow::Stop {
                        return Ok(());
                    }
                }
                Waited::Nothing => {}
                Waited::Abandoned => {
                    self.logout();
                    return Ok(());
                }
            }
        }
    }

    /// Run one IDLE round until a command arrives or the idle interval expires.
    fn idle(&mut self, commands: &mpsc::Receiver<Command>, signals: &SignalSender) -> TransportResult<Waited> {
        let tag = self.next_tag();
        self.write_line(&format!("{tag} IDLE"))?;

        let deadline = Deadline::after(self.command_timeout);
        loop {
            let line = self.read_response_line(deadline)?;
            if line.text.starts_with('+') {
                break;
            }
            if let Some(status) = protocol::parse_tagged(&line.text, &tag) {
                warn!("IDLE rejected ({}), falling back to NOOP", status.text);
                self.keepalive.force_noop = true;
                return Ok(Waited::Nothing);
            }
            self.observe(&line.text, signals, true);
        }

        let started = Instant::now();
        let idle_interval = self.keepalive.idle_interval();
        let waited = loop {
            match commands.try_recv() {
                Ok(command) => break Waited::Command(command),
                Err(TryRecvError::Disconnected) => break Waited::Abandoned,
                Err(TryRecvError::Empty) => {}
            }
            if started.elapsed() >= idle_interval {
                break Waited::Nothing;
            }
            if let Some(line) = self.poll_response_line()? {
                self.observe(&line.text, signals, true);
            }
        };

        self.write_line("DONE")?;
        let deadline = Deadline::after(self.command_timeout);
        loop {
            let line = self.read_response_line(deadline)?;
            if protocol::parse_tagged(&line.text, &tag).is_some() {
                break;
            }
            self.observe(&line.text, signals, true);
        }
        Ok(waited)
    }

    /// Wait one keepalive interval for a command, else send NOOP to pick up changes.
    fn noop_wait(
        &mut self,
        commands: &mpsc::Receiver<Command>,
        signals: &SignalSender,
    ) -> TransportResult<Waited> {
        match commands.recv_timeout(self.keepalive.interval()) {
            Ok(command) => Ok(Waited::Command(command)),
            Err(RecvTimeoutError::Disconnected) => Ok(Waited::Abandoned),
            Err(RecvTimeoutError::Timeout) => {
                let response = self.execute("NOOP", "NOOP", None)?;
                for line in &response.lines {
                    self.observe(&line.text, signals, true);
                }
                Ok(Waited::Nothing)
            }
        }
    }

    fn handle(&mut self, command: Command, signals: &SignalSender) -> TransportResult<Flow> {
        match command {
            Command::OpenBox {
                name,
                read_only,
                reply,
            } => {
                let result = self.open_box(&name, read_only);
                let fatal = matches!(result, Err(ref e) if is_fatal(e));
                let _ = reply.send(result);
                if fatal {
                    return Err(TransportError::Closed);
                }
            }
            Command::Search { criteria, reply } => {
                let result = self.search(&criteria, signals);
                let fatal = matches!(result, Err(ref e) if is_fatal(e));
                let _ = reply.send(result);
                if fatal {
                    return Err(TransportError::Closed);
                }
            }
            Command::Fetch {
                uid,
                mark_seen,
                reply,
            } => {
                let result = self.fetch(uid, mark_seen, signals);
                let fatal = matches!(result, Err(ref e) if is_fatal(e));
                let _ = reply.send(result);
                if fatal {
                    return Err(TransportError::Closed);
                }
            }
            Command::Logout => {
                self.logout();
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn open_box(&mut self, name: &str, read_only: bool) -> TransportResult<MailboxInfo> {
        self.selected = false;
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let response = self.execute(verb, &format!("{verb} {}", protocol::quote(name)), None)?;

        let mut info = MailboxInfo {
            name: name.to_string(),
            read_only,
            ..MailboxInfo::default()
        };
        for line in &response.lines {
            protocol::apply_select_line(&mut info, &line.text);
        }
        protocol::apply_select_status(&mut info, &response.status);

        self.exists = info.exists;
        self.selected = true;
        info!(mailbox = %name, exists = info.exists, read_only = info.read_only, "Mailbox opened");
        Ok(info)
    }

    fn search(&mut self, criteria: &[String], signals: &SignalSender) -> TransportResult<Vec<MessageId>> {
        let command = format!("UID SEARCH {}", protocol::format_search(criteria));
        let response = self.execute("UID SEARCH", &command, Some(signals))?;
        let mut uids = Vec::new();
        for line in &response.lines {
            if let Some(Untagged::Search(found)) = protocol::parse_untagged(&line.text) {
                uids.extend(found);
            }
        }
        Ok(uids)
    }

    fn fetch(&mut self, uid: MessageId, mark_seen: bool, signals: &SignalSender) -> TransportResult<RawFetch> {
        let item = if mark_seen { "BODY[]" } else { "BODY.PEEK[]" };
        let command = format!("UID FETCH {uid} (UID RFC822.SIZE {item})");
        let response = self.execute("UID FETCH", &command, Some(signals))?;

        for line in response.lines {
            let Some(Untagged::Fetch { seq, rest }) = protocol::parse_untagged(&line.text) else {
                continue;
            };
            if protocol::fetch_attr_u32(&rest, "UID") != Some(uid) {
                continue;
            }
            let Some(body) = line.literals.into_iter().next() else {
                continue;
            };
            let size = protocol::fetch_attr_u32(&rest, "RFC822.SIZE").map(u64::from);
            return Ok(RawFetch {
                seq,
                uid,
                size,
                body,
            });
        }
        Err(TransportError::MissingMessage { uid })
    }

    fn logout(&mut self) {
        self.selected = false;
        if let Err(e) = self.execute("LOGOUT", "LOGOUT", None) {
            debug!("LOGOUT did not complete cleanly: {e}");
        }
    }

    fn shutdown(&mut self) {
        let _ = self.reader.get_ref().tcp().shutdown(Shutdown::Both);
    }
}

/// Outcome of waiting for activity while a mailbox is open.
enum Waited {
    Command(Command),
    Nothing,
    /// Every transport handle was dropped.
    Abandoned,
}

/// Errors after which the connection cannot be reused.
fn is_fatal(e: &TransportError) -> bool {
    matches!(
        e,
        TransportError::Closed | TransportError::Io(_) | TransportError::Timeout(_) | TransportError::Tls(_)
    )
}
