use std::time::Duration;

use mail_listener::{ImapOptions, MailEvent, MailListener, WatchOptions};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// How long to wait for the server to acknowledge logout after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Initialize tracing: stderr, plus a daily rolling file when MAIL_LISTENER_LOG_DIR is set
    let (file_layer, _log_guard) = match std::env::var("MAIL_LISTENER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-listener.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    let imap = ImapOptions::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export IMAP_HOST=imap.example.com IMAP_USER=me@example.com IMAP_PASSWORD=...");
        std::process::exit(1);
    });
    let options = WatchOptions::from_env();

    eprintln!("📬 Mail Listener v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Server: {}:{} (tls: {})", imap.host, imap.port, imap.tls);

    let listener = MailListener::imap(options, imap)?;
    let config = listener.config();
    eprintln!("   Mailbox: {}", config.mailbox);
    eprintln!("   Search: {}", config.search_filter.join(" "));
    match &config.attachments {
        Some(policy) => eprintln!("   Attachments: {}", policy.directory),
        None => eprintln!("   Attachments: in memory"),
    }
    eprintln!("   Press Ctrl+C to stop.\n");

    let mut events = listener.subscribe();
    listener.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = &mut shutdown => {
                eprintln!("\nShutting down...");
                break;
            }
        }
    }

    listener.stop();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(event) = events.recv().await {
            print_event(&event);
            if matches!(event, MailEvent::ServerDisconnected) {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Server did not acknowledge disconnect within {SHUTDOWN_GRACE:?}");
    }

    Ok(())
}

/// Print one event as a JSON line on stdout.
fn print_event(event: &MailEvent) {
    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to serialize {} event: {e}", event.kind());
            return;
        }
    };
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    println!("{value}");
}
