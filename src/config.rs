//! Configuration types.
//!
//! `WatchOptions` is the raw, caller-facing options set (built in code or from the
//! environment). `WatchConfig` is its validated, normalized form, produced once at
//! construction. `ImapOptions` configures the IMAP transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::decoder::DecoderOptions;
use crate::error::ConfigError;
use crate::types::AttachmentInfo;

/// Default mailbox when none is configured.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Default search criteria when none is configured.
pub const DEFAULT_SEARCH: &str = "UNSEEN";

/// Computes the on-disk filename for an attachment.
pub type FilenamePolicy = Arc<dyn Fn(&AttachmentInfo) -> String + Send + Sync>;

/// Search criteria as supplied by the caller: one criterion or several.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SearchFilter {
    Single(String),
    Many(Vec<String>),
}

impl SearchFilter {
    /// Normalize to a sequence of criteria.
    pub fn into_criteria(self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

impl From<&str> for SearchFilter {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<String> for SearchFilter {
    fn from(s: String) -> Self {
        Self::Single(s)
    }
}

impl From<Vec<String>> for SearchFilter {
    fn from(v: Vec<String>) -> Self {
        Self::Many(v)
    }
}

impl From<Vec<&str>> for SearchFilter {
    fn from(v: Vec<&str>) -> Self {
        Self::Many(v.into_iter().map(str::to_string).collect())
    }
}

/// Attachment persistence options.
#[derive(Clone, Default)]
pub struct AttachmentOptions {
    /// Directory attachments are written to. Required when persistence is enabled.
    pub directory: Option<String>,
    /// Overrides the decoder-supplied filename.
    pub custom_filename: Option<FilenamePolicy>,
}

impl fmt::Debug for AttachmentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentOptions")
            .field("directory", &self.directory)
            .field("custom_filename", &self.custom_filename.is_some())
            .finish()
    }
}

/// Caller-facing watcher options.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub mailbox: Option<String>,
    pub search_filter: Option<SearchFilter>,
    pub mark_seen: bool,
    pub fetch_on_start: bool,
    pub attachments: bool,
    pub attachment_options: AttachmentOptions,
    pub decoder_options: DecoderOptions,
}

impl WatchOptions {
    /// Build options from `MAIL_LISTENER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let search_filter = lookup("MAIL_LISTENER_SEARCH").map(|raw| {
            let criteria: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            SearchFilter::Many(criteria)
        });

        Self {
            mailbox: lookup("MAIL_LISTENER_MAILBOX").filter(|s| !s.is_empty()),
            search_filter,
            mark_seen: parse_flag(lookup("MAIL_LISTENER_MARK_SEEN")),
            fetch_on_start: parse_flag(lookup("MAIL_LISTENER_FETCH_ON_START")),
            attachments: parse_flag(lookup("MAIL_LISTENER_ATTACHMENTS")),
            attachment_options: AttachmentOptions {
                directory: lookup("MAIL_LISTENER_ATTACHMENT_DIR"),
                custom_filename: None,
            },
            decoder_options: DecoderOptions {
                prefer_html: parse_flag(lookup("MAIL_LISTENER_PREFER_HTML")),
                ..DecoderOptions::default()
            },
        }
    }

    pub fn with_custom_filename(
        mut self,
        policy: impl Fn(&AttachmentInfo) -> String + Send + Sync + 'static,
    ) -> Self {
        self.attachment_options.custom_filename = Some(Arc::new(policy));
        self
    }
}

/// Resolved attachment persistence policy.
#[derive(Clone)]
pub struct AttachmentPolicy {
    /// Always ends with `/`.
    pub directory: String,
    pub custom_filename: Option<FilenamePolicy>,
}

impl fmt::Debug for AttachmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentPolicy")
            .field("directory", &self.directory)
            .field("custom_filename", &self.custom_filename.is_some())
            .finish()
    }
}

impl AttachmentPolicy {
    /// Filename for an attachment: the custom policy when set, else the decoder's name.
    pub fn filename_for(&self, info: &AttachmentInfo) -> String {
        match &self.custom_filename {
            Some(policy) => policy(info),
            None => info.filename.clone().unwrap_or_default(),
        }
    }
}

/// Validated, immutable watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub mailbox: String,
    pub search_filter: Vec<String>,
    pub mark_seen: bool,
    pub fetch_on_start: bool,
    /// `Some` when attachment persistence is enabled.
    pub attachments: Option<AttachmentPolicy>,
    pub decoder_options: DecoderOptions,
}

impl TryFrom<WatchOptions> for WatchConfig {
    type Error = ConfigError;

    fn try_from(options: WatchOptions) -> Result<Self, Self::Error> {
        let attachments = if options.attachments {
            let directory = options
                .attachment_options
                .directory
                .filter(|d| !d.is_empty())
                .ok_or(ConfigError::InvalidAttachmentDirectory)?;
            Some(AttachmentPolicy {
                directory: normalize_directory(directory),
                custom_filename: options.attachment_options.custom_filename,
            })
        } else {
            None
        };

        let search_filter = options
            .search_filter
            .map(SearchFilter::into_criteria)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SEARCH.to_string()]);

        Ok(Self {
            mailbox: options
                .mailbox
                .unwrap_or_else(|| DEFAULT_MAILBOX.to_string()),
            search_filter,
            mark_seen: options.mark_seen,
            fetch_on_start: options.fetch_on_start,
            attachments,
            decoder_options: options.decoder_options,
        })
    }
}

/// Ensure a directory path ends with exactly one trailing separator.
pub fn normalize_directory(mut directory: String) -> String {
    if !directory.ends_with('/') {
        directory.push('/');
    }
    directory
}

fn parse_flag(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a number, got {raw:?}"),
        }),
    }
}

// ── IMAP transport options ──────────────────────────────────────────

/// IMAP keepalive behavior once a mailbox is open.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeepaliveOptions {
    /// Seconds between `NOOP`s when IDLE is unavailable or disabled.
    pub interval_secs: u64,
    /// Seconds before an IDLE command is re-issued.
    pub idle_interval_secs: u64,
    /// Use `NOOP` polling even when the server supports IDLE.
    pub force_noop: bool,
}

impl Default for KeepaliveOptions {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            idle_interval_secs: 300,
            force_noop: false,
        }
    }
}

impl KeepaliveOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs.max(1))
    }
}

fn default_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_conn_timeout() -> u64 {
    10
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    60
}

/// IMAP connection options.
#[derive(Debug, Clone, Deserialize)]
pub struct ImapOptions {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "username")]
    pub user: String,
    pub password: SecretString,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default = "default_conn_timeout")]
    pub conn_timeout_secs: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub keepalive: KeepaliveOptions,
}

impl ImapOptions {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: SecretString::from(password.into()),
            tls: true,
            conn_timeout_secs: default_conn_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            command_timeout_secs: default_command_timeout(),
            keepalive: KeepaliveOptions::default(),
        }
    }

    /// Build options from `IMAP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("IMAP_HOST").ok_or_else(|| ConfigError::MissingEnvVar("IMAP_HOST".into()))?;
        // IMAP_USERNAME is accepted as an alias for IMAP_USER.
        let user = lookup("IMAP_USER")
            .or_else(|| lookup("IMAP_USERNAME"))
            .ok_or_else(|| ConfigError::MissingEnvVar("IMAP_USER".into()))?;
        let password = lookup("IMAP_PASSWORD")
            .ok_or_else(|| ConfigError::MissingEnvVar("IMAP_PASSWORD".into()))?;

        let defaults = KeepaliveOptions::default();
        let keepalive = KeepaliveOptions {
            interval_secs: parse_number(&lookup, "IMAP_KEEPALIVE_INTERVAL_SECS", defaults.interval_secs)?,
            idle_interval_secs: parse_number(&lookup, "IMAP_IDLE_INTERVAL_SECS", defaults.idle_interval_secs)?,
            force_noop: parse_flag(lookup("IMAP_FORCE_NOOP")),
        };

        Ok(Self {
            host,
            port: parse_number(&lookup, "IMAP_PORT", default_port())?,
            user,
            password: SecretString::from(password),
            tls: lookup("IMAP_TLS").map_or(true, |v| parse_flag(Some(v))),
            conn_timeout_secs: parse_number(&lookup, "IMAP_CONN_TIMEOUT_SECS", default_conn_timeout())?,
            auth_timeout_secs: parse_number(&lookup, "IMAP_AUTH_TIMEOUT_SECS", default_auth_timeout())?,
            command_timeout_secs: parse_number(
                &lookup,
                "IMAP_COMMAND_TIMEOUT_SECS",
                default_command_timeout(),
            )?,
            keepalive,
        })
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout_secs.max(1))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}
