//! MIME decoder seam.
//!
//! The pipeline hands a complete raw message to a [`MimeDecoder`] and consumes the
//! resulting event stream in order: `Headers`, then any number of `Text` /
//! `Attachment`, then `End`.

pub mod parser;

use std::fmt;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::DecodeError;
use crate::types::{AttachmentInfo, HeaderMap, TextPart};

pub use parser::MailParserDecoder;

/// Options passed through to the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Report the HTML body when the message has one.
    pub prefer_html: bool,
    /// Do not convert an HTML-only body to plain text.
    pub skip_html_to_text: bool,
    /// HTML bodies longer than this are reported as HTML instead of being converted.
    pub max_html_length_to_parse: Option<usize>,
    /// Report inline parts (e.g. embedded images) as attachments too.
    pub include_inline_parts: bool,
}

/// Readable attachment content. Consumed exactly once.
pub type AttachmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Acknowledgment returned to the decoder once an attachment's content is consumed.
pub struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Release {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A release with nothing to acknowledge.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn release(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Release").field(&self.0.is_some()).finish()
    }
}

/// An attachment as emitted by the decoder.
pub struct DecodedAttachment {
    pub info: AttachmentInfo,
    pub content: AttachmentReader,
    pub release: Release,
}

impl fmt::Debug for DecodedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAttachment")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// One decoder output event.
#[derive(Debug)]
pub enum DecoderEvent {
    Headers(HeaderMap),
    Text(TextPart),
    Attachment(DecodedAttachment),
    End,
}

/// Ordered decoder output for one message.
pub type DecoderStream = BoxStream<'static, Result<DecoderEvent, DecodeError>>;

/// Converts raw message bytes into decoder events.
pub trait MimeDecoder: Send + Sync {
    fn decode(&self, raw: Vec<u8>, options: &DecoderOptions) -> DecoderStream;
}
