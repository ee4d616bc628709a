//! Per-message processing: raw bytes to decoder events to subscriber events.
//!
//! Each pipeline owns its own [`MailRecord`] accumulator. Sub-events for a message are
//! emitted strictly in decoder order (`headers`, then `body` / `attachment`, then
//! `mail`), and an attachment is only reported once its content is fully consumed.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::config::AttachmentPolicy;
use crate::decoder::{DecodedAttachment, DecoderEvent, DecoderOptions, MimeDecoder};
use crate::error::{DecodeError, WatchError};
use crate::events::{EventBus, MailEvent};
use crate::persist::{AttachmentPersister, PersistFailure};
use crate::transport::BodyStream;
use crate::types::{AttachmentMeta, AttachmentStorage, MailRecord};

/// Shared, read-only collaborators every pipeline uses.
pub struct PipelineContext {
    pub decoder: Arc<dyn MimeDecoder>,
    pub decoder_options: DecoderOptions,
    pub attachments: Option<AttachmentSink>,
    pub events: EventBus,
}

/// Attachment persistence: naming policy plus the persister writing under its directory.
pub struct AttachmentSink {
    pub policy: AttachmentPolicy,
    pub persister: AttachmentPersister,
}

impl AttachmentSink {
    pub fn new(policy: AttachmentPolicy) -> Self {
        let persister = AttachmentPersister::new(policy.directory.clone());
        Self { policy, persister }
    }
}

/// How a pipeline finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A `mail` event was emitted.
    Delivered,
    /// An `error` event was emitted and the message was abandoned.
    Failed,
}

/// Processes exactly one fetched message.
pub struct MessagePipeline {
    seq: u32,
    ctx: Arc<PipelineContext>,
    mail: MailRecord,
}

impl MessagePipeline {
    pub fn new(seq: u32, ctx: Arc<PipelineContext>) -> Self {
        Self {
            seq,
            ctx,
            mail: MailRecord {
                seq,
                ..MailRecord::default()
            },
        }
    }

    pub async fn run(mut self, mut body: BodyStream) -> PipelineOutcome {
        let mut raw = Vec::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => raw.extend_from_slice(&bytes),
                Err(e) => {
                    warn!(seq = self.seq, "Message stream failed: {e}");
                    self.emit_error(WatchError::Stream(e));
                    return PipelineOutcome::Failed;
                }
            }
        }
        debug!(seq = self.seq, bytes = raw.len(), "Message buffered, decoding");

        let mut events = self.ctx.decoder.decode(raw, &self.ctx.decoder_options);
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(seq = self.seq, "Decode failed: {e}");
                    self.emit_error(WatchError::Decode(e));
                    return PipelineOutcome::Failed;
                }
            };

            match event {
                DecoderEvent::Headers(headers) => {
                    self.mail.headers = headers.clone();
                    self.emit(MailEvent::Headers {
                        seq: self.seq,
                        headers,
                    });
                }
                DecoderEvent::Text(body) => {
                    self.mail.body = Some(body.clone());
                    self.emit(MailEvent::Body { seq: self.seq, body });
                }
                DecoderEvent::Attachment(attachment) => {
                    self.attachment(attachment).await;
                }
                DecoderEvent::End => {
                    debug!(
                        seq = self.seq,
                        attachments = self.mail.attachments.len(),
                        "Message decoded"
                    );
                    let seq = self.seq;
                    let mail = std::mem::take(&mut self.mail);
                    self.emit(MailEvent::Mail { seq, mail });
                    return PipelineOutcome::Delivered;
                }
            }
        }

        self.emit_error(WatchError::Decode(DecodeError::Truncated));
        PipelineOutcome::Failed
    }

    async fn attachment(&mut self, attachment: DecodedAttachment) {
        let Some(sink) = self.ctx.attachments.as_ref() else {
            match buffer_attachment(attachment).await {
                Ok(meta) => self.record_attachment(meta),
                Err(failure) => self.record_failure(failure),
            }
            return;
        };

        let filename = sink.policy.filename_for(&attachment.info);
        match sink.persister.persist(attachment, &filename).await {
            Ok(meta) => self.record_attachment(meta),
            Err(failure) => self.record_failure(failure),
        }
    }

    /// Keep the failed attachment in the record and report the error instead of an `attachment` event.
    fn record_failure(&mut self, failure: PersistFailure) {
        self.mail.attachments.push(failure.meta);
        self.emit_error(failure.error);
    }

    fn record_attachment(&mut self, meta: AttachmentMeta) {
        self.mail.attachments.push(meta.clone());
        self.emit(MailEvent::Attachment {
            seq: self.seq,
            attachment: meta,
        });
    }

    fn emit(&self, event: MailEvent) {
        self.ctx.events.emit(event);
    }

    fn emit_error(&self, error: WatchError) {
        self.ctx.events.emit(MailEvent::error(error, Some(self.seq)));
    }
}

/// Read an attachment into memory when persistence is disabled.
async fn buffer_attachment(attachment: DecodedAttachment) -> Result<AttachmentMeta, PersistFailure> {
    let DecodedAttachment {
        info,
        mut content,
        release,
    } = attachment;
    let mut bytes = Vec::with_capacity(info.size);
    let read = content.read_to_end(&mut bytes).await;
    release.release();

    let (size, storage) = match &read {
        Ok(_) => (
            bytes.len() as u64,
            AttachmentStorage::Memory {
                content: Arc::from(bytes),
            },
        ),
        Err(e) => (0, AttachmentStorage::Failed { error: e.to_string() }),
    };
    let meta = AttachmentMeta {
        filename: info.filename.unwrap_or_default(),
        content_type: info.content_type,
        content_id: info.content_id,
        size,
        storage,
    };

    match read {
        Ok(_) => Ok(meta),
        Err(e) => {
            warn!(filename = %meta.filename, "Attachment stream failed: {e}");
            Err(PersistFailure {
                error: WatchError::Decode(DecodeError::Io(e)),
                meta,
            })
        }
    }
}
