//! Writes decoded attachment streams to the attachment directory.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::decoder::DecodedAttachment;
use crate::error::WatchError;
use crate::types::{AttachmentMeta, AttachmentStorage};

/// Filename used when neither the policy nor the decoder supplies a usable one.
const FALLBACK_FILENAME: &str = "attachment";

/// Highest numbered suffix tried before giving up on a free filename.
const MAX_COLLISION_SUFFIX: u32 = 1000;

const COPY_BUFFER: usize = 16 * 1024;

/// A failed persistence attempt: the error to report and the meta to record.
#[derive(Debug)]
pub struct PersistFailure {
    pub error: WatchError,
    pub meta: AttachmentMeta,
}

/// Writes attachments under one directory. Never overwrites an existing file.
#[derive(Debug, Clone)]
pub struct AttachmentPersister {
    directory: PathBuf,
}

impl AttachmentPersister {
    /// `directory` is the normalized attachment directory (trailing separator).
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolve a filename against the directory after sanitizing it.
    pub fn resolve(&self, filename: &str) -> PathBuf {
        self.directory.join(sanitize_filename(filename))
    }

    /// Drain `attachment.content` into a new file named after `filename`.
    ///
    /// The content stream is always read to the end and `release` always invoked,
    /// whether or not the write succeeds.
    pub async fn persist(
        &self,
        attachment: DecodedAttachment,
        filename: &str,
    ) -> Result<AttachmentMeta, PersistFailure> {
        let DecodedAttachment {
            info,
            mut content,
            release,
        } = attachment;
        let requested = sanitize_filename(filename);

        let opened = match fs::create_dir_all(&self.directory).await {
            Ok(()) => self.create_unique(&requested).await,
            Err(e) => Err(e),
        };

        let mut buf = vec![0u8; COPY_BUFFER];
        let mut written: u64 = 0;
        let mut write_error: Option<std::io::Error> = None;
        let mut read_error: Option<std::io::Error> = None;

        let (mut file, path, final_name) = match opened {
            Ok((file, path, name)) => (Some(file), path, name),
            Err(e) => {
                write_error = Some(e);
                (None, self.directory.join(&requested), requested.clone())
            }
        };
        let created = file.is_some();

        loop {
            let n = match content.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };
            // After a write failure keep reading so the source is fully consumed.
            if let Some(f) = file.as_mut() {
                match f.write_all(&buf[..n]).await {
                    Ok(()) => written += n as u64,
                    Err(e) => {
                        write_error = Some(e);
                        file = None;
                    }
                }
            }
        }
        release.release();

        if let Some(mut f) = file.take()
            && write_error.is_none()
            && read_error.is_none()
            && let Err(e) = f.flush().await
        {
            write_error = Some(e);
        }

        let failure = read_error.or(write_error);
        match failure {
            None => {
                debug!(path = %path.display(), bytes = written, "Attachment written");
                Ok(AttachmentMeta {
                    filename: final_name,
                    content_type: info.content_type,
                    content_id: info.content_id,
                    size: written,
                    storage: AttachmentStorage::Disk { path },
                })
            }
            Some(source) => {
                warn!(path = %path.display(), "Attachment write failed: {source}");
                if created {
                    let _ = fs::remove_file(&path).await;
                }
                Err(PersistFailure {
                    meta: AttachmentMeta {
                        filename: final_name.clone(),
                        content_type: info.content_type,
                        content_id: info.content_id,
                        size: 0,
                        storage: AttachmentStorage::Failed {
                            error: source.to_string(),
                        },
                    },
                    error: WatchError::Attachment {
                        filename: final_name,
                        path,
                        source,
                    },
                })
            }
        }
    }

    /// Create a file that did not exist before, renaming `name` to `name (n)` on collision.
    async fn create_unique(&self, name: &str) -> std::io::Result<(File, PathBuf, String)> {
        for attempt in 0..=MAX_COLLISION_SUFFIX {
            let candidate = if attempt == 0 {
                name.to_string()
            } else {
                numbered(name, attempt)
            };
            let path = self.directory.join(&candidate);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    if attempt > 0 {
                        debug!(requested = %name, chosen = %candidate, "Attachment filename taken, renamed");
                    }
                    return Ok((file, path, candidate));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free filename for {name} after {MAX_COLLISION_SUFFIX} attempts"),
        ))
    }
}

/// Reduce a filename to a single safe path component.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = last.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `report.pdf` → `report (2).pdf`; `README` → `README (2)`.
fn numbered(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}
