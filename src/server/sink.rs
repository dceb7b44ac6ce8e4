//! Rotating file sink, one per stream

use crate::config::{RotationSettings, StorageSettings};
use crate::server::rotation::{self, RetentionReport};
use crate::types::{Event, StreamTag};
use crate::{CeeLogError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Append-only writer for one stream with time and size based rollover.
///
/// `append`, `maybe_rotate`, `flush` and `close` all take the same lock, so a
/// record is never split across files and never written to a file that is
/// being closed. Different sinks share nothing.
pub struct RotatingSink {
    tag: StreamTag,
    directory: PathBuf,
    active_path: PathBuf,
    max_file_size: u64,
    sync_on_write: bool,
    interval: ChronoDuration,
    rotation: RotationSettings,
    state: Mutex<SinkState>,
    retention_lock: Mutex<()>,
}

struct SinkState {
    /// `None` once the sink has been closed
    writer: Option<BufWriter<File>>,
    opened_at: DateTime<Utc>,
    bytes_written: u64,
}

impl RotatingSink {
    /// Open (or create) the active file for `tag` inside the output directory
    pub async fn open(tag: StreamTag, settings: &StorageSettings) -> Result<Self> {
        let directory = settings.output_directory.clone();
        let active_path = directory.join(active_file_name(tag));

        let file = open_append(&active_path).await.map_err(|e| {
            CeeLogError::Server(format!(
                "Failed to open {} for stream '{}': {}",
                active_path.display(),
                tag,
                e
            ))
        })?;
        let interval = std::time::Duration::from_secs(settings.rotation.interval_secs);
        let interval = ChronoDuration::from_std(interval).map_err(|_| {
            CeeLogError::Config(format!(
                "Rotation interval out of range: {}s",
                settings.rotation.interval_secs
            ))
        })?;

        let metadata = file.metadata().await?;
        let bytes_written = metadata.len();
        // A leftover file is as old as its last write, so a stale one rotates on the first check.
        let opened_at = match metadata.modified() {
            Ok(modified) if bytes_written > 0 => DateTime::<Utc>::from(modified),
            _ => Utc::now(),
        };

        debug!(stream = %tag, path = %active_path.display(), bytes_written, "Opened sink");

        Ok(Self {
            tag,
            directory,
            active_path,
            max_file_size: settings.max_file_size,
            sync_on_write: settings.sync_on_write,
            interval,
            rotation: settings.rotation.clone(),
            state: Mutex::new(SinkState {
                writer: Some(BufWriter::new(file)),
                opened_at,
                bytes_written,
            }),
            retention_lock: Mutex::new(()),
        })
    }

    /// Stream this sink persists
    pub fn tag(&self) -> StreamTag {
        self.tag
    }

    /// Path of the file currently open for append
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    /// Append one event as a single record.
    ///
    /// A due rotation is attempted first; if it fails the record still goes
    /// to the current file and rotation is retried on the next trigger.
    pub async fn append(&self, event: &Event) -> Result<()> {
        let record = event.to_record_line();
        let rotated = {
            let mut state = self.state.lock().await;
            if state.writer.is_none() {
                return Err(CeeLogError::SinkClosed(self.tag.name().to_string()));
            }

            let rotated = match self
                .rotate_if_due(&mut state, Utc::now(), record.len() as u64)
                .await
            {
                Ok(rotated) => rotated,
                Err(e) => {
                    warn!(stream = %self.tag, error = %e, "Rotation failed, appending to current file");
                    false
                }
            };

            if let Err(e) = self.write_record(&mut state, record.as_bytes()).await {
                self.discard_partial_record(&mut state).await;
                return Err(e);
            }
            state.bytes_written += record.len() as u64;
            rotated
        };

        if rotated {
            self.enforce_retention().await;
        }
        Ok(())
    }

    /// Roll the active file over if it is due at the current time
    pub async fn maybe_rotate(&self) -> Result<bool> {
        self.maybe_rotate_at(Utc::now()).await
    }

    /// Roll the active file over if it is due at `now`.
    ///
    /// Returns whether a rollover happened. A closed sink never rotates.
    pub async fn maybe_rotate_at(&self, now: DateTime<Utc>) -> Result<bool> {
        let rotated = {
            let mut state = self.state.lock().await;
            if state.writer.is_none() {
                return Ok(false);
            }
            self.rotate_if_due(&mut state, now, 0).await?
        };

        if rotated {
            self.enforce_retention().await;
        }
        Ok(rotated)
    }

    /// Push buffered records to the OS and sync file data
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.as_mut() {
            writer.flush().await?;
            writer.get_ref().sync_data().await?;
        }
        Ok(())
    }

    /// Flush, sync and close the active file. Later appends fail with [`CeeLogError::SinkClosed`].
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut writer) = state.writer.take() {
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
            info!(stream = %self.tag, bytes = state.bytes_written, "Closed sink");
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has run
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.writer.is_none()
    }

    /// Caller holds the state lock. `incoming` is the size of the record about to be written.
    async fn rotate_if_due(
        &self,
        state: &mut SinkState,
        now: DateTime<Utc>,
        incoming: u64,
    ) -> Result<bool> {
        if !self.rotation.enabled {
            return Ok(false);
        }

        let time_due = now.signed_duration_since(state.opened_at) >= self.interval;
        let size_due = self.max_file_size > 0
            && state.bytes_written > 0
            && state.bytes_written + incoming > self.max_file_size;

        if !time_due && !size_due {
            return Ok(false);
        }
        if state.bytes_written == 0 {
            // Nothing to keep, start the next period on the same empty file.
            state.opened_at = now;
            return Ok(false);
        }

        self.rotate(state, now).await?;
        Ok(true)
    }

    /// Caller holds the state lock.
    async fn write_record(&self, state: &mut SinkState, record: &[u8]) -> Result<()> {
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| CeeLogError::SinkClosed(self.tag.name().to_string()))?;
        writer.write_all(record).await?;
        writer.flush().await?;
        if self.sync_on_write {
            writer.get_ref().sync_data().await?;
        }
        Ok(())
    }

    /// Cut the active file back to the last complete record after a failed write.
    ///
    /// `bytes_written` is the exact length of complete records: it starts at the
    /// file length and is only advanced after a successful write. Buffered bytes
    /// are dropped with the old writer and a fresh handle is used from here on.
    async fn discard_partial_record(&self, state: &mut SinkState) {
        let Some(writer) = state.writer.take() else {
            return;
        };
        let stale = writer.into_inner();
        let good_len = state.bytes_written;

        let file = match open_append(&self.active_path).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(stream = %self.tag, error = %e, "Failed to reopen active file, truncating in place");
                stale
            }
        };
        match file.set_len(good_len).await {
            Ok(()) => debug!(stream = %self.tag, bytes = good_len, "Discarded partial record"),
            Err(e) => {
                error!(
                    stream = %self.tag,
                    path = %self.active_path.display(),
                    error = %e,
                    "Failed to discard partial record"
                );
                if let Ok(metadata) = file.metadata().await {
                    state.bytes_written = metadata.len();
                }
            }
        }
        state.writer = Some(BufWriter::new(file));
    }

    async fn rotate(&self, state: &mut SinkState, now: DateTime<Utc>) -> Result<()> {
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| CeeLogError::SinkClosed(self.tag.name().to_string()))?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        let rotated_path = self.next_rotated_path(now).await;
        let renamed = match fs::rename(&self.active_path, &rotated_path).await {
            Ok(()) => true,
            // The active file was moved away underneath the writer, e.g. by a
            // rollover that could not be undone. Its records are already kept
            // under that name; only a fresh active file is missing.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(stream = %self.tag, path = %self.active_path.display(), "Active file missing, recreating it");
                false
            }
            Err(e) => return Err(e.into()),
        };

        let fresh = match open_append(&self.active_path).await {
            Ok(file) => file,
            Err(e) => {
                // The old handle now points at the rotated name; put it back so the
                // active path keeps receiving records. If that fails too, the next
                // rollover finds the active file missing and recreates it.
                if renamed {
                    if let Err(back) = fs::rename(&rotated_path, &self.active_path).await {
                        error!(
                            stream = %self.tag,
                            path = %rotated_path.display(),
                            error = %back,
                            "Failed to restore active file after aborted rotation"
                        );
                    }
                }
                return Err(e.into());
            }
        };

        // Already flushed and synced, dropping closes it.
        drop(state.writer.replace(BufWriter::new(fresh)));
        let bytes = std::mem::take(&mut state.bytes_written);
        state.opened_at = now;

        if renamed {
            info!(
                stream = %self.tag,
                rotated = %rotated_path.display(),
                bytes,
                "Rotated active file"
            );
        }
        Ok(())
    }

    async fn next_rotated_path(&self, now: DateTime<Utc>) -> PathBuf {
        let base = format!(
            "{}.{}",
            active_file_name(self.tag),
            now.format(rotation::ROTATED_TIMESTAMP_FORMAT)
        );
        let mut candidate = self.directory.join(&base);
        let mut n = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self.directory.join(format!("{}.{:03}", base, n));
            n += 1;
        }
        candidate
    }

    async fn enforce_retention(&self) {
        let _guard = self.retention_lock.lock().await;
        match rotation::enforce_retention(&self.directory, self.tag, &self.rotation).await {
            Ok(RetentionReport { deleted, archived }) if deleted + archived > 0 => {
                debug!(stream = %self.tag, deleted, archived, "Retention enforced");
            }
            Ok(_) => {}
            Err(e) => warn!(stream = %self.tag, error = %e, "Retention enforcement failed"),
        }
    }
}

/// File name of the active file for a stream
pub fn active_file_name(tag: StreamTag) -> String {
    format!("{}.log", tag.name())
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}
