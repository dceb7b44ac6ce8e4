//! Log rotation implementation for ceelog
//!
//! The [`LogRotator`] timer asks every sink whether its active file is due
//! for rollover; the sink does the rollover itself under its own lock.
//! Retention of rotated files (deletion or archival) lives here as well.

use crate::config::{CompressionAlgorithm, RetentionPolicy, RotationSettings};
use crate::server::sink::active_file_name;
use crate::server::SinkRegistry;
use crate::types::StreamTag;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `chrono` format of the timestamp suffix of rotated files
pub const ROTATED_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Suffix of an archive that is still being written
const PARTIAL_SUFFIX: &str = "tmp";

/// Log rotation manager
pub struct LogRotator {
    registry: Arc<SinkRegistry>,
    check_interval: Duration,
    enabled: bool,
}

impl LogRotator {
    /// Create a new log rotator
    pub fn new(settings: &RotationSettings, registry: Arc<SinkRegistry>) -> Self {
        Self {
            registry,
            check_interval: Duration::from_secs(settings.check_interval_secs.max(1)),
            enabled: settings.enabled,
        }
    }

    /// Run the rotation timer until `cancel` fires
    pub async fn start_rotation_task(self, cancel: CancellationToken) {
        if !self.enabled {
            return;
        }

        let mut rotation_interval = interval(self.check_interval);
        rotation_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(every = ?self.check_interval, "Rotation timer started");

        loop {
            tokio::select! {
                _ = rotation_interval.tick() => self.rotate_due().await,
                () = cancel.cancelled() => break,
            }
        }

        debug!("Rotation timer stopped");
    }

    /// Check every sink once
    pub async fn rotate_due(&self) {
        for sink in self.registry.iter() {
            if let Err(e) = sink.maybe_rotate().await {
                warn!(stream = %sink.tag(), error = %e, "Scheduled rotation failed, will retry");
            }
        }
    }
}

/// What a retention pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    /// Rotated files or archives removed
    pub deleted: usize,
    /// Rotated files compressed into archives
    pub archived: usize,
}

/// Bring the rotated files of one stream back within the configured bounds.
///
/// Files are ordered by name, which orders them by rotation time. With
/// [`RetentionPolicy::Archive`] each evicted file is compressed into a
/// `.tmp` file, renamed into place, and only then removed, so a crash leaves
/// at most one extra file behind.
pub async fn enforce_retention(
    directory: &Path,
    tag: StreamTag,
    settings: &RotationSettings,
) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    let (rotated, archives) = list_retained(directory, tag).await?;

    let keep = settings.keep_files as usize;
    if keep > 0 && rotated.len() > keep {
        let excess = rotated.len() - keep;
        for path in &rotated[..excess] {
            match settings.retention {
                RetentionPolicy::Delete => {
                    fs::remove_file(path).await?;
                    info!(stream = %tag, path = %path.display(), "Deleted rotated file");
                    report.deleted += 1;
                }
                RetentionPolicy::Archive => {
                    let archive = archive_file(path, settings.compression_algorithm).await?;
                    info!(stream = %tag, archive = %archive.display(), "Archived rotated file");
                    report.archived += 1;
                }
            }
        }
    }

    let max_archives = settings.max_archives as usize;
    if max_archives > 0 {
        let (_, archives) = if report.archived > 0 {
            list_retained(directory, tag).await?
        } else {
            (Vec::new(), archives)
        };
        if archives.len() > max_archives {
            for path in &archives[..archives.len() - max_archives] {
                fs::remove_file(path).await?;
                info!(stream = %tag, path = %path.display(), "Deleted archive");
                report.deleted += 1;
            }
        }
    }

    Ok(report)
}

/// Rotated files and archives of a stream, each sorted oldest first
async fn list_retained(directory: &Path, tag: StreamTag) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let prefix = format!("{}.", active_file_name(tag));
    let archive_exts = [
        CompressionAlgorithm::Gzip.extension(),
        CompressionAlgorithm::Lz4.extension(),
    ];

    let mut rotated = Vec::new();
    let mut archives = Vec::new();
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !entry.file_type().await?.is_file() {
            continue;
        }

        let ext = Path::new(name.as_ref())
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if ext == PARTIAL_SUFFIX {
            continue;
        }
        if archive_exts.contains(&ext) {
            archives.push(entry.path());
        } else {
            rotated.push(entry.path());
        }
    }

    rotated.sort();
    archives.sort();
    Ok((rotated, archives))
}

/// Compress `source` next to itself and remove it, returning the archive path
#[cfg(feature = "compression")]
pub(crate) async fn archive_file(source: &Path, algorithm: CompressionAlgorithm) -> Result<PathBuf> {
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || compress_blocking(&source, algorithm)).await?
}

#[cfg(not(feature = "compression"))]
pub(crate) async fn archive_file(source: &Path, _algorithm: CompressionAlgorithm) -> Result<PathBuf> {
    Err(crate::CeeLogError::Compression(format!(
        "cannot archive {}: built without the 'compression' feature",
        source.display()
    )))
}

#[cfg(feature = "compression")]
fn compress_blocking(source: &Path, algorithm: CompressionAlgorithm) -> Result<PathBuf> {
    use crate::CeeLogError;
    use std::io::{BufReader, BufWriter, Write};

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CeeLogError::Compression(format!("invalid path {}", source.display())))?;
    let archive = source.with_file_name(format!("{}.{}", file_name, algorithm.extension()));
    let partial = source.with_file_name(format!(
        "{}.{}.{}",
        file_name,
        algorithm.extension(),
        PARTIAL_SUFFIX
    ));

    let mut input = BufReader::new(std::fs::File::open(source)?);
    let output = BufWriter::new(std::fs::File::create(&partial)?);

    let mut output = match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?
        }
        CompressionAlgorithm::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(output);
            std::io::copy(&mut input, &mut encoder)?;
            encoder
                .finish()
                .map_err(|e| CeeLogError::Compression(e.to_string()))?
        }
    };
    output.flush()?;
    output
        .into_inner()
        .map_err(|e| CeeLogError::Compression(e.to_string()))?
        .sync_all()?;

    std::fs::rename(&partial, &archive)?;
    std::fs::remove_file(source)?;
    Ok(archive)
}
