//! Configuration structures for ceelog

use crate::{CeeLogError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `CEELOG_SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "CEELOG";

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Storage configuration
    pub storage: StorageSettings,
    /// Diagnostic logging of the server itself
    pub logging: LoggingSettings,
    /// Metrics configuration
    pub metrics: MetricsSettings,
}

/// Core server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub host: String,
    /// TCP port to listen on
    pub port: u16,
    /// The single path events are delivered to
    pub ingest_path: String,
    /// Accept `POST` in addition to `PUT`
    pub accept_post: bool,
    /// How to treat requests without a `Content-Type`
    pub undeclared_content_type: UndeclaredContentType,
    /// Largest accepted request body (bytes)
    pub max_body_bytes: usize,
    /// Time in-flight requests get to finish after a shutdown signal
    pub shutdown_grace_secs: u64,
}

/// Handling of requests that carry no `Content-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndeclaredContentType {
    /// Try JSON, then XML, otherwise store as text
    Sniff,
    /// Store as text without inspection
    Text,
    /// Reject with 400
    Reject,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding the stream files
    pub output_directory: PathBuf,
    /// Maximum file size before rotation (bytes, 0 disables size rollover)
    pub max_file_size: u64,
    /// fsync after every record instead of only on rotation and close
    pub sync_on_write: bool,
    /// Log rotation settings
    pub rotation: RotationSettings,
}

/// Log rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Enable log rotation
    pub enabled: bool,
    /// Maximum age of the active file in seconds
    pub interval_secs: u64,
    /// How often the background timer checks for due rotations
    pub check_interval_secs: u64,
    /// Number of rotated files to keep (0 keeps everything)
    pub keep_files: u32,
    /// What happens to rotated files beyond `keep_files`
    pub retention: RetentionPolicy,
    /// Compression used by [`RetentionPolicy::Archive`]
    pub compression_algorithm: CompressionAlgorithm,
    /// Number of archives to keep (0 keeps everything)
    pub max_archives: u32,
}

/// Eviction policy for rotated files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Delete the oldest rotated files
    Delete,
    /// Compress the oldest rotated files and delete the originals
    Archive,
}

/// Archive compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// gzip via flate2
    Gzip,
    /// lz4 frame format
    Lz4,
}

impl CompressionAlgorithm {
    /// File extension appended to archived files
    pub fn extension(self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gz",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Also send diagnostics to journald (requires the `journald` feature)
    pub journald: bool,
}

/// Diagnostic log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// Flattened JSON objects
    Json,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Enable metrics endpoint (requires the `metrics` feature)
    pub enabled: bool,
    /// Metrics endpoint path
    pub path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ingest_path: "/cee".to_string(),
            accept_post: true,
            undeclared_content_type: UndeclaredContentType::Sniff,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("/var/log/cee-server"),
            max_file_size: 100 * 1024 * 1024, // 100MB
            sync_on_write: false,
            rotation: RotationSettings::default(),
        }
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 24 * 60 * 60,
            check_interval_secs: 60,
            keep_files: 7,
            retention: RetentionPolicy::Delete,
            compression_algorithm: CompressionAlgorithm::Gzip,
            max_archives: 0,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            journald: false,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/metrics".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, with `CEELOG_*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Load configuration from an optional TOML file layered under the environment.
    ///
    /// Without a file, built-in defaults are used as the base layer.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let config: ServerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)
            .map_err(|e| CeeLogError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let path = &self.server.ingest_path;
        if path.is_empty() || !path.starts_with('/') {
            return Err(CeeLogError::Config(format!(
                "Ingest path must start with '/': {:?}",
                path
            )));
        }
        if self.server.port == 0 {
            return Err(CeeLogError::Config("Port cannot be 0".to_string()));
        }
        if self.storage.output_directory.as_os_str().is_empty() {
            return Err(CeeLogError::Config(
                "Output directory cannot be empty".to_string(),
            ));
        }

        let rotation = &self.storage.rotation;
        if rotation.enabled && (rotation.interval_secs == 0 || rotation.check_interval_secs == 0) {
            return Err(CeeLogError::Config(
                "Rotation intervals must be greater than 0".to_string(),
            ));
        }
        if rotation.retention == RetentionPolicy::Archive && !cfg!(feature = "compression") {
            return Err(CeeLogError::Config(
                "Archive retention requires the 'compression' feature".to_string(),
            ));
        }

        if self.metrics.enabled && self.metrics.path == *path {
            return Err(CeeLogError::Config(
                "Metrics path cannot equal the ingest path".to_string(),
            ));
        }
        Ok(())
    }
}
