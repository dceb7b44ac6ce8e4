//! Configuration management for ceelog

pub mod settings;

pub use settings::{
    CompressionAlgorithm, LogFormat, LoggingSettings, MetricsSettings, RetentionPolicy,
    RotationSettings, ServerConfig, ServerSettings, StorageSettings, UndeclaredContentType,
    ENV_PREFIX,
};
