//! # ceelog - CEE Audit Event Ingestion
//!
//! ceelog is an HTTP endpoint for Common Event Expression (CEE) audit forwarders.
//! Events arrive as JSON, XML or plain text over `PUT`/`POST`, are checked for
//! syntactic validity and appended to one rotating log file per format.
//!
//! ## Features
//!
//! - **Format Dispatch**: `Content-Type` driven routing to `json`, `xml` and `text` streams
//! - **Log Rotation**: Time and size based rollover with bounded retention
//! - **Archival**: Evicted files deleted or compressed (gzip, lz4)
//! - **Graceful Shutdown**: Bounded drain of in-flight requests, sinks flushed on exit
//!
//! ## Quick Start
//!
//! ```no_run
//! use ceelog::config::ServerConfig;
//! use ceelog::server::{shutdown, EventServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from_file("config/server.toml")?;
//!     let server = EventServer::new(config).await?;
//!     server.run(shutdown::create_shutdown_token()).await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod logging;
pub mod server;
pub mod types;

/// Common error types used throughout ceelog
pub mod error {
    use thiserror::Error;

    /// ceelog error types
    #[derive(Debug, Error)]
    pub enum CeeLogError {
        /// I/O operation failed
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),
        /// Server error
        #[error("Server error: {0}")]
        Server(String),
        /// The sink was closed during shutdown and accepts no more records
        #[error("Sink for stream '{0}' is closed")]
        SinkClosed(String),
        /// Archiving a rotated file failed
        #[error("Compression error: {0}")]
        Compression(String),
    }

    impl From<config::ConfigError> for CeeLogError {
        fn from(err: config::ConfigError) -> Self {
            CeeLogError::Config(err.to_string())
        }
    }

    impl From<tokio::task::JoinError> for CeeLogError {
        fn from(err: tokio::task::JoinError) -> Self {
            CeeLogError::Server(format!("Task failed: {}", err))
        }
    }

    /// Result type alias for ceelog operations
    pub type Result<T> = std::result::Result<T, CeeLogError>;
}

pub use error::{CeeLogError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::server::{EventServer, LifecycleState, RotatingSink, SinkRegistry};
    pub use crate::types::{Event, StreamTag};
    pub use crate::{CeeLogError, Result};
}
