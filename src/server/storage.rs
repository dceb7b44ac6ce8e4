//! Sink registry for ceelog

use crate::config::StorageSettings;
use crate::server::RotatingSink;
use crate::types::StreamTag;
use crate::{CeeLogError, Result};
use std::sync::Arc;
use tracing::{error, info};

/// Fixed mapping from stream to its sink, built once at startup
pub struct SinkRegistry {
    json: Arc<RotatingSink>,
    xml: Arc<RotatingSink>,
    text: Arc<RotatingSink>,
}

impl SinkRegistry {
    /// Create the output directory and open every stream's sink.
    ///
    /// Any failure here is fatal for the server: it must not start accepting
    /// events it cannot store.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        tokio::fs::create_dir_all(&settings.output_directory)
            .await
            .map_err(|e| {
                CeeLogError::Server(format!(
                    "Failed to create output directory {}: {}",
                    settings.output_directory.display(),
                    e
                ))
            })?;

        let registry = Self {
            json: Arc::new(RotatingSink::open(StreamTag::Json, settings).await?),
            xml: Arc::new(RotatingSink::open(StreamTag::Xml, settings).await?),
            text: Arc::new(RotatingSink::open(StreamTag::Text, settings).await?),
        };

        info!(
            directory = %settings.output_directory.display(),
            "Sinks ready"
        );
        Ok(registry)
    }

    /// Sink for a stream; the same instance for the lifetime of the registry
    pub fn get(&self, tag: StreamTag) -> &Arc<RotatingSink> {
        match tag {
            StreamTag::Json => &self.json,
            StreamTag::Xml => &self.xml,
            StreamTag::Text => &self.text,
        }
    }

    /// All sinks in [`StreamTag::ALL`] order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RotatingSink>> {
        StreamTag::ALL.into_iter().map(move |tag| self.get(tag))
    }

    /// Flush every sink to disk
    pub async fn flush_all(&self) -> Result<()> {
        for sink in self.iter() {
            sink.flush().await?;
        }
        Ok(())
    }

    /// Close every sink, continuing past failures; the first error is returned
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for sink in self.iter() {
            if let Err(e) = sink.close().await {
                error!(stream = %sink.tag(), error = %e, "Failed to close sink");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use tempfile::tempdir;

    fn settings(dir: &std::path::Path) -> StorageSettings {
        StorageSettings {
            output_directory: dir.to_path_buf(),
            ..StorageSettings::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_directory_and_files() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("nested/cee");

        let registry = SinkRegistry::open(&settings(&output)).await.unwrap();

        for name in ["json.log", "xml.log", "text.log"] {
            assert!(output.join(name).exists(), "{} should exist", name);
        }
        assert_eq!(registry.iter().count(), 3);
    }

    #[tokio::test]
    async fn test_get_returns_same_sink() {
        let temp_dir = tempdir().unwrap();
        let registry = SinkRegistry::open(&settings(temp_dir.path())).await.unwrap();

        for tag in StreamTag::ALL {
            assert!(Arc::ptr_eq(registry.get(tag), registry.get(tag)));
            assert_eq!(registry.get(tag).tag(), tag);
        }
    }

    #[tokio::test]
    async fn test_open_fails_fast_when_directory_is_a_file() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        assert!(SinkRegistry::open(&settings(&blocker)).await.is_err());
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let temp_dir = tempdir().unwrap();
        let registry = SinkRegistry::open(&settings(temp_dir.path())).await.unwrap();

        registry
            .get(StreamTag::Json)
            .append(&Event::new(StreamTag::Json, "{}"))
            .await
            .unwrap();
        registry.flush_all().await.unwrap();

        let json = std::fs::read_to_string(temp_dir.path().join("json.log")).unwrap();
        let xml = std::fs::read_to_string(temp_dir.path().join("xml.log")).unwrap();
        assert_eq!(json.lines().count(), 1);
        assert!(xml.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_closes_every_sink() {
        let temp_dir = tempdir().unwrap();
        let registry = SinkRegistry::open(&settings(temp_dir.path())).await.unwrap();

        registry.close_all().await.unwrap();
        for sink in registry.iter() {
            assert!(sink.is_closed().await);
        }
        // Closing twice is harmless.
        registry.close_all().await.unwrap();
    }
}
