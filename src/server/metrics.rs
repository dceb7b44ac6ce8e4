//! Prometheus counters for the ingestion endpoint

use crate::types::StreamTag;
use crate::{CeeLogError, Result};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Ingestion counters, exposed in the Prometheus text format
pub struct IngestMetrics {
    registry: Registry,
    stored: IntCounterVec,
    rejected: IntCounterVec,
    storage_failures: IntCounterVec,
}

impl IngestMetrics {
    /// Create and register the counters
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let stored = counter_vec(
            &registry,
            "ceelog_events_stored_total",
            "Events persisted, by stream",
            "stream",
        )?;
        let rejected = counter_vec(
            &registry,
            "ceelog_events_rejected_total",
            "Requests refused before storage, by reason",
            "reason",
        )?;
        let storage_failures = counter_vec(
            &registry,
            "ceelog_storage_failures_total",
            "Events that failed to persist, by stream",
            "stream",
        )?;

        Ok(Self {
            registry,
            stored,
            rejected,
            storage_failures,
        })
    }

    /// Count a persisted event
    pub fn event_stored(&self, tag: StreamTag) {
        self.stored.with_label_values(&[tag.name()]).inc();
    }

    /// Count a refused request
    pub fn event_rejected(&self, reason: &str) {
        self.rejected.with_label_values(&[reason]).inc();
    }

    /// Count a failed append
    pub fn storage_failed(&self, tag: StreamTag) {
        self.storage_failures.with_label_values(&[tag.name()]).inc();
    }

    /// Render every counter in the text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CeeLogError::Server(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| CeeLogError::Server(format!("Metrics are not UTF-8: {}", e)))
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, label: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &[label])
        .map_err(|e| CeeLogError::Server(format!("Invalid metric {}: {}", name, e)))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| CeeLogError::Server(format!("Failed to register {}: {}", name, e)))?;
    Ok(counter)
}
