//! Boundary interfaces to the rest of the application.
//!
//! The pipeline is a library layer; storage, alert persistence and the device
//! registry live elsewhere and are reached only through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::model::{AnomalyNotice, CanonicalReading};

/// One registered device and the topic it publishes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic {
    pub device_id: String,
    pub topic: String,
}

/// Source of persisted historical readings, consumed by the merged view.
///
/// Rows must be returned ascending by timestamp, already validated by the
/// storage layer.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn fetch_readings(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CanonicalReading>, PipelineError>;
}

/// Best-effort persistence forward for processed readings.
///
/// Failures are logged by the pipeline and never retried here; retry policy
/// belongs to the storage layer.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn persist_reading(&self, reading: &CanonicalReading) -> Result<(), PipelineError>;
}

/// Persistence for non-suppressed anomaly notices.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn persist_alert(&self, notice: &AnomalyNotice) -> Result<(), PipelineError>;
}

/// Supplies the current device/topic set so the connection manager knows what
/// to subscribe.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn devices(&self) -> Result<Vec<DeviceTopic>, PipelineError>;
}

/// The full set of external collaborators wired in at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub history: Arc<dyn HistoryStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub registry: Arc<dyn DeviceRegistry>,
    /// Optional: when absent, processed readings are not forwarded anywhere.
    pub readings: Option<Arc<dyn ReadingStore>>,
}
