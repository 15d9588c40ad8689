//! The per-message ingestion path: throttle, normalize, validate, smooth,
//! buffer, forward.
//!
//! This is deliberately independent of the transport so the whole path can be
//! driven in tests without a broker.

pub mod smoother;
pub mod throttle;
pub mod validator;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{trace, warn};

use crate::alerts::AlertSink;
use crate::collab::ReadingStore;
use crate::config::PipelineConfig;
use crate::model::{AnomalyKind, AnomalyNotice, CanonicalReading};
use crate::normalizer;
use crate::store::RingBuffer;

pub use smoother::{SmoothedSnapshot, Smoother};
pub use throttle::Throttle;
pub use validator::RangeValidator;

/// Owns the downstream stages and runs each inbound message through them in
/// order. Shared between the connection manager (writer) and the client
/// facade (reader).
pub struct Ingestor {
    throttle: Throttle,
    smoother: Smoother,
    validator: RangeValidator,
    buffer: RingBuffer,
    alerts: Arc<AlertSink>,
    readings: Option<Arc<dyn ReadingStore>>,
    /// Devices removed from the fleet; their messages are dropped even if the
    /// broker still delivers on a shared topic.
    retired: Mutex<HashSet<String>>,
}

impl Ingestor {
    pub fn new(
        config: &PipelineConfig,
        alerts: Arc<AlertSink>,
        readings: Option<Arc<dyn ReadingStore>>,
    ) -> Self {
        Self {
            throttle: Throttle::new(Duration::from_millis(config.min_accept_interval_ms)),
            smoother: Smoother::new(config.smoothing_window),
            validator: RangeValidator::new(config.metric_bounds.clone()),
            buffer: RingBuffer::new(config.ring_buffer_capacity),
            alerts,
            readings,
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Stage order: throttle gate, normalizer, validator (anomalies to the
    /// alert sink), smoother, ring buffer, best-effort persistence forward.
    /// A failed stage is reported as a single anomaly; it never stops
    /// delivery of subsequent messages.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        // Throttle on the topic-derived hint; devices only identifiable from
        // the payload fall back to the topic itself as the key.
        let descriptor = normalizer::describe_topic(topic);
        let throttle_key = descriptor.device_id.as_deref().unwrap_or(topic);
        if !self.throttle.accept(throttle_key) {
            trace!(topic, "Message dropped by throttle");
            return;
        }

        let Some(reading) = normalizer::parse(topic, payload) else {
            warn!(topic, "Unparseable message dropped");
            let device = descriptor.device_id.unwrap_or_else(|| topic.to_string());
            self.alerts
                .offer(AnomalyNotice::new(
                    device,
                    AnomalyKind::MalformedPayload,
                    format!("unparseable payload on topic {}", topic),
                ))
                .await;
            return;
        };

        if self.is_retired(&reading.device_id) {
            trace!(device = %reading.device_id, "Message for retired device dropped");
            return;
        }

        for notice in self.validator.check(&reading) {
            self.alerts.offer(notice).await;
        }

        self.smoother.append(&reading);
        self.buffer.append(reading.clone());

        if let Some(store) = &self.readings {
            if let Err(e) = store.persist_reading(&reading).await {
                warn!(device = %reading.device_id, "Failed to persist reading: {}", e);
            }
        }
    }

    /// The alert sink, shared with the connection manager for transport
    /// anomalies and the periodic sweep.
    pub fn alerts(&self) -> &Arc<AlertSink> {
        &self.alerts
    }

    /// Realtime buffer snapshot for a device, arrival order.
    pub fn live_snapshot(&self, device_id: &str) -> Vec<CanonicalReading> {
        self.buffer.snapshot(device_id)
    }

    /// Current moving averages for a device.
    pub fn smoothed(&self, device_id: &str) -> SmoothedSnapshot {
        self.smoother.snapshot(device_id)
    }

    /// Stop accepting messages for a device and clear its smoothing state.
    /// Already-buffered readings stay intact for in-flight reads.
    pub fn retire(&self, device_id: &str) {
        self.retired.lock().unwrap().insert(device_id.to_string());
        self.throttle.forget(device_id);
        self.smoother.forget(device_id);
    }

    /// Re-admit a device that was previously retired.
    pub fn readmit(&self, device_id: &str) {
        self.retired.lock().unwrap().remove(device_id);
    }

    /// Drop every in-memory trace of a device: throttle and smoothing state,
    /// buffered readings, and the retired marker. For permanent teardown,
    /// where [`Ingestor::retire`] keeps the buffer for in-flight reads.
    pub fn purge(&self, device_id: &str) {
        self.retired.lock().unwrap().remove(device_id);
        self.throttle.forget(device_id);
        self.smoother.forget(device_id);
        self.buffer.forget(device_id);
    }

    fn is_retired(&self, device_id: &str) -> bool {
        self.retired.lock().unwrap().contains(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use crate::collab::AlertStore;
    use crate::error::PipelineError;
    use crate::model::Metric;

    #[derive(Default)]
    struct RecordingAlerts {
        notices: StdMutex<Vec<AnomalyNotice>>,
    }

    #[async_trait]
    impl AlertStore for RecordingAlerts {
        async fn persist_alert(&self, notice: &AnomalyNotice) -> Result<(), PipelineError> {
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    fn ingestor_with(
        config: PipelineConfig,
    ) -> (Ingestor, Arc<RecordingAlerts>) {
        let alerts = Arc::new(RecordingAlerts::default());
        let sink = Arc::new(AlertSink::new(
            Duration::from_millis(config.alert_cooldown_ms),
            Duration::from_millis(config.alert_sweep_horizon_ms),
            alerts.clone(),
        ));
        (Ingestor::new(&config, sink, None), alerts)
    }

    #[tokio::test]
    async fn test_message_flows_to_buffer_and_smoother() {
        let (ingestor, _) = ingestor_with(PipelineConfig::default());

        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 9.3}"#)
            .await;

        let snap = ingestor.live_snapshot("Station_1");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].metric(Metric::Primary), Some(9.3));
        assert_eq!(
            ingestor.smoothed("Station_1").average(Metric::Primary),
            Some(9.3)
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_raises_anomaly_and_drops() {
        let (ingestor, alerts) = ingestor_with(PipelineConfig::default());

        ingestor.handle_message("iot/Station_1/ammonia", b"garbage!").await;

        assert!(ingestor.live_snapshot("Station_1").is_empty());
        let notices = alerts.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, AnomalyKind::MalformedPayload);
        assert_eq!(notices[0].device_id, "Station_1");
    }

    #[tokio::test]
    async fn test_out_of_range_reading_still_buffered() {
        let (ingestor, alerts) = ingestor_with(PipelineConfig::default());

        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 5000}"#)
            .await;

        // Out-of-range is a domain signal, not a drop.
        assert_eq!(ingestor.live_snapshot("Station_1").len(), 1);
        let notices = alerts.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, AnomalyKind::OutOfRange);
    }

    #[tokio::test]
    async fn test_throttle_drops_rapid_messages() {
        let (ingestor, _) = ingestor_with(PipelineConfig::default());

        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 1}"#)
            .await;
        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 2}"#)
            .await;

        // Back-to-back messages land well inside the 200ms window.
        assert_eq!(ingestor.live_snapshot("Station_1").len(), 1);
    }

    #[tokio::test]
    async fn test_retired_device_messages_dropped_but_buffer_kept() {
        let mut config = PipelineConfig::default();
        config.min_accept_interval_ms = 0;
        let (ingestor, _) = ingestor_with(config);

        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 1}"#)
            .await;
        ingestor.retire("Station_1");
        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 2}"#)
            .await;

        assert_eq!(ingestor.live_snapshot("Station_1").len(), 1);
        assert_eq!(ingestor.smoothed("Station_1"), SmoothedSnapshot::default());

        ingestor.readmit("Station_1");
        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 3}"#)
            .await;
        assert_eq!(ingestor.live_snapshot("Station_1").len(), 2);
    }

    #[tokio::test]
    async fn test_purge_clears_buffer_and_derived_state() {
        let mut config = PipelineConfig::default();
        config.min_accept_interval_ms = 0;
        let (ingestor, _) = ingestor_with(config);

        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 1}"#)
            .await;
        ingestor.purge("Station_1");

        assert!(ingestor.live_snapshot("Station_1").is_empty());
        assert_eq!(ingestor.smoothed("Station_1"), SmoothedSnapshot::default());

        // A purged device is indistinguishable from a never-seen one.
        ingestor
            .handle_message("iot/Station_1/ammonia", br#"{"ammonia": 2}"#)
            .await;
        assert_eq!(ingestor.live_snapshot("Station_1").len(), 1);
    }
}
