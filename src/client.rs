//! Public facade composing the pipeline and owning its lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::alerts::AlertSink;
use crate::collab::{Collaborators, DeviceTopic};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ingest::{Ingestor, SmoothedSnapshot};
use crate::model::CanonicalReading;
use crate::network::connection::{broker_options, ConnectionManager, ConnectionState};
use crate::store::merge;

/// Handle to a running ingestion pipeline.
///
/// Owns the broker session through a spawned [`ConnectionManager`] and
/// exposes the read side: merged history views, realtime snapshots, smoothed
/// averages and connection state. Dropping the client ends the session;
/// [`FleetClient::stop`] does the same explicitly and also cancels any
/// pending reconnect.
pub struct FleetClient {
    client: AsyncClient,
    ingestor: Arc<Ingestor>,
    collaborators: Collaborators,
    config: PipelineConfig,
    state_rx: watch::Receiver<ConnectionState>,
    stop_tx: watch::Sender<bool>,
}

impl FleetClient {
    /// Start the pipeline: build the session, wire the stages, spawn the
    /// connection manager.
    pub async fn connect(
        config: PipelineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, PipelineError> {
        let options = broker_options(&config)?;
        let (client, eventloop) = AsyncClient::new(options, 64);

        let sink = Arc::new(AlertSink::new(
            Duration::from_millis(config.alert_cooldown_ms),
            Duration::from_millis(config.alert_sweep_horizon_ms),
            collaborators.alerts.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(&config, sink, collaborators.readings.clone()));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);

        let manager = ConnectionManager::new(
            client.clone(),
            eventloop,
            ingestor.clone(),
            collaborators.registry.clone(),
            state_tx,
            stop_rx,
        );
        tokio::spawn(manager.run());

        info!("Pipeline started against {}", config.broker_url);
        Ok(Self {
            client,
            ingestor,
            collaborators,
            config,
            state_rx,
            stop_tx,
        })
    }

    /// Current connection state. Queryable at any time, even mid-reconnect.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every connection-state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Merged view of persisted history and the realtime buffer for one
    /// device: ascending by timestamp, bounded by the configured merge limit.
    pub async fn device_history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CanonicalReading>, PipelineError> {
        let historical = self
            .collaborators
            .history
            .fetch_readings(device_id, since, self.config.merge_limit)
            .await?;
        Ok(merge(
            historical,
            self.ingestor.live_snapshot(device_id),
            self.config.merge_limit,
        ))
    }

    /// Realtime buffer snapshot only, arrival order.
    pub fn live_snapshot(&self, device_id: &str) -> Vec<CanonicalReading> {
        self.ingestor.live_snapshot(device_id)
    }

    /// Current moving averages for a device.
    pub fn smoothed(&self, device_id: &str) -> SmoothedSnapshot {
        self.ingestor.smoothed(device_id)
    }

    /// Subscribe a newly registered device's topic.
    pub async fn add_device(&self, device: &DeviceTopic) -> Result<(), PipelineError> {
        self.ingestor.readmit(&device.device_id);
        self.client
            .subscribe(device.topic.as_str(), QoS::AtMostOnce)
            .await?;
        info!(device = %device.device_id, topic = %device.topic, "Device subscribed");
        Ok(())
    }

    /// Unsubscribe a removed device and stop accepting its messages.
    /// Already-buffered readings stay available for in-flight reads.
    pub async fn remove_device(&self, device: &DeviceTopic) -> Result<(), PipelineError> {
        self.client.unsubscribe(device.topic.as_str()).await?;
        self.ingestor.retire(&device.device_id);
        info!(device = %device.device_id, topic = %device.topic, "Device unsubscribed");
        Ok(())
    }

    /// Permanently tear down a device: unsubscribe its topic and drop all of
    /// its in-memory state, including the realtime buffer. Use
    /// [`FleetClient::remove_device`] instead when buffered readings should
    /// stay readable.
    pub async fn purge_device(&self, device: &DeviceTopic) -> Result<(), PipelineError> {
        self.client.unsubscribe(device.topic.as_str()).await?;
        self.ingestor.purge(&device.device_id);
        info!(device = %device.device_id, topic = %device.topic, "Device purged");
        Ok(())
    }

    /// Publish a control command to a device
    /// (`devices/{id}/control/{action}` with a JSON payload).
    ///
    /// The command channel is a sibling concern of the ingestion core; this
    /// is a thin passthrough to the broker session.
    pub async fn send_command(
        &self,
        device_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<(), PipelineError> {
        let topic = format!("devices/{}/control/{}", device_id, action);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_string())
            .await?;
        Ok(())
    }

    /// Signal the session loop to stop: no further reconnect attempts are
    /// scheduled and the current connection is closed.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
