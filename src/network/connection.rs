//! The broker session: connect, subscribe, reconnect, route messages.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::collab::DeviceRegistry;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ingest::Ingestor;
use crate::model::{AnomalyKind, AnomalyNotice};
use crate::network::backoff::Backoff;

/// Device id attached to connection-level anomaly notices.
const BROKER_DEVICE: &str = "broker";

/// How often the alert sink's dedup map is swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle of the single broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped.
    Idle,
    /// First handshake in progress.
    Connecting,
    /// Session established; subscriptions active.
    Connected,
    /// Session dropped; a scheduled reconnect is pending.
    Reconnecting,
    /// The broker cannot be reached and no attempt is in flight.
    Offline,
    /// The broker rejected the session (e.g. bad credentials). Scheduled
    /// reconnects continue unless the pipeline is stopped.
    Error,
}

impl ConnectionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build MQTT session options from the pipeline config.
///
/// Accepts `mqtt://host[:port]` and `tcp://host[:port]`; the port defaults
/// to 1883.
pub fn broker_options(config: &PipelineConfig) -> Result<MqttOptions, PipelineError> {
    let url = Url::parse(&config.broker_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| PipelineError::ConnectionError("broker URL has no host".to_string()))?;
    let port = url.port().unwrap_or(1883);

    let mut options = MqttOptions::new(config.generate_client_id(), host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(config.clean_session);
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user.clone(), pass.clone());
    }

    Ok(options)
}

/// Owns the MQTT event loop and drives [`ConnectionState`].
///
/// Exactly one of these runs per pipeline. State is published through a watch
/// channel; readers observe and never mutate.
pub struct ConnectionManager {
    client: AsyncClient,
    eventloop: EventLoop,
    ingestor: Arc<Ingestor>,
    registry: Arc<dyn DeviceRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    stop_rx: watch::Receiver<bool>,
    backoff: Backoff,
}

impl ConnectionManager {
    pub fn new(
        client: AsyncClient,
        eventloop: EventLoop,
        ingestor: Arc<Ingestor>,
        registry: Arc<dyn DeviceRegistry>,
        state_tx: watch::Sender<ConnectionState>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            eventloop,
            ingestor,
            registry,
            state_tx,
            stop_rx,
            backoff: Backoff::broker_default(),
        }
    }

    /// The session loop. Runs until the stop signal fires or the client
    /// handle is dropped; every failure mode degrades to retrying.
    pub async fn run(mut self) {
        self.set_state(ConnectionState::Connecting);
        let mut sweep = interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    // A dropped stop handle counts as a stop signal.
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!("Stop signal received, closing broker session");
                        let _ = self.client.disconnect().await;
                        self.set_state(ConnectionState::Idle);
                        return;
                    }
                }
                _ = sweep.tick() => {
                    self.ingestor.alerts().sweep();
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            self.on_connack(ack.code).await;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.ingestor
                                .handle_message(&publish.topic, &publish.payload)
                                .await;
                        }
                        Ok(_) => {}
                        Err(ConnectionError::RequestsDone) => {
                            info!("Client handle dropped, shutting down session");
                            self.set_state(ConnectionState::Idle);
                            return;
                        }
                        Err(e) => {
                            self.on_transport_error(&e).await;
                            if !self.wait_backoff().await {
                                self.set_state(ConnectionState::Idle);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn on_connack(&mut self, code: ConnectReturnCode) {
        if code == ConnectReturnCode::Success {
            info!("Connected to broker");
            self.backoff.reset();
            self.set_state(ConnectionState::Connected);
            if let Err(e) = self.resubscribe().await {
                warn!("Failed to restore subscriptions: {}", e);
            }
        } else {
            error!("Broker rejected session: {:?}", code);
            self.set_state(ConnectionState::Error);
        }
    }

    /// Subscribe every registered device topic.
    ///
    /// Called after each successful handshake; with clean sessions the broker
    /// forgets subscriptions on disconnect. Re-issuing a subscribe for an
    /// already-subscribed topic overwrites the existing subscription
    /// broker-side, so repeated calls never duplicate delivery.
    async fn resubscribe(&mut self) -> Result<(), PipelineError> {
        let devices = self.registry.devices().await?;
        for device in &devices {
            self.client
                .subscribe(device.topic.as_str(), QoS::AtMostOnce)
                .await?;
            debug!(device = %device.device_id, topic = %device.topic, "Subscribed");
        }
        info!("Subscribed to {} device topics", devices.len());
        Ok(())
    }

    async fn on_transport_error(&mut self, err: &ConnectionError) {
        let next = match err {
            ConnectionError::ConnectionRefused(code) => {
                error!("Broker refused connection: {:?}", code);
                ConnectionState::Error
            }
            _ if self.state() == ConnectionState::Connected => {
                warn!("Transport closed: {}", err);
                ConnectionState::Reconnecting
            }
            _ => {
                warn!("Cannot reach broker: {}", err);
                ConnectionState::Offline
            }
        };
        self.set_state(next);

        self.ingestor
            .alerts()
            .offer(AnomalyNotice::new(
                BROKER_DEVICE,
                AnomalyKind::ConnectionLost,
                err.to_string(),
            ))
            .await;
    }

    /// Sleep out the current backoff delay. Returns `false` when the stop
    /// signal fired during the wait, so no further attempts are scheduled.
    async fn wait_backoff(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        info!("Reconnect attempt {} in {:?}", self.backoff.attempt(), delay);

        tokio::select! {
            _ = sleep(delay) => {
                if self.state() != ConnectionState::Error {
                    self.set_state(ConnectionState::Reconnecting);
                }
                true
            }
            changed = self.stop_rx.changed() => changed.is_ok() && !*self.stop_rx.borrow(),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state();
        if prev != next {
            info!("Connection state: {} -> {}", prev, next);
            let _ = self.state_tx.send(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_options_from_url() {
        let config = PipelineConfig::builder()
            .broker_url("mqtt://broker.example.com:8883")
            .build();

        let options = broker_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.example.com".to_string(), 8883));
    }

    #[test]
    fn test_broker_options_default_port() {
        let config = PipelineConfig::builder()
            .broker_url("tcp://localhost")
            .build();

        let options = broker_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_invalid_broker_url_rejected() {
        let config = PipelineConfig::builder().broker_url("not a url").build();
        assert!(broker_options(&config).is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
    }
}
