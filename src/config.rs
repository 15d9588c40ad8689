//! Pipeline configuration with tunable thresholds.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::Metric;

/// Inclusive physical bounds for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricBound {
    pub min: f64,
    pub max: f64,
}

impl MetricBound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check whether a value lies inside the bound.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Static configuration supplied to the pipeline at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Broker address, e.g. `mqtt://broker.hivemq.com:1883`.
    pub broker_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix for the generated client id (default: "fleet-")
    pub client_id_prefix: String,
    /// Start each session without stale broker-side state (default: true)
    pub clean_session: bool,
    /// MQTT keep-alive interval in seconds (default: 30)
    pub keep_alive_secs: u64,
    /// Minimum gap between accepted messages per device (default: 200 ms,
    /// i.e. at most 5 accepted messages per second per device)
    pub min_accept_interval_ms: u64,
    /// Moving-average window length per device+metric (default: 5)
    pub smoothing_window: usize,
    /// Per-device realtime buffer capacity (default: 500)
    pub ring_buffer_capacity: usize,
    /// Minimum gap between two forwarded alerts of the same device+kind
    /// (default: 30 minutes)
    pub alert_cooldown_ms: u64,
    /// Dedup entries older than this are evicted by the sweep (default: 1 hour)
    pub alert_sweep_horizon_ms: u64,
    /// Maximum entries returned by a merged history view (default: 500)
    pub merge_limit: usize,
    /// Physical bounds per metric; metrics without a bound are never flagged.
    pub metric_bounds: HashMap<Metric, MetricBound>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://broker.hivemq.com:1883".to_string(),
            username: None,
            password: None,
            client_id_prefix: "fleet-".to_string(),
            clean_session: true,
            keep_alive_secs: 30,
            min_accept_interval_ms: 200,
            smoothing_window: 5,
            ring_buffer_capacity: 500,
            alert_cooldown_ms: 30 * 60 * 1000,
            alert_sweep_horizon_ms: 60 * 60 * 1000,
            merge_limit: 500,
            metric_bounds: default_bounds(),
        }
    }
}

/// Bounds matching the reference fleet's sensors: wide safety margins meant to
/// catch implausible values, not to enforce comfort ranges.
pub fn default_bounds() -> HashMap<Metric, MetricBound> {
    let mut bounds = HashMap::new();
    bounds.insert(Metric::Primary, MetricBound::new(0.0, 2000.0));
    bounds.insert(Metric::Temperature, MetricBound::new(-50.0, 85.0));
    bounds.insert(Metric::Humidity, MetricBound::new(0.0, 100.0));
    bounds.insert(Metric::Battery, MetricBound::new(0.0, 100.0));
    bounds
}

impl PipelineConfig {
    /// Create a new config builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Generate a unique client id from the configured prefix.
    pub fn generate_client_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        format!("{}{:x}-{:x}", self.client_id_prefix, std::process::id(), nanos)
    }
}

/// Builder pattern for PipelineConfig.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the broker address.
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    /// Set broker credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Set the client id prefix.
    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.client_id_prefix = prefix.into();
        self
    }

    /// Set the per-device throttle interval in milliseconds.
    pub fn min_accept_interval_ms(mut self, interval: u64) -> Self {
        self.config.min_accept_interval_ms = interval;
        self
    }

    /// Set the moving-average window length.
    pub fn smoothing_window(mut self, window: usize) -> Self {
        self.config.smoothing_window = window;
        self
    }

    /// Set the per-device realtime buffer capacity.
    pub fn ring_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_buffer_capacity = capacity;
        self
    }

    /// Set the alert cooldown in milliseconds.
    pub fn alert_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.config.alert_cooldown_ms = cooldown;
        self
    }

    /// Set the merged-view entry limit.
    pub fn merge_limit(mut self, limit: usize) -> Self {
        self.config.merge_limit = limit;
        self
    }

    /// Replace or add a single metric bound.
    pub fn metric_bound(mut self, metric: Metric, min: f64, max: f64) -> Self {
        self.config.metric_bounds.insert(metric, MetricBound::new(min, max));
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_accept_interval_ms, 200);
        assert_eq!(config.smoothing_window, 5);
        assert_eq!(config.ring_buffer_capacity, 500);
        assert_eq!(config.alert_cooldown_ms, 30 * 60 * 1000);
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .broker_url("mqtt://localhost:1883")
            .min_accept_interval_ms(50)
            .metric_bound(Metric::Primary, 0.0, 100.0)
            .build();

        assert_eq!(config.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.min_accept_interval_ms, 50);
        assert_eq!(
            config.metric_bounds[&Metric::Primary],
            MetricBound::new(0.0, 100.0)
        );
    }

    #[test]
    fn test_default_bounds_cover_all_metrics() {
        let bounds = default_bounds();
        for metric in Metric::ALL {
            assert!(bounds.contains_key(&metric));
        }
    }

    #[test]
    fn test_bound_contains_is_inclusive() {
        let bound = MetricBound::new(0.0, 100.0);
        assert!(bound.contains(0.0));
        assert!(bound.contains(100.0));
        assert!(!bound.contains(-0.1));
        assert!(!bound.contains(100.1));
    }

    #[test]
    fn test_client_ids_are_prefixed() {
        let config = PipelineConfig::default();
        assert!(config.generate_client_id().starts_with("fleet-"));
    }
}
