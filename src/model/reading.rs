//! Canonical reading shape shared by every pipeline stage.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload field names that may carry the device identifier, checked in order.
pub const DEVICE_ID_ALIASES: &[&str] = &["id", "device_id", "deviceId"];

/// The fixed set of metrics a device sample can carry.
///
/// Upstream firmwares name these fields inconsistently; each variant owns an
/// ordered alias table so supporting a new firmware is a table edit, not a
/// code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// The device's main sensor value (ammonia concentration for the
    /// reference fleet, but any single primary channel).
    Primary,
    Temperature,
    Humidity,
    Battery,
}

impl Metric {
    /// All metrics, in canonical order.
    pub const ALL: [Metric; 4] = [
        Metric::Primary,
        Metric::Temperature,
        Metric::Humidity,
        Metric::Battery,
    ];

    /// Payload field names accepted for this metric, highest priority first.
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Metric::Primary => &["ammonia", "nh3", "NH3", "value"],
            Metric::Temperature => &["temperature", "temp", "t"],
            Metric::Humidity => &["humidity", "hum", "h"],
            Metric::Battery => &["battery", "battery_level", "batteryLevel"],
        }
    }

    /// Canonical name used in logs and anomaly details.
    pub const fn as_str(self) -> &'static str {
        match self {
            Metric::Primary => "primary",
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Battery => "battery",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel device id for messages whose device could not be resolved from
/// either the topic or the payload. Callers must treat it as unroutable.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// One normalized device sample, independent of source topic/payload shape.
///
/// Constructed once per inbound message and never mutated afterwards; the
/// smoother produces derived averages separately rather than editing this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReading {
    /// Never empty; falls back to [`UNKNOWN_DEVICE`].
    pub device_id: String,
    /// Only metrics actually present in the payload appear here.
    pub metrics: HashMap<Metric, f64>,
    pub timestamp: DateTime<Utc>,
    /// The payload as received, kept for debugging and downstream consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl CanonicalReading {
    /// Get a metric value, if the payload carried it.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }
}

/// Resolve a payload timestamp field to an instant.
///
/// Accepts RFC 3339 strings and epoch numbers (milliseconds when the value is
/// implausibly large for seconds). Anything else falls back to `now`.
pub fn resolve_timestamp(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now),
        Some(Value::Number(n)) => {
            let Some(epoch) = n.as_f64() else { return now };
            let millis = if epoch > 1e12 { epoch } else { epoch * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single().unwrap_or(now)
        }
        _ => now,
    }
}
