//! Topic/payload normalization into the canonical reading shape.
//!
//! Field lookups go through the ordered alias tables on [`Metric`] rather
//! than inline fallback chains, so a new upstream firmware format is a table
//! edit here and nowhere else.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::reading::{resolve_timestamp, DEVICE_ID_ALIASES};
use crate::model::{CanonicalReading, Metric, UNKNOWN_DEVICE};

/// First topic segment selecting the current parsing rule: `iot/{device}/...`.
pub const NAMESPACE: &str = "iot";

/// First topic segment of the legacy firmware: `sensors/{suffix}[/{device}]`.
pub const LEGACY_NAMESPACE: &str = "sensors";

/// Structure derived purely from a topic string's path segments.
///
/// Recomputed per message, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub raw: String,
    pub suffix: String,
    pub device_id: Option<String>,
}

/// Split a topic into its descriptor.
///
/// Rules, in priority order:
/// 1. `iot/{device}/{suffix...}` when the topic has at least 3 segments.
/// 2. `sensors/{suffix}` or `sensors/{suffix}/{device}`.
/// 3. Anything else: the whole topic is the suffix and the device id, if any,
///    must come from the payload.
pub fn describe_topic(topic: &str) -> TopicDescriptor {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts[0] == NAMESPACE && parts.len() >= 3 {
        return TopicDescriptor {
            raw: topic.to_string(),
            suffix: parts[2..].join("/"),
            device_id: Some(parts[1].to_string()),
        };
    }

    if parts[0] == LEGACY_NAMESPACE {
        return TopicDescriptor {
            raw: topic.to_string(),
            // A bare `sensors` topic has no suffix segment.
            suffix: parts.get(1).copied().unwrap_or_default().to_string(),
            device_id: parts.get(2).map(|s| s.to_string()),
        };
    }

    TopicDescriptor {
        raw: topic.to_string(),
        suffix: topic.to_string(),
        device_id: None,
    }
}

/// Convert a transport topic and raw payload into a canonical reading,
/// stamping the arrival time for payloads that carry no timestamp.
///
/// Returns `None` only when the payload cannot be interpreted as an object or
/// scalar at all; callers must treat that as a single dropped message, not a
/// fatal error.
pub fn parse(topic: &str, payload: &[u8]) -> Option<CanonicalReading> {
    parse_at(topic, payload, Utc::now())
}

/// [`parse`] against an explicit arrival time.
///
/// Pure: a fixed `(topic, payload, now)` triple always yields an equal
/// result.
pub fn parse_at(topic: &str, payload: &[u8], now: DateTime<Utc>) -> Option<CanonicalReading> {
    let descriptor = describe_topic(topic);
    let text = std::str::from_utf8(payload).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => Some(from_object(&descriptor, fields, now)),
        Ok(Value::Number(n)) => n.as_f64().map(|v| scalar_reading(&descriptor, v, now)),
        Ok(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| scalar_reading(&descriptor, v, now)),
        // Arrays, booleans and nulls carry no usable sample.
        Ok(_) => None,
        // Not JSON: the whole payload may still be a bare scalar value.
        Err(_) => trimmed
            .parse::<f64>()
            .ok()
            .map(|v| scalar_reading(&descriptor, v, now)),
    }
}

fn from_object(
    descriptor: &TopicDescriptor,
    fields: Map<String, Value>,
    now: DateTime<Utc>,
) -> CanonicalReading {
    let device_id = descriptor
        .device_id
        .clone()
        .or_else(|| lookup_device_id(&fields))
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

    let mut metrics = std::collections::HashMap::new();
    for metric in Metric::ALL {
        if let Some(value) = lookup_metric(&fields, metric) {
            metrics.insert(metric, value);
        }
    }

    let timestamp = resolve_timestamp(fields.get("timestamp"), now);

    CanonicalReading {
        device_id,
        metrics,
        timestamp,
        raw: Some(Value::Object(fields)),
    }
}

fn scalar_reading(descriptor: &TopicDescriptor, value: f64, now: DateTime<Utc>) -> CanonicalReading {
    let mut metrics = std::collections::HashMap::new();
    metrics.insert(Metric::Primary, value);

    CanonicalReading {
        device_id: descriptor
            .device_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
        metrics,
        timestamp: now,
        raw: Some(Value::from(value)),
    }
}

fn lookup_device_id(fields: &Map<String, Value>) -> Option<String> {
    for alias in DEVICE_ID_ALIASES {
        match fields.get(*alias) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn lookup_metric(fields: &Map<String, Value>, metric: Metric) -> Option<f64> {
    for alias in metric.aliases() {
        match fields.get(*alias) {
            Some(Value::Number(n)) => return n.as_f64(),
            // Firmware occasionally quotes numeric fields.
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<f64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}
