//! Anomaly notices raised by the validator and the connection manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an anomaly, used as half of the alert dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A metric value outside its configured physical bounds.
    OutOfRange,
    /// A message whose topic or payload could not be interpreted.
    MalformedPayload,
    /// The broker session dropped or could not be established.
    ConnectionLost,
}

impl AnomalyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::OutOfRange => "out_of_range",
            AnomalyKind::MalformedPayload => "malformed_payload",
            AnomalyKind::ConnectionLost => "connection_lost",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single anomaly observation for one device.
///
/// These are domain signals, not errors: producing one never interrupts
/// ingestion of subsequent messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyNotice {
    pub device_id: String,
    pub kind: AnomalyKind,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

impl AnomalyNotice {
    pub fn new(device_id: impl Into<String>, kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            detail: detail.into(),
            occurred_at: Utc::now(),
        }
    }

    /// The dedup key used by the alert sink.
    pub fn dedup_key(&self) -> (String, AnomalyKind) {
        (self.device_id.clone(), self.kind)
    }
}
