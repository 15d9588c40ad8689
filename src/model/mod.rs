pub mod anomaly;
pub mod reading;

pub use anomaly::{AnomalyKind, AnomalyNotice};
pub use reading::{CanonicalReading, Metric, DEVICE_ID_ALIASES, UNKNOWN_DEVICE};
