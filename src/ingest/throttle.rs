//! Per-device rate limiting for the ingestion hot path.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Gate limiting how often a device's messages are accepted for processing.
///
/// This is a load-shedding mechanism, not a correctness guard: rejected
/// messages are dropped silently, with no anomaly raised.
pub struct Throttle {
    min_interval: Duration,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Accept or reject a message for `device_id` arriving now.
    ///
    /// Devices not seen before are always accepted.
    pub fn accept(&self, device_id: &str) -> bool {
        self.accept_at(device_id, Instant::now())
    }

    /// Accept or reject against an explicit clock. The read-compare-write on
    /// the per-device entry happens under one lock so concurrent callers for
    /// the same device cannot both pass the gate.
    pub fn accept_at(&self, device_id: &str, now: Instant) -> bool {
        let mut last = self.last_accepted.lock().unwrap();
        match last.get(device_id) {
            Some(prev) if now.duration_since(*prev) < self.min_interval => false,
            _ => {
                last.insert(device_id.to_string(), now);
                true
            }
        }
    }

    /// Drop throttle state for a removed device.
    pub fn forget(&self, device_id: &str) {
        self.last_accepted.lock().unwrap().remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_always_accepted() {
        let throttle = Throttle::new(Duration::from_millis(200));
        assert!(throttle.accept_at("s1", Instant::now()));
    }

    #[test]
    fn test_gap_measured_from_last_accepted() {
        let throttle = Throttle::new(Duration::from_millis(200));
        let t0 = Instant::now();

        // t0 accepted, t0+100 rejected, t0+150 rejected (still < 200 from t0),
        // t0+200 accepted, t0+350 rejected, t0+400 accepted.
        let calls = [
            (0u64, true),
            (100, false),
            (150, false),
            (200, true),
            (350, false),
            (400, true),
        ];
        for (offset_ms, expected) in calls {
            let accepted = throttle.accept_at("s1", t0 + Duration::from_millis(offset_ms));
            assert_eq!(accepted, expected, "at t0+{}ms", offset_ms);
        }
    }

    #[test]
    fn test_devices_do_not_interfere() {
        let throttle = Throttle::new(Duration::from_millis(200));
        let t0 = Instant::now();

        assert!(throttle.accept_at("s1", t0));
        assert!(throttle.accept_at("s2", t0));
        assert!(!throttle.accept_at("s1", t0 + Duration::from_millis(50)));
        assert!(!throttle.accept_at("s2", t0 + Duration::from_millis(50)));
    }

    #[test]
    fn test_forget_resets_device() {
        let throttle = Throttle::new(Duration::from_millis(200));
        let t0 = Instant::now();

        assert!(throttle.accept_at("s1", t0));
        throttle.forget("s1");
        assert!(throttle.accept_at("s1", t0 + Duration::from_millis(1)));
    }
}
