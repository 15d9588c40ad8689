//! Bounded per-device FIFO of recently ingested readings.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::model::CanonicalReading;

/// Fixed-capacity FIFO per device.
///
/// Insertion order equals arrival order; out-of-order delivery is NOT
/// re-sorted here. The merger sorts at read time so ingestion never blocks
/// or buffer-sorts on the hot path.
pub struct RingBuffer {
    capacity: usize,
    buffers: RwLock<HashMap<String, VecDeque<CanonicalReading>>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Append a reading; the oldest arrival is evicted once the device's
    /// buffer is full. This is the single point where the capacity invariant
    /// is enforced.
    pub fn append(&self, reading: CanonicalReading) {
        let mut buffers = self.buffers.write().unwrap();
        let buffer = buffers
            .entry(reading.device_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));

        buffer.push_back(reading);
        if buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// A copy of the device's current buffer, in arrival order.
    ///
    /// Returning a copy rather than a live reference avoids torn reads while
    /// the transport callback keeps appending.
    pub fn snapshot(&self, device_id: &str) -> Vec<CanonicalReading> {
        let buffers = self.buffers.read().unwrap();
        buffers
            .get(device_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of buffered readings for a device.
    pub fn len(&self, device_id: &str) -> usize {
        let buffers = self.buffers.read().unwrap();
        buffers.get(device_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, device_id: &str) -> bool {
        self.len(device_id) == 0
    }

    /// Drop a device's buffer entirely.
    pub fn forget(&self, device_id: &str) {
        self.buffers.write().unwrap().remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use chrono::Utc;

    fn reading(device: &str, value: f64) -> CanonicalReading {
        CanonicalReading {
            device_id: device.to_string(),
            metrics: [(Metric::Primary, value)].into_iter().collect(),
            timestamp: Utc::now(),
            raw: None,
        }
    }

    #[test]
    fn test_append_and_snapshot_preserve_arrival_order() {
        let buffer = RingBuffer::new(10);
        for v in 0..5 {
            buffer.append(reading("s1", v as f64));
        }

        let snap = buffer.snapshot("s1");
        let values: Vec<f64> = snap.iter().filter_map(|r| r.metric(Metric::Primary)).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_capacity_bound_keeps_most_recent() {
        let buffer = RingBuffer::new(3);
        for v in 0..10 {
            buffer.append(reading("s1", v as f64));
        }

        let snap = buffer.snapshot("s1");
        assert_eq!(snap.len(), 3);
        let values: Vec<f64> = snap.iter().filter_map(|r| r.metric(Metric::Primary)).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let buffer = RingBuffer::new(10);
        buffer.append(reading("s1", 1.0));

        let snap = buffer.snapshot("s1");
        buffer.append(reading("s1", 2.0));

        assert_eq!(snap.len(), 1);
        assert_eq!(buffer.len("s1"), 2);
    }

    #[test]
    fn test_unknown_device_snapshot_is_empty() {
        let buffer = RingBuffer::new(10);
        assert!(buffer.snapshot("nope").is_empty());
        assert!(buffer.is_empty("nope"));
    }

    #[test]
    fn test_forget_drops_buffer() {
        let buffer = RingBuffer::new(10);
        buffer.append(reading("s1", 1.0));
        buffer.forget("s1");
        assert!(buffer.is_empty("s1"));
    }
}
