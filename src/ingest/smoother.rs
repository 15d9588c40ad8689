//! Per-device moving-average smoothing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::model::{CanonicalReading, Metric};

/// Current moving averages for one device, by metric.
///
/// Metrics that have never carried a numeric value are absent from the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothedSnapshot {
    pub averages: HashMap<Metric, f64>,
}

impl SmoothedSnapshot {
    pub fn average(&self, metric: Metric) -> Option<f64> {
        self.averages.get(&metric).copied()
    }
}

/// Stateful moving-average filter keyed by device and metric.
///
/// Windows are bounded at the configured length; appending beyond it evicts
/// the oldest value. A reading missing a metric leaves that metric's window
/// untouched, so the previous average survives gaps in the stream.
pub struct Smoother {
    window: usize,
    buffers: Mutex<HashMap<String, HashMap<Metric, VecDeque<f64>>>>,
}

impl Smoother {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Fold a reading into the device's windows and return the resulting
    /// snapshot.
    pub fn append(&self, reading: &CanonicalReading) -> SmoothedSnapshot {
        let mut buffers = self.buffers.lock().unwrap();
        let device = buffers.entry(reading.device_id.clone()).or_default();

        for metric in Metric::ALL {
            let Some(value) = reading.metric(metric) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let window = device.entry(metric).or_default();
            window.push_back(value);
            if window.len() > self.window {
                window.pop_front();
            }
        }

        snapshot_of(device)
    }

    /// Current averages for a device. Non-destructive; safe to call at any
    /// time independent of ingestion.
    pub fn snapshot(&self, device_id: &str) -> SmoothedSnapshot {
        let buffers = self.buffers.lock().unwrap();
        buffers.get(device_id).map(snapshot_of).unwrap_or_default()
    }

    /// Clear all windows for a removed device.
    pub fn forget(&self, device_id: &str) {
        self.buffers.lock().unwrap().remove(device_id);
    }
}

fn snapshot_of(device: &HashMap<Metric, VecDeque<f64>>) -> SmoothedSnapshot {
    let mut averages = HashMap::new();
    for (metric, window) in device {
        if !window.is_empty() {
            let sum: f64 = window.iter().sum();
            averages.insert(*metric, sum / window.len() as f64);
        }
    }
    SmoothedSnapshot { averages }
}
