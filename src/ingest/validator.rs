//! Physical-bounds validation of canonical readings.

use std::collections::HashMap;

use crate::config::MetricBound;
use crate::model::{AnomalyKind, AnomalyNotice, CanonicalReading, Metric};

/// Checks metric values against configured physical bounds.
///
/// The goal is to catch implausible sensor values, not missing data: metrics
/// absent from a reading, or metrics with no configured bound, are silently
/// skipped.
pub struct RangeValidator {
    bounds: HashMap<Metric, MetricBound>,
}

impl RangeValidator {
    pub fn new(bounds: HashMap<Metric, MetricBound>) -> Self {
        Self { bounds }
    }

    /// Produce one `OutOfRange` notice per bounded metric whose value falls
    /// outside its bound. Pure: no state is read or written.
    pub fn check(&self, reading: &CanonicalReading) -> Vec<AnomalyNotice> {
        let mut notices = Vec::new();

        for metric in Metric::ALL {
            let Some(value) = reading.metric(metric) else {
                continue;
            };
            let Some(bound) = self.bounds.get(&metric) else {
                continue;
            };
            if !bound.contains(value) {
                notices.push(AnomalyNotice::new(
                    reading.device_id.clone(),
                    AnomalyKind::OutOfRange,
                    format!(
                        "{} out of range: {} (allowed {}..={})",
                        metric, value, bound.min, bound.max
                    ),
                ));
            }
        }

        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_bounds;
    use chrono::Utc;

    fn reading(metrics: &[(Metric, f64)]) -> CanonicalReading {
        CanonicalReading {
            device_id: "s1".to_string(),
            metrics: metrics.iter().copied().collect(),
            timestamp: Utc::now(),
            raw: None,
        }
    }

    #[test]
    fn test_out_of_range_names_metric_and_value() {
        let validator = RangeValidator::new(default_bounds());
        let notices = validator.check(&reading(&[(Metric::Primary, 5000.0)]));

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, AnomalyKind::OutOfRange);
        assert!(notices[0].detail.contains("primary"));
        assert!(notices[0].detail.contains("5000"));
    }

    #[test]
    fn test_in_range_values_pass() {
        let validator = RangeValidator::new(default_bounds());
        let notices = validator.check(&reading(&[
            (Metric::Primary, 12.5),
            (Metric::Temperature, 28.0),
            (Metric::Humidity, 55.0),
        ]));

        assert!(notices.is_empty());
    }

    #[test]
    fn test_bound_edges_are_inclusive() {
        let validator = RangeValidator::new(default_bounds());
        assert!(validator.check(&reading(&[(Metric::Humidity, 100.0)])).is_empty());
        assert!(validator.check(&reading(&[(Metric::Humidity, 0.0)])).is_empty());
    }

    #[test]
    fn test_absent_metrics_are_skipped() {
        let validator = RangeValidator::new(default_bounds());
        assert!(validator.check(&reading(&[])).is_empty());
    }

    #[test]
    fn test_unbounded_metric_is_skipped() {
        let validator = RangeValidator::new(HashMap::new());
        assert!(validator
            .check(&reading(&[(Metric::Primary, 1e9)]))
            .is_empty());
    }

    #[test]
    fn test_multiple_anomalies_in_one_reading() {
        let validator = RangeValidator::new(default_bounds());
        let notices = validator.check(&reading(&[
            (Metric::Primary, 5000.0),
            (Metric::Temperature, 200.0),
        ]));

        assert_eq!(notices.len(), 2);
    }
}
