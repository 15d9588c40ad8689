//! Deduplicating alert sink in front of the alert-persistence collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collab::AlertStore;
use crate::model::{AnomalyKind, AnomalyNotice};

/// Forwards anomaly notices to the alert store, suppressing repeats of the
/// same `(device_id, kind)` within a cooldown window.
///
/// The dedup map is small (device count x anomaly kinds) and writes are
/// infrequent relative to ingestion, so a single lock guards it.
pub struct AlertSink {
    cooldown: Duration,
    sweep_horizon: Duration,
    store: Arc<dyn AlertStore>,
    last_emitted: Mutex<HashMap<(String, AnomalyKind), Instant>>,
}

impl AlertSink {
    pub fn new(cooldown: Duration, sweep_horizon: Duration, store: Arc<dyn AlertStore>) -> Self {
        Self {
            cooldown,
            sweep_horizon,
            store,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Offer a notice for forwarding.
    ///
    /// Returns `true` when the notice was forwarded to the alert store,
    /// `false` when it was suppressed as a duplicate. A store failure is
    /// logged and does not block ingestion; the notice still counts as
    /// forwarded so a broken store is not hammered every message.
    pub async fn offer(&self, notice: AnomalyNotice) -> bool {
        self.offer_at(notice, Instant::now()).await
    }

    /// Offer against an explicit clock.
    pub async fn offer_at(&self, notice: AnomalyNotice, now: Instant) -> bool {
        // Decide and stamp under the lock; the await happens after release.
        {
            let mut last = self.last_emitted.lock().unwrap();
            if let Some(prev) = last.get(&notice.dedup_key()) {
                if now.duration_since(*prev) < self.cooldown {
                    debug!(
                        device = %notice.device_id,
                        kind = %notice.kind,
                        "Alert suppressed within cooldown"
                    );
                    return false;
                }
            }
            last.insert(notice.dedup_key(), now);
        }

        if let Err(e) = self.store.persist_alert(&notice).await {
            warn!(
                device = %notice.device_id,
                kind = %notice.kind,
                "Failed to persist alert: {}",
                e
            );
        }
        true
    }

    /// Evict dedup entries older than the cleanup horizon. Called
    /// periodically to bound memory for fleets with churn.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    /// Sweep against an explicit clock.
    pub fn sweep_at(&self, now: Instant) {
        let mut last = self.last_emitted.lock().unwrap();
        let before = last.len();
        last.retain(|_, emitted| now.duration_since(*emitted) < self.sweep_horizon);
        let evicted = before - last.len();
        if evicted > 0 {
            debug!("Swept {} stale alert dedup entries", evicted);
        }
    }

    /// Number of tracked dedup entries (for monitoring).
    pub fn tracked(&self) -> usize {
        self.last_emitted.lock().unwrap().len()
    }
}
