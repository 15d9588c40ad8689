//! Read-time merging of persisted history with the realtime buffer.

use crate::model::CanonicalReading;

/// Combine historical rows with a realtime snapshot into one time-ordered,
/// bounded view.
///
/// `historical` is expected ascending by timestamp (the storage collaborator's
/// contract); `live` is in arrival order. The sort is stable so ties keep
/// arrival order, which makes repeated merges of the same inputs
/// deterministic. The result is truncated to the most recent `limit` entries.
pub fn merge(
    historical: Vec<CanonicalReading>,
    live: Vec<CanonicalReading>,
    limit: usize,
) -> Vec<CanonicalReading> {
    let mut combined = historical;
    combined.extend(live);

    // Stable sort: arrival order wins on equal timestamps.
    combined.sort_by_key(|r| r.timestamp);

    if combined.len() > limit {
        combined.split_off(combined.len() - limit)
    } else {
        combined
    }
}
