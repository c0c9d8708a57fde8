use crate::events::{SuppressionKey, Timestamp};
use chrono::Utc;
use std::collections::HashMap;

/// Flap suppressor for dependencies that bounce between health states
///
/// Tracks, per suppression key, when an alert was last dispatched and
/// answers whether a new alert for that key still falls inside the cooldown
/// window. Keys are tracked independently; re-recording resets the cooldown
/// clock from the new timestamp.
#[derive(Debug, Default)]
pub struct FlapSuppressor {
    last_alert: HashMap<SuppressionKey, Timestamp>,
}

impl FlapSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an alert for `key` falls inside the cooldown window
    ///
    /// Always false when `cooldown_ms <= 0` (suppression disabled) or when
    /// no alert has been recorded for `key` yet.
    pub fn is_suppressed(&self, key: SuppressionKey, cooldown_ms: i64) -> bool {
        if cooldown_ms <= 0 {
            return false;
        }

        match self.last_alert.get(&key) {
            Some(last) => {
                let elapsed_ms = (Utc::now() - *last).num_milliseconds();
                elapsed_ms < cooldown_ms
            }
            None => false,
        }
    }

    /// Record that an alert for `key` was dispatched now
    pub fn record_alert(&mut self, key: SuppressionKey) {
        self.record_alert_at(key, Utc::now());
    }

    /// Record an alert at a specific time
    ///
    /// This is primarily used for testing with controlled timestamps.
    pub fn record_alert_at(&mut self, key: SuppressionKey, timestamp: Timestamp) {
        self.last_alert.insert(key, timestamp);
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.last_alert.len()
    }

    /// Wipe all tracked keys (used at shutdown/reset)
    pub fn clear(&mut self) {
        self.last_alert.clear();
    }
}
