use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::store::DurableStore;

/// Longest countdown accepted, in seconds (one week).
pub const MAX_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

/// Whole seconds from `now_ms` to `deadline_ms`, rounded to nearest. `None`
/// when the deadline is so far off it cannot be a real section deadline.
pub fn seconds_left(deadline_ms: i64, now_ms: i64) -> Option<i64> {
    let remaining = (deadline_ms.checked_sub(now_ms)? as f64 / 1000.0).round() as i64;
    (remaining <= MAX_DURATION_SECS).then_some(remaining)
}

/// Deadline for a countdown of `duration_secs` starting at `now_ms`.
pub fn deadline_after(now_ms: i64, duration_secs: i64) -> Option<i64> {
    if duration_secs > MAX_DURATION_SECS {
        return None;
    }
    duration_secs.checked_mul(1000).and_then(|ms| now_ms.checked_add(ms))
}

/// Durable deadlines, one per key, stored as epoch milliseconds.
#[derive(Clone)]
pub struct DeadlineStore {
    store: Arc<dyn DurableStore>,
}

impl DeadlineStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// A record that doesn't parse is reported as absent so the next
    /// initialize overwrites it.
    pub fn load(&self, key: &str) -> Result<Option<i64>> {
        let Some(raw) = self
            .store
            .get(key)
            .with_context(|| format!("Failed to read deadline for {}", key))?
        else {
            return Ok(None);
        };

        match raw.trim().parse::<i64>() {
            Ok(deadline) => Ok(Some(deadline)),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "Ignoring unparseable deadline record");
                Ok(None)
            }
        }
    }

    pub fn save(&self, key: &str, deadline_ms: i64) -> Result<()> {
        self.store
            .set(key, &deadline_ms.to_string())
            .with_context(|| format!("Failed to persist deadline for {}", key))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store
            .remove(key)
            .with_context(|| format!("Failed to remove deadline for {}", key))
    }

    /// Every deadline under `prefix`, sorted by key.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(prefix)? {
            if let Some(deadline) = self.load(&key)? {
                out.push((key, deadline));
            }
        }
        Ok(out)
    }
}
