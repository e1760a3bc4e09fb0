use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::deadline::{deadline_after, seconds_left, DeadlineStore, MAX_DURATION_SECS};
use super::unload::UnloadRegistry;
use crate::clock::Clock;
use crate::store::DurableStore;
use crate::utils::format_remaining;

/// Called once when a countdown reaches zero.
pub type ExpireCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum TimerState {
    Idle,
    Running,
    Expired,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TimerSnapshot {
    pub key: Option<String>,
    pub state: TimerState,
    pub remaining: i64,
    pub formatted: String,
}

/// A countdown anchored to a durable deadline.
///
/// The deadline is written once, on the first start for a key. Every later
/// `initialize` with the same key recomputes the remaining time from the
/// wall clock, so restarting the client never gives time back.
pub struct PersistentTimer {
    deadlines: DeadlineStore,
    clock: Arc<dyn Clock>,
    unload: UnloadRegistry,
    key: Option<String>,
    state: TimerState,
    remaining: i64,
    on_expire: Option<ExpireCallback>,
}

impl PersistentTimer {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, unload: UnloadRegistry) -> Self {
        Self {
            deadlines: DeadlineStore::new(store),
            clock,
            unload,
            key: None,
            state: TimerState::Idle,
            remaining: 0,
            on_expire: None,
        }
    }

    /// Attach to the deadline under `key`, creating it from `duration_secs`
    /// if there is none. A deadline already in the past expires at once and
    /// `on_expire` runs before this returns.
    pub fn initialize(
        &mut self,
        duration_secs: i64,
        key: &str,
        on_expire: impl FnOnce() + Send + 'static,
    ) -> Result<TimerState> {
        if duration_secs > MAX_DURATION_SECS {
            bail!(
                "Countdown of {}s for {} exceeds the {}s limit",
                duration_secs,
                key,
                MAX_DURATION_SECS
            );
        }
        self.detach();

        let now = self.clock.now_ms();
        let stored = match self.deadlines.load(key)? {
            Some(deadline) => match seconds_left(deadline, now) {
                Some(remaining) => Some((deadline, remaining)),
                None => {
                    warn!(key, deadline, "Ignoring out-of-range deadline record");
                    None
                }
            },
            None => None,
        };

        let remaining = match stored {
            Some((deadline, remaining)) => {
                debug!(key, deadline, remaining, "Resuming from stored deadline");
                remaining
            }
            None if duration_secs > 0 => {
                let deadline = deadline_after(now, duration_secs)
                    .ok_or_else(|| anyhow!("Deadline for {} is out of range", key))?;
                // Must be durable before we report Running.
                self.deadlines.save(key, deadline)?;
                debug!(key, deadline, duration_secs, "Stored new deadline");
                duration_secs
            }
            None => 0,
        };

        self.key = Some(key.to_string());
        self.on_expire = Some(Box::new(on_expire));
        self.remaining = remaining;

        if remaining > 0 {
            self.state = TimerState::Running;
            self.unload.register(key);
        } else {
            info!(key, "Deadline already passed");
            self.expire();
        }
        Ok(self.state)
    }

    /// One second has passed. No-op unless running.
    pub fn tick(&mut self) -> TimerState {
        if self.state != TimerState::Running {
            return self.state;
        }
        self.remaining -= 1;
        if self.remaining <= 0 {
            self.expire();
        }
        self.state
    }

    /// Stop for good and delete the deadline under `key`. Used when a section
    /// is submitted early.
    pub fn clear(&mut self, key: &str) -> Result<()> {
        if let Some(own) = self.key.take() {
            self.unload.deregister(&own);
        }
        self.state = TimerState::Cleared;
        self.remaining = 0;
        self.on_expire = None;
        debug!(key, "Timer cleared");
        self.deadlines.remove(key)
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn formatted_remaining(&self) -> String {
        format_remaining(self.remaining)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            key: self.key.clone(),
            state: self.state,
            remaining: self.remaining,
            formatted: self.formatted_remaining(),
        }
    }

    /// Drop the in-memory countdown, leaving its deadline in the store.
    pub fn detach(&mut self) {
        if let Some(key) = self.key.take() {
            self.unload.deregister(&key);
            debug!(key = %key, "Timer detached");
        }
        self.on_expire = None;
        if self.state == TimerState::Running {
            self.state = TimerState::Idle;
        }
    }

    fn expire(&mut self) {
        self.state = TimerState::Expired;
        self.remaining = 0;
        if let Some(ref key) = self.key {
            self.unload.deregister(key);
            if let Err(e) = self.deadlines.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove expired deadline");
            }
            info!(key = %key, "Timer expired");
        }
        if let Some(callback) = self.on_expire.take() {
            callback();
        }
    }
}

impl Drop for PersistentTimer {
    fn drop(&mut self) {
        if let Some(ref key) = self.key {
            self.unload.deregister(key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
