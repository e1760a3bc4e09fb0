use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Warning shown when the user tries to leave while a section is timed.
pub const LEAVE_WARNING: &str =
    "A timed section is still running. Leaving will not pause the clock. Leave anyway?";

/// The "are you sure you want to leave?" hook. Running timers register
/// themselves; the front end asks `confirmation()` before quitting.
#[derive(Clone, Default)]
pub struct UnloadRegistry {
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl UnloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str) {
        if let Ok(mut active) = self.active.lock() {
            if active.insert(key.to_string()) {
                debug!(key, "Unload warning armed");
            }
        }
    }

    pub fn deregister(&self, key: &str) {
        if let Ok(mut active) = self.active.lock() {
            if active.remove(key) {
                debug!(key, "Unload warning disarmed");
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.active.lock().map(|a| !a.is_empty()).unwrap_or(false)
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.active
            .lock()
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The warning to show before leaving, if any timer is running.
    pub fn confirmation(&self) -> Option<&'static str> {
        self.is_armed().then_some(LEAVE_WARNING)
    }
}
