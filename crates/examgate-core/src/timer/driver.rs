use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use super::countdown::{PersistentTimer, TimerSnapshot, TimerState};

/// Interval between countdown ticks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A running countdown owned by whoever holds this handle.
///
/// Dropping the handle stops the ticking and forgets the in-memory countdown;
/// the durable deadline stays, so attaching again later resumes correctly.
pub struct CountdownHandle {
    timer: Arc<Mutex<PersistentTimer>>,
    snapshots: Arc<watch::Sender<TimerSnapshot>>,
    task: Option<JoinHandle<()>>,
}

impl CountdownHandle {
    /// Start ticking an initialized timer once per second. A timer that is
    /// not running gets a handle but no task.
    pub fn spawn(timer: PersistentTimer) -> Self {
        let running = timer.state() == TimerState::Running;
        let snapshots = Arc::new(watch::Sender::new(timer.snapshot()));
        let timer = Arc::new(Mutex::new(timer));

        let task = running.then(|| {
            let timer = timer.clone();
            let snapshots = snapshots.clone();
            tokio::spawn(async move {
                let mut interval = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
                loop {
                    interval.tick().await;
                    // on_expire runs inside this lock; it must not call back into the handle.
                    let snapshot = match timer.lock() {
                        Ok(mut timer) => {
                            timer.tick();
                            timer.snapshot()
                        }
                        Err(_) => {
                            warn!("Countdown lock poisoned, stopping");
                            break;
                        }
                    };
                    let running = snapshot.state == TimerState::Running;
                    snapshots.send_replace(snapshot);
                    if !running {
                        debug!("Countdown finished");
                        break;
                    }
                }
            })
        });

        Self {
            timer,
            snapshots,
            task,
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn formatted_remaining(&self) -> String {
        self.snapshots.borrow().formatted.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    /// Stop ticking and delete the deadline. Used for early submission.
    pub fn clear(&mut self) -> Result<()> {
        self.stop();
        let mut timer = self
            .timer
            .lock()
            .map_err(|_| anyhow!("Countdown lock poisoned"))?;
        let result = match timer.key().map(str::to_string) {
            Some(key) => timer.clear(&key),
            None => Ok(()),
        };
        self.snapshots.send_replace(timer.snapshot());
        result
    }

    /// Stop ticking but leave the deadline in place.
    pub fn detach(mut self) {
        self.release();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn release(&mut self) {
        self.stop();
        if let Ok(mut timer) = self.timer.lock() {
            timer.detach();
        }
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tests
// ============================================================================
