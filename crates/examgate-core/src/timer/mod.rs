//! Persistent countdown timers for timed exam sections.
//!
//! Two things are kept apart:
//! - the durable deadline (`DeadlineStore`), an absolute instant that
//!   survives restarts
//! - the in-memory countdown (`PersistentTimer`, driven by `CountdownHandle`),
//!   which lives only as long as the screen showing it
//!
//! Re-attaching to a key always recomputes the remaining time from the
//! stored deadline, so closing and reopening the client cannot pause a
//! section.

pub mod countdown;
pub mod deadline;
pub mod driver;
pub mod unload;

pub use countdown::{ExpireCallback, PersistentTimer, TimerSnapshot, TimerState};
pub use deadline::{seconds_left, DeadlineStore, MAX_DURATION_SECS};
pub use driver::CountdownHandle;
pub use unload::{UnloadRegistry, LEAVE_WARNING};
