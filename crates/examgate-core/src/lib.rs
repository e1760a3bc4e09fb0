//! examgate-core - client core for a timed examination platform.
//!
//! Two subsystems carry the weight here:
//! - session tracking (`auth`, `api::RequestGate`, `nav`): a stored bearer
//!   token is re-validated before every privileged call and every
//!   navigation, and an expired or rejected token forces one consistent
//!   logout
//! - persistent timers (`timer`, `exam`): each section countdown is anchored
//!   to a durable deadline, so restarting the client never resets the clock
//!
//! Everything else (`store`, `clock`, `config`) is plumbing they share.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod exam;
pub mod nav;
pub mod store;
pub mod timer;
pub mod utils;

pub use api::{ApiClient, ApiError, HttpTransport, RequestGate};
pub use auth::{Claims, SessionState, SessionView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use exam::{ActiveSection, ExamRunner, SectionKind};
pub use nav::{Navigator, Router};
pub use store::{DurableStore, FileStore, MemoryStore};
pub use timer::{CountdownHandle, PersistentTimer, TimerState, UnloadRegistry};
