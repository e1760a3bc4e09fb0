//! REST API module for the examination backend.
//!
//! This module provides:
//! - `Transport` / `HttpTransport`: raw request execution over reqwest
//! - `RequestGate`: session heartbeat, bearer attachment and forced logout
//!   on 401, wrapped around every privileged call
//! - `ApiClient`: the endpoints a candidate uses
//!
//! The backend authenticates with JWT bearer tokens obtained from
//! `/auth/login`.

pub mod client;
pub mod error;
pub mod gate;
pub mod transport;

pub use client::{ApiClient, StartedAttempt};
pub use error::ApiError;
pub use gate::RequestGate;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
