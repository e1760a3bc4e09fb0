//! Navigation: where the user is, and where they are allowed to go.
//!
//! This module provides:
//! - `Navigator`: current location and history, observable via a watch channel
//! - `decide`: the access guard, a pure function of requirements and session
//! - `RouteTable` / `Router`: destinations with their requirement sets, and
//!   the guarded `navigate` entry point

pub mod guard;
pub mod navigator;
pub mod router;
pub mod routes;

pub use guard::{decide, AccessRequirements, Decision};
pub use navigator::{Navigator, LANDING_PATH, LOGIN_PATH};
pub use router::{NavError, NavOutcome, Router};
pub use routes::{Route, RouteMatch, RouteTable};
