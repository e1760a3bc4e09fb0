//! Authentication: credential decoding and the client session.
//!
//! This module provides:
//! - `decode` / `Credential`: structural parsing of JWT-shaped bearer tokens
//! - `SessionState`: the single source of truth for "who is signed in",
//!   re-validated against the durable store before every privileged call
//! - `CredentialStore`: OS keychain storage for login passwords
//!
//! Tokens are never verified here; the backend that issued them does that.
//! The client only looks at expiry and roles.

pub mod claims;
pub mod credentials;
pub mod session;

pub use claims::{decode, Claims, Credential, DecodeError};
pub use credentials::CredentialStore;
pub use session::{SessionError, SessionState, SessionView, TOKEN_KEY};

/// Role granting the admin screens
pub const ROLE_ADMIN: &str = "ADMIN";

/// Role granting the candidate screens
pub const ROLE_USER: &str = "USER";
