use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::claims::{Claims, Credential, DecodeError};
use crate::clock::Clock;
use crate::nav::{Navigator, LOGIN_PATH};
use crate::store::DurableStore;

/// Store key holding the bearer token
pub const TOKEN_KEY: &str = "token";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid token: {0}")]
    Decode(#[from] DecodeError),

    #[error("Token is already expired")]
    Expired,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Read-only view of who is signed in. The access guard only ever sees a
/// session through this trait.
pub trait SessionView {
    fn is_authenticated(&self) -> bool;

    fn has_role(&self, role: &str) -> bool;
}

impl SessionView for Option<Claims> {
    fn is_authenticated(&self) -> bool {
        self.is_some()
    }

    fn has_role(&self, role: &str) -> bool {
        self.as_ref().map(|c| c.has_role(role)).unwrap_or(false)
    }
}

/// The one session of a running client.
///
/// The stored token is the source of truth; the in-memory credential is
/// re-derived from it by `refresh_from_storage`. All mutation goes through
/// `refresh_from_storage`, `login` and `logout`.
pub struct SessionState {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    navigator: Arc<Navigator>,
    identity: watch::Sender<Option<Credential>>,
}

impl SessionState {
    pub fn new(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        navigator: Arc<Navigator>,
    ) -> Self {
        Self {
            store,
            clock,
            navigator,
            identity: watch::Sender::new(None),
        }
    }

    /// Re-derive the identity from the stored token. A missing token clears
    /// the identity; a corrupt or expired one forces a logout.
    pub fn refresh_from_storage(&self) {
        let token = match self.store.get(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, treating as absent");
                None
            }
        };

        let Some(token) = token else {
            self.set_identity(None);
            return;
        };

        let credential = match Credential::parse(&token) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Stored token is invalid, logging out");
                self.logout();
                return;
            }
        };

        if credential.claims.is_expired_at(self.clock.now_ms()) {
            info!(subject = %credential.claims.subject, "Token has expired, logging out");
            self.logout();
            return;
        }

        self.set_identity(Some(credential));
    }

    /// Drop the credential everywhere and send the user to the login screen.
    /// Redundant calls leave the same state and never navigate twice.
    pub fn logout(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to remove stored token");
        }
        if self.set_identity(None) {
            info!("Logged out");
        }
        if !self.navigator.is_at(LOGIN_PATH) {
            self.navigator.push(LOGIN_PATH);
        }
    }

    /// Adopt a freshly issued token. Nothing is stored unless the token
    /// decodes and is still valid.
    pub fn login(&self, token: &str) -> Result<Claims, SessionError> {
        let credential = Credential::parse(token)?;
        if credential.claims.is_expired_at(self.clock.now_ms()) {
            return Err(SessionError::Expired);
        }

        self.store.set(TOKEN_KEY, &credential.token)?;
        self.refresh_from_storage();
        info!(subject = %credential.claims.subject, roles = ?credential.claims.roles, "Logged in");
        Ok(credential.claims)
    }

    pub fn claims(&self) -> Option<Claims> {
        self.identity.borrow().as_ref().map(|c| c.claims.clone())
    }

    /// The bearer token of the current identity, if any.
    pub fn token(&self) -> Option<String> {
        self.identity.borrow().as_ref().map(|c| c.token.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.identity.subscribe()
    }

    /// Returns true when the identity actually changed.
    fn set_identity(&self, next: Option<Credential>) -> bool {
        let changed = self.identity.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(authenticated = self.identity.borrow().is_some(), "Session identity changed");
        }
        changed
    }
}

impl SessionView for SessionState {
    fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_some()
    }

    fn has_role(&self, role: &str) -> bool {
        self.identity
            .borrow()
            .as_ref()
            .map(|c| c.claims.has_role(role))
            .unwrap_or(false)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::token_for;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    /// 2023-11-14T22:13:20Z
    const NOW_MS: i64 = 1_700_000_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        navigator: Arc<Navigator>,
        session: SessionState,
    }

    fn fixture(location: &str) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let navigator = Arc::new(Navigator::new(location));
        let session = SessionState::new(store.clone(), clock.clone(), navigator.clone());
        Fixture {
            store,
            clock,
            navigator,
            session,
        }
    }

    fn token_expiring_in(secs: i64, roles: &[&str]) -> String {
        token_for(&json!({
            "sub": "candidate-1",
            "roles": roles,
            "exp": NOW_MS / 1000 + secs,
        }))
    }

    #[test]
    fn test_refresh_without_token_is_unauthenticated() {
        let f = fixture("/login");
        f.session.refresh_from_storage();
        assert!(!f.session.is_authenticated());
        assert_eq!(f.navigator.history(), vec!["/login"]);
    }

    #[test]
    fn test_refresh_with_valid_token() {
        let f = fixture("/login");
        f.store.set(TOKEN_KEY, &token_expiring_in(600, &["USER"])).unwrap();
        f.session.refresh_from_storage();
        assert!(f.session.is_authenticated());
        assert!(f.session.has_role("USER"));
        assert!(!f.session.has_role("ADMIN"));
        assert_eq!(f.session.claims().unwrap().subject, "candidate-1");
    }

    #[test]
    fn test_refresh_expired_token_logs_out_and_clears_store() {
        for offset in [0, -1, -3600] {
            let f = fixture("/tests");
            f.store.set(TOKEN_KEY, &token_expiring_in(offset, &["USER"])).unwrap();
            f.session.refresh_from_storage();
            assert!(!f.session.is_authenticated());
            assert_eq!(f.store.get(TOKEN_KEY).unwrap(), None);
            assert!(f.navigator.is_at("/login"));
        }
    }

    #[test]
    fn test_refresh_corrupt_token_logs_out() {
        let f = fixture("/dashboard");
        f.store.set(TOKEN_KEY, "garbage").unwrap();
        f.session.refresh_from_storage();
        assert!(!f.session.is_authenticated());
        assert_eq!(f.store.get(TOKEN_KEY).unwrap(), None);
        assert!(f.navigator.is_at("/login"));
    }

    #[test]
    fn test_refresh_is_idempotent_when_valid() {
        let f = fixture("/dashboard");
        f.store.set(TOKEN_KEY, &token_expiring_in(600, &["USER"])).unwrap();
        let mut rx = f.session.subscribe();

        f.session.refresh_from_storage();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        f.session.refresh_from_storage();
        f.session.refresh_from_storage();
        assert!(!rx.has_changed().unwrap());
        assert!(f.session.is_authenticated());
        assert_eq!(f.navigator.history(), vec!["/dashboard"]);
    }

    #[test]
    fn test_session_expires_between_refreshes() {
        let f = fixture("/tests");
        f.store.set(TOKEN_KEY, &token_expiring_in(60, &["USER"])).unwrap();
        f.session.refresh_from_storage();
        assert!(f.session.is_authenticated());

        f.clock.advance_secs(61);
        f.session.refresh_from_storage();
        assert!(!f.session.is_authenticated());
        assert!(f.navigator.is_at("/login"));
    }

    #[test]
    fn test_logout_is_idempotent() {
        let once = fixture("/tests");
        once.session.login(&token_expiring_in(600, &["USER"])).unwrap();
        once.session.logout();

        let twice = fixture("/tests");
        twice.session.login(&token_expiring_in(600, &["USER"])).unwrap();
        twice.session.logout();
        twice.session.logout();

        assert_eq!(once.navigator.history(), twice.navigator.history());
        assert_eq!(twice.navigator.visits("/login"), 1);
        assert_eq!(once.session.is_authenticated(), twice.session.is_authenticated());
        assert_eq!(once.store.len(), twice.store.len());
        assert!(twice.store.is_empty());
    }

    #[test]
    fn test_logout_at_login_does_not_navigate() {
        let f = fixture("/login");
        f.session.logout();
        assert_eq!(f.navigator.history(), vec!["/login"]);
    }

    #[test]
    fn test_login_rejects_invalid_and_expired_tokens() {
        let f = fixture("/login");
        assert!(matches!(f.session.login("not-a-token"), Err(SessionError::Decode(_))));
        assert!(matches!(
            f.session.login(&token_expiring_in(-5, &["USER"])),
            Err(SessionError::Expired)
        ));
        assert!(f.store.is_empty());
        assert!(!f.session.is_authenticated());
    }

    #[test]
    fn test_login_stores_token() {
        let f = fixture("/login");
        let token = token_expiring_in(600, &["ADMIN"]);
        let claims = f.session.login(&token).unwrap();
        assert!(claims.has_role("ADMIN"));
        assert_eq!(f.store.get(TOKEN_KEY).unwrap(), Some(token.clone()));
        assert_eq!(f.session.token(), Some(token));
    }

    #[test]
    fn test_option_claims_view() {
        let none: Option<Claims> = None;
        assert!(!none.is_authenticated());
        assert!(!none.has_role("USER"));
    }
}
