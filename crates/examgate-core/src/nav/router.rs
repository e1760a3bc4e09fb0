use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::guard::{decide, Decision};
use super::navigator::Navigator;
use super::routes::RouteTable;
use crate::auth::SessionState;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NavError {
    #[error("No route matches {0}")]
    NotFound(String),

    #[error("Too many redirects starting from {0}")]
    RedirectLoop(String),
}

/// Where a navigation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavOutcome {
    pub location: String,
    pub route: &'static str,
    pub params: BTreeMap<String, String>,
    pub redirected: bool,
}

/// Runs the access guard in front of every location change.
pub struct Router {
    table: RouteTable,
    session: Arc<SessionState>,
    navigator: Arc<Navigator>,
}

impl Router {
    pub fn new(table: RouteTable, session: Arc<SessionState>, navigator: Arc<Navigator>) -> Self {
        Self {
            table,
            session,
            navigator,
        }
    }

    /// Resolve `path`, let the guard decide, follow redirects, and move the
    /// navigator to wherever the user is allowed to land.
    pub fn navigate(&self, path: &str) -> Result<NavOutcome, NavError> {
        let mut target = path.to_string();
        let mut redirected = false;

        for _ in 0..=MAX_REDIRECTS {
            let matched = self
                .table
                .resolve(&target)
                .ok_or_else(|| NavError::NotFound(target.clone()))?;

            if let Some(to) = matched.route.redirect {
                target = to.to_string();
                redirected = true;
                continue;
            }

            match decide(&matched.route.requirements, self.session.as_ref()) {
                Decision::Allow => {
                    let outcome = NavOutcome {
                        location: target.clone(),
                        route: matched.route.name,
                        params: matched.params,
                        redirected,
                    };
                    self.navigator.push(&target);
                    if redirected {
                        info!(from = path, to = %target, "Navigation redirected");
                    } else {
                        debug!(to = %target, "Navigation allowed");
                    }
                    return Ok(outcome);
                }
                Decision::RedirectTo(next) => {
                    target = next;
                    redirected = true;
                }
            }
        }

        Err(NavError::RedirectLoop(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::token_for;
    use crate::clock::ManualClock;
    use crate::nav::routes::Route;
    use crate::nav::AccessRequirements;
    use crate::store::MemoryStore;
    use serde_json::json;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn router_with(roles: Option<&[&str]>) -> (Router, Arc<Navigator>) {
        let navigator = Arc::new(Navigator::new("/login"));
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(NOW_MS)),
            navigator.clone(),
        ));
        if let Some(roles) = roles {
            let token = token_for(&json!({"sub": "u", "roles": roles, "exp": NOW_MS / 1000 + 600}));
            session.login(&token).unwrap();
        }
        (Router::new(RouteTable::default(), session, navigator.clone()), navigator)
    }

    #[test]
    fn test_root_redirects_to_login() {
        let (router, navigator) = router_with(None);
        let outcome = router.navigate("/").unwrap();
        assert_eq!(outcome.location, "/login");
        assert!(outcome.redirected);
        assert!(navigator.is_at("/login"));
    }

    #[test]
    fn test_user_enters_section() {
        let (router, navigator) = router_with(Some(&["USER"]));
        let outcome = router.navigate("/attempt/a1/reading").unwrap();
        assert_eq!(outcome.route, "ReadingSection");
        assert_eq!(outcome.params.get("attemptId").map(String::as_str), Some("a1"));
        assert!(!outcome.redirected);
        assert!(navigator.is_at("/attempt/a1/reading"));
    }

    #[test]
    fn test_admin_only_session_bounced_from_section() {
        let (router, navigator) = router_with(Some(&["ADMIN"]));
        let outcome = router.navigate("/attempt/a1/reading").unwrap();
        assert_eq!(outcome.location, "/dashboard");
        assert!(outcome.redirected);
        assert!(navigator.is_at("/dashboard"));
    }

    #[test]
    fn test_anonymous_bounced_to_login() {
        let (router, _) = router_with(None);
        let outcome = router.navigate("/admin/attempts/3").unwrap();
        assert_eq!(outcome.location, "/login");
    }

    #[test]
    fn test_unknown_route() {
        let (router, navigator) = router_with(Some(&["USER"]));
        assert_eq!(
            router.navigate("/nope"),
            Err(NavError::NotFound("/nope".to_string()))
        );
        assert!(navigator.is_at("/login"));
    }

    #[test]
    fn test_redirect_loop_detected() {
        let navigator = Arc::new(Navigator::new("/"));
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(NOW_MS)),
            navigator.clone(),
        ));
        // A table whose login page itself requires auth can never settle.
        let table = RouteTable::new(vec![
            Route {
                name: "Login",
                pattern: "/login",
                requirements: AccessRequirements::authenticated(),
                redirect: None,
            },
        ]);
        let router = Router::new(table, session, navigator);
        assert_eq!(
            router.navigate("/login"),
            Err(NavError::RedirectLoop("/login".to_string()))
        );
    }
}
