use tracing::debug;

use super::navigator::{LANDING_PATH, LOGIN_PATH};
use crate::auth::{SessionView, ROLE_ADMIN, ROLE_USER};

/// What a destination demands of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequirements {
    pub requires_auth: bool,
    /// Checked in declaration order; the first missing role redirects.
    pub roles: Vec<String>,
}

impl AccessRequirements {
    /// No requirements at all
    pub fn public() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            requires_auth: true,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.push(role.to_string());
        self
    }

    pub fn admin() -> Self {
        Self::authenticated().with_role(ROLE_ADMIN)
    }

    pub fn user() -> Self {
        Self::authenticated().with_role(ROLE_USER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

/// Decide whether the session may enter a destination. Reads only; never
/// touches storage or the session itself.
pub fn decide<S: SessionView + ?Sized>(requirements: &AccessRequirements, session: &S) -> Decision {
    if requirements.requires_auth && !session.is_authenticated() {
        debug!("Not authenticated, redirecting to login");
        return Decision::RedirectTo(LOGIN_PATH.to_string());
    }

    if let Some(missing) = requirements.roles.iter().find(|r| !session.has_role(r)) {
        debug!(role = %missing, "Missing role, redirecting to landing page");
        return Decision::RedirectTo(LANDING_PATH.to_string());
    }

    Decision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use std::collections::BTreeMap;

    fn session_with(roles: &[&str]) -> Option<Claims> {
        Some(Claims {
            subject: "s".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            expiry: i64::MAX / 1000,
            extra: BTreeMap::new(),
        })
    }

    fn redirect(path: &str) -> Decision {
        Decision::RedirectTo(path.to_string())
    }

    #[test]
    fn test_empty_requirements_always_allow() {
        let sessions = [None, session_with(&[]), session_with(&["USER"]), session_with(&["ADMIN"])];
        for session in &sessions {
            assert_eq!(decide(&AccessRequirements::public(), session), Decision::Allow);
        }
    }

    #[test]
    fn test_auth_required() {
        assert_eq!(decide(&AccessRequirements::authenticated(), &None), redirect("/login"));
        assert_eq!(
            decide(&AccessRequirements::authenticated(), &session_with(&[])),
            Decision::Allow
        );
    }

    #[test]
    fn test_admin_route_with_user_only_session_redirects_to_dashboard() {
        let user = session_with(&["USER"]);
        assert_eq!(decide(&AccessRequirements::admin(), &user), redirect("/dashboard"));

        // Even without the auth flag the role check still redirects
        let bare = AccessRequirements::public().with_role(ROLE_ADMIN);
        assert_eq!(decide(&bare, &user), redirect("/dashboard"));
    }

    #[test]
    fn test_user_route() {
        assert_eq!(decide(&AccessRequirements::user(), &session_with(&["ADMIN"])), redirect("/dashboard"));
        assert_eq!(decide(&AccessRequirements::user(), &session_with(&["USER"])), Decision::Allow);
        assert_eq!(decide(&AccessRequirements::user(), &None), redirect("/login"));
    }

    #[test]
    fn test_roles_checked_together() {
        let both = AccessRequirements::admin().with_role(ROLE_USER);
        assert_eq!(decide(&both, &session_with(&["USER", "ADMIN"])), Decision::Allow);
        assert_eq!(decide(&both, &session_with(&["ADMIN"])), redirect("/dashboard"));
    }
}
