use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

/// Location where an unauthenticated user is sent.
pub const LOGIN_PATH: &str = "/login";

/// Default landing page for authenticated users lacking a role.
pub const LANDING_PATH: &str = "/dashboard";

/// Current location plus history. Front ends subscribe to location changes
/// and render whatever screen the path maps to.
pub struct Navigator {
    location: watch::Sender<String>,
    history: Mutex<Vec<String>>,
}

impl Navigator {
    pub fn new(initial: &str) -> Self {
        Self {
            location: watch::Sender::new(initial.to_string()),
            history: Mutex::new(vec![initial.to_string()]),
        }
    }

    pub fn current(&self) -> String {
        self.location.borrow().clone()
    }

    pub fn is_at(&self, path: &str) -> bool {
        *self.location.borrow() == path
    }

    /// Move to `path`. Pushing the current location is a no-op and returns
    /// false; the compare and the write happen under one lock, so racing
    /// pushes of the same path navigate once.
    pub fn push(&self, path: &str) -> bool {
        let moved = self.location.send_if_modified(|current| {
            if current == path {
                false
            } else {
                *current = path.to_string();
                true
            }
        });

        if moved {
            debug!(path, "Navigated");
            if let Ok(mut history) = self.history.lock() {
                history.push(path.to_string());
            }
        }
        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }

    /// Every location visited, oldest first, starting with the initial one.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// How many times `path` was navigated to (the initial location included).
    pub fn visits(&self, path: &str) -> usize {
        self.history().iter().filter(|p| *p == path).count()
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_same_path_is_noop() {
        let nav = Navigator::new("/dashboard");
        assert!(!nav.push("/dashboard"));
        assert!(nav.push(LOGIN_PATH));
        assert!(!nav.push(LOGIN_PATH));
        assert_eq!(nav.history(), vec!["/dashboard", "/login"]);
        assert_eq!(nav.visits(LOGIN_PATH), 1);
        assert!(nav.is_at(LOGIN_PATH));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let nav = Navigator::default();
        let mut rx = nav.subscribe();
        assert!(!rx.has_changed().unwrap());
        nav.push("/tests");
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "/tests");
    }
}
