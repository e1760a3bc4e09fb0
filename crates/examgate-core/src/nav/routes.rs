use std::collections::BTreeMap;

use super::guard::AccessRequirements;

/// A navigable destination.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: &'static str,
    /// Segments starting with `:` capture one non-empty path segment.
    pub pattern: &'static str,
    pub requirements: AccessRequirements,
    /// Destinations that only forward somewhere else.
    pub redirect: Option<&'static str>,
}

impl Route {
    fn new(name: &'static str, pattern: &'static str, requirements: AccessRequirements) -> Self {
        Self {
            name,
            pattern,
            requirements,
            redirect: None,
        }
    }

    fn redirect(pattern: &'static str, to: &'static str) -> Self {
        Self {
            name: "Redirect",
            pattern,
            requirements: AccessRequirements::public(),
            redirect: Some(to),
        }
    }

    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut pattern = segments(self.pattern);
        let mut actual = segments(path);
        let mut params = BTreeMap::new();

        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return Some(params),
                (Some(p), Some(a)) => {
                    if let Some(name) = p.strip_prefix(':') {
                        params.insert(name.to_string(), a.to_string());
                    } else if p != a {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A resolved route with its captured parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: BTreeMap<String, String>,
}

/// Ordered route table; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize(path);
        self.routes.iter().find_map(|route| {
            route
                .matches(path)
                .map(|params| RouteMatch { route, params })
        })
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            Route::new("Login", "/login", AccessRequirements::public()),
            Route::new("Register", "/register", AccessRequirements::public()),
            Route::new("Dashboard", "/dashboard", AccessRequirements::authenticated()),
            Route::new("Admin", "/admin", AccessRequirements::admin()),
            Route::new("TestAdmin", "/admin/tests", AccessRequirements::admin()),
            Route::new("TestBuilder", "/admin/tests/builder", AccessRequirements::admin()),
            Route::new("TestBuilder", "/admin/tests/builder/:templateId", AccessRequirements::admin()),
            Route::new("AttemptsList", "/admin/attempts", AccessRequirements::admin()),
            Route::new("AttemptDetail", "/admin/attempts/:attemptId", AccessRequirements::admin()),
            Route::new("AvailableTests", "/tests", AccessRequirements::user()),
            Route::new("ListeningSection", "/attempt/:attemptId/listening", AccessRequirements::user()),
            Route::new("ReadingSection", "/attempt/:attemptId/reading", AccessRequirements::user()),
            Route::new("WritingSection", "/attempt/:attemptId/writing", AccessRequirements::user()),
            Route::redirect("/", super::LOGIN_PATH),
        ])
    }
}

/// Drop any query string or fragment.
fn normalize(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
