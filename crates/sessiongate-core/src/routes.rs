//! Navigation table and the route guard.
//!
//! The guard runs before every navigation and only ever reads the session
//! through `SessionStore::is_logged_in`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::SessionStore;

/// Name of the route unauthenticated users are sent to
pub const LOGIN_ROUTE: &str = "login";

/// Query parameter carrying the originally requested path
pub const REDIRECT_PARAM: &str = "redirect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub requires_auth: bool,
}

impl Route {
    pub fn public(path: &str) -> Self {
        Self {
            name: None,
            path: path.to_string(),
            requires_auth: false,
        }
    }

    pub fn protected(path: &str) -> Self {
        Self {
            requires_auth: true,
            ..Self::public(path)
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// A navigation request resolved against the route table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Path including query string, as requested
    pub full_path: String,
    pub requires_auth: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Redirect {
        route: String,
        /// Value of the `redirect` query parameter
        redirect: String,
    },
}

impl NavigationDecision {
    /// Render a redirect as a location such as `/login?redirect=%2Fdashboard`,
    /// using the path of the named route from `table`.
    pub fn location(&self, table: &RouteTable) -> Option<String> {
        match self {
            NavigationDecision::Allow => None,
            NavigationDecision::Redirect { route, redirect } => {
                let path = table
                    .by_name(route)
                    .map(|r| r.path.as_str())
                    .unwrap_or("/login");
                Some(format!(
                    "{}?{}={}",
                    path,
                    REDIRECT_PARAM,
                    urlencoding::encode(redirect)
                ))
            }
        }
    }
}

/// Known routes, matched by exact path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            Route::public("/"),
            Route::public("/login").named(LOGIN_ROUTE),
            Route::protected("/dashboard"),
            Route::protected("/profile"),
        ])
    }
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name.as_deref() == Some(name))
    }

    /// Resolve a requested path. The query string and fragment are ignored
    /// for matching but kept in `full_path`; unknown paths are public.
    pub fn resolve(&self, full_path: &str) -> Navigation {
        let path = full_path
            .split(['?', '#'])
            .next()
            .unwrap_or(full_path);
        let requires_auth = self
            .routes
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.requires_auth)
            .unwrap_or(false);

        Navigation {
            full_path: full_path.to_string(),
            requires_auth,
        }
    }
}

/// Navigation interceptor deciding whether a route may be entered
pub struct RouteGuard {
    store: Arc<SessionStore>,
}

impl RouteGuard {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub fn before_each(&self, to: &Navigation) -> NavigationDecision {
        if !to.requires_auth {
            return NavigationDecision::Allow;
        }

        if !self.store.is_logged_in() {
            debug!(path = %to.full_path, "Blocked navigation, redirecting to login");
            return NavigationDecision::Redirect {
                route: LOGIN_ROUTE.to_string(),
                redirect: to.full_path.clone(),
            };
        }

        NavigationDecision::Allow
    }
}
