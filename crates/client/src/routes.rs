//! Client-side route guard
//!
//! The guard only reads the local session. It keeps protected views from
//! rendering without a token; the API still enforces authorization itself.

use crate::session::SessionStore;
use crate::view::{ViewHandle, ViewScope};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Entry view
    Login,
    Register,
    ForgotPassword,
    ResetPassword,
    Dashboard,
    Certification,
    Profile,
    NotFound,
}

impl Route {
    pub const fn path(self) -> &'static str {
        match self {
            Self::Login => "/",
            Self::Register => "/register",
            Self::ForgotPassword => "/forgot-password",
            Self::ResetPassword => "/reset-password",
            Self::Dashboard => "/dashboard",
            Self::Certification => "/certification",
            Self::Profile => "/profile",
            Self::NotFound => "/404",
        }
    }

    /// Resolve a location, ignoring query string, fragment and trailing slash
    pub fn parse(location: &str) -> Self {
        let path = location
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');

        match path {
            "" => Self::Login,
            "/register" => Self::Register,
            "/forgot-password" => Self::ForgotPassword,
            "/reset-password" => Self::ResetPassword,
            "/dashboard" => Self::Dashboard,
            "/certification" => Self::Certification,
            "/profile" => Self::Profile,
            _ => Self::NotFound,
        }
    }

    /// Views that require a session
    pub const fn is_protected(self) -> bool {
        matches!(self, Self::Dashboard | Self::Certification | Self::Profile)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Outcome of one navigation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the requested view unchanged
    Allowed(Route),
    /// Render the entry view instead
    Redirected { from: Route, to: Route },
}

impl GuardDecision {
    /// The view that ends up rendered
    pub const fn target(self) -> Route {
        match self {
            Self::Allowed(route) | Self::Redirected { to: route, .. } => route,
        }
    }

    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Gate for protected views
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: Arc<SessionStore>,
}

impl RouteGuard {
    pub const fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }

    /// Evaluate a navigation attempt against the session as it is right now
    pub fn evaluate(&self, route: Route) -> GuardDecision {
        if route.is_protected() && !self.session.is_authenticated() {
            debug!(%route, "No session, redirecting to login");
            return GuardDecision::Redirected {
                from: route,
                to: Route::Login,
            };
        }
        GuardDecision::Allowed(route)
    }
}

/// Tracks the rendered view; every navigation goes through the guard
///
/// Each navigation mounts a fresh [`ViewScope`] and unmounts the previous
/// one, so late results for a view the user already left are discarded.
#[derive(Debug)]
pub struct Navigator {
    guard: RouteGuard,
    state: RwLock<(Route, ViewScope)>,
}

impl Navigator {
    pub fn new(guard: RouteGuard) -> Self {
        Self {
            guard,
            state: RwLock::new((Route::Login, ViewScope::new())),
        }
    }

    pub fn current(&self) -> Route {
        self.state.read().unwrap_or_else(PoisonError::into_inner).0
    }

    /// Handle to the currently mounted view
    pub fn view(&self) -> ViewHandle {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .1
            .handle()
    }

    pub fn navigate(&self, route: Route) -> GuardDecision {
        let decision = self.guard.evaluate(route);
        self.mount(decision.target());
        decision
    }

    pub fn navigate_to(&self, location: &str) -> GuardDecision {
        self.navigate(Route::parse(location))
    }

    /// Forced navigation after the session ended
    pub fn redirect_to_login(&self) {
        debug!(from = %self.current(), "Redirecting to login");
        self.mount(Route::Login);
    }

    fn mount(&self, route: Route) {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, (route, ViewScope::new()))
        };
        previous.1.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTECTED: [Route; 3] = [Route::Dashboard, Route::Certification, Route::Profile];
    const PUBLIC: [Route; 4] = [
        Route::Login,
        Route::Register,
        Route::ForgotPassword,
        Route::ResetPassword,
    ];

    #[test]
    fn test_protected_routes_redirect_without_token() {
        let guard = RouteGuard::new(Arc::new(SessionStore::in_memory()));
        for route in PROTECTED {
            assert_eq!(
                guard.evaluate(route),
                GuardDecision::Redirected {
                    from: route,
                    to: Route::Login
                }
            );
        }
    }

    #[test]
    fn test_protected_routes_render_with_token() {
        let session = Arc::new(SessionStore::in_memory());
        session.set_token("abc123");
        let guard = RouteGuard::new(session);
        for route in PROTECTED {
            assert_eq!(guard.evaluate(route), GuardDecision::Allowed(route));
        }
    }

    #[test]
    fn test_public_routes_always_render() {
        let guard = RouteGuard::new(Arc::new(SessionStore::in_memory()));
        for route in PUBLIC {
            assert!(guard.evaluate(route).is_allowed());
        }
    }

    #[test]
    fn test_decision_is_not_cached_across_navigations() {
        let session = Arc::new(SessionStore::in_memory());
        let navigator = Navigator::new(RouteGuard::new(session.clone()));

        session.set_token("abc123");
        assert!(navigator.navigate(Route::Dashboard).is_allowed());
        assert_eq!(navigator.current(), Route::Dashboard);

        session.clear_token();
        assert!(!navigator.navigate(Route::Dashboard).is_allowed());
        assert_eq!(navigator.current(), Route::Login);
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(Route::parse("/"), Route::Login);
        assert_eq!(Route::parse(""), Route::Login);
        assert_eq!(Route::parse("/dashboard/"), Route::Dashboard);
        assert_eq!(
            Route::parse("/reset-password?token=abc&email=a@b.c"),
            Route::ResetPassword
        );
        assert_eq!(Route::parse("/certification#top"), Route::Certification);
        assert_eq!(Route::parse("/admin"), Route::NotFound);
    }

    #[test]
    fn test_redirect_to_login() {
        let session = Arc::new(SessionStore::in_memory());
        session.set_token("abc123");
        let navigator = Navigator::new(RouteGuard::new(session));
        navigator.navigate_to("/profile");
        let view = navigator.view();
        assert!(view.is_active());

        navigator.redirect_to_login();
        assert_eq!(navigator.current(), Route::Login);
        assert!(!view.is_active());
        assert!(navigator.view().is_active());
    }
}
