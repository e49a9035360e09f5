//! Application wiring: session, gateway and navigator for one CLI run

use crate::config::{SESSION_FILE, Settings};
use anyhow::{Result, bail};
use certscan_client::{
    ApiClient, FileStorage, GuardDecision, Navigator, Route, RouteGuard, SessionStore, ViewHandle,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct App {
    pub client: ApiClient,
    pub session: Arc<SessionStore>,
    pub navigator: Arc<Navigator>,
}

impl App {
    /// Build the app around the session persisted in `data_dir`
    pub fn new(settings: &Settings, data_dir: &Path) -> Result<Self> {
        let storage = Arc::new(FileStorage::new(data_dir.join(SESSION_FILE)));
        let session = Arc::new(SessionStore::new(storage));
        Self::with_session(settings, session)
    }

    pub fn with_session(settings: &Settings, session: Arc<SessionStore>) -> Result<Self> {
        let navigator = Arc::new(Navigator::new(RouteGuard::new(session.clone())));

        let on_expired = navigator.clone();
        let mut builder = ApiClient::builder()
            .base_url(&settings.api.base_url)
            .session(session.clone())
            .on_unauthorized(move || {
                on_expired.redirect_to_login();
                eprintln!("Your session has expired. Please log in again with `certscan login`.");
            });

        if settings.api.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(settings.api.timeout_secs));
        }
        if let Some(agent) = &settings.api.user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(Self {
            client: builder.build()?,
            session,
            navigator,
        })
    }

    /// Enter a view through the route guard
    pub fn open(&self, route: Route) -> Result<ViewHandle> {
        match self.navigator.navigate(route) {
            GuardDecision::Allowed(route) => {
                debug!(%route, "View opened");
                Ok(self.navigator.view())
            }
            GuardDecision::Redirected { from, .. } => {
                bail!("{from} requires a session. Log in first with `certscan login`.")
            }
        }
    }
}
