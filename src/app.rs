//! Wiring of the live backend into a shell and its view context

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, HttpGateway};
use crate::notify::Notifier;
use crate::realtime::{PhoenixRealtime, RealtimeSource};
use crate::rest::{DataSource, HttpDataSource};
use crate::session::SessionContext;
use crate::shell::{Route, Shell};
use crate::storage::LocalStore;
use crate::views::ViewContext;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a command needs to talk to the backend
pub struct App {
    pub config: Config,
    pub shell: Shell,
}

impl App {
    /// Open local storage, restore the session and build the HTTP and
    /// realtime clients
    ///
    /// A realtime client that cannot be built only disables live updates.
    pub async fn connect(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        if !config.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let store = LocalStore::connect(&config).await?;
        let session = SessionContext::init(store).await?;

        let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(&config.api, session.clone())?);
        let data: Arc<dyn DataSource> = Arc::new(HttpDataSource::new(
            &config.realtime,
            config.api.timeout_secs,
        )?);
        let realtime = realtime_source(&config);

        let ctx = ViewContext {
            data,
            realtime,
            gateway,
            notifier,
            session,
            limits: config.views.clone(),
        };
        let shell = Shell::new(ctx, config.auth.clone());
        Ok(Self { config, shell })
    }

    pub fn context(&self) -> &ViewContext {
        self.shell.context()
    }

    /// Fail unless a session is open, the way the route guard would redirect
    pub fn require_session(&self, route: Route) -> Result<()> {
        match self.shell.resolve(route) {
            Route::Login if route != Route::Login => Err(Error::NotLoggedIn),
            _ => Ok(()),
        }
    }
}

fn realtime_source(config: &Config) -> Option<Arc<dyn RealtimeSource>> {
    if !config.realtime.enabled {
        debug!("Realtime disabled in config");
        return None;
    }
    match PhoenixRealtime::new(&config.realtime) {
        Ok(source) => Some(Arc::new(source)),
        Err(e) => {
            warn!("Live updates unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_requires_init() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(Some(dir.path().to_path_buf())).unwrap();
        let result = App::connect(config, Arc::new(RecordingNotifier::new())).await;
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[test]
    fn test_disabled_realtime_builds_nothing() {
        let mut config = Config::default();
        config.realtime.enabled = false;
        assert!(realtime_source(&config).is_none());
    }
}
