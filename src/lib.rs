pub mod auth;
pub mod client;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod websocket;
pub mod ws;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use auth::auth::{JwtValidator, TokenValidator};
use config::Config;
use ws::Hub;

/// Shared by every route and websocket task.
pub struct AppState {
    pub hub: Hub,
    pub validator: Arc<dyn TokenValidator>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let validator = Arc::new(JwtValidator::new(config.jwt_secret.clone()));
        Self::with_validator(config, validator)
    }

    pub fn with_validator(config: Config, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            hub: Hub::new(config.broadcast_capacity),
            validator,
            config,
        }
    }
}

/// Periodically drop editing claims older than the configured maximum age.
///
/// Returns `None` when reaping is disabled.
pub fn spawn_claim_reaper(app_state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let every = app_state.config.editor_reap_interval()?;
    let max_age = app_state.config.editor_max_age();
    info!("Stale claim reaper running every {:?} (max age {:?})", every, max_age);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = app_state.hub.reap_stale(max_age).await;
            debug!("Reaper pass removed {} claim(s)", reaped);
        }
    }))
}
