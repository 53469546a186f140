//! Application state shared across every admin HTTP handler
//!
//! The router takes the plugin manager and scheduler as Arc-shared fields (spec §6):
//! handlers never own these collaborators, they borrow through `Clone`-cheap handles.

use std::sync::Arc;

use plugin_core::{PluginManager, ReloadEngine};
use scheduler_core::Scheduler;

use crate::config::ServerConfig;
use crate::middleware::rate_limit::IpRateLimiter;

/// Shared application state, cloned per request like the rest of the workspace's axum
/// handlers.
#[derive(Clone)]
pub struct AppState {
    /// Admin server configuration.
    pub config: Arc<ServerConfig>,

    /// The plugin-wide orchestrator (spec §4.G) — route resolution, mount state,
    /// enumeration.
    pub plugins: PluginManager,

    /// The reload engine (spec §4.H) — on-demand reload/stop for one plugin.
    pub reload: Arc<ReloadEngine>,

    /// The job scheduler (spec §4.I) — introspection, manual trigger, pause/resume.
    pub scheduler: Arc<Scheduler>,

    /// Per-caller-IP request limiter, shared so every worker sees the same counters.
    pub rate_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        plugins: PluginManager,
        reload: Arc<ReloadEngine>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let rate_limiter = Arc::new(IpRateLimiter::from_config(&config.rate_limit));
        Self {
            config: Arc::new(config),
            plugins,
            reload,
            scheduler,
            rate_limiter,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
