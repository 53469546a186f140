//! Administration HTTP surface for the plugin host runtime
//!
//! Mounts `/admin/plugins` and `/admin/jobs` (spec §6) over a [`plugin_core::PluginManager`]
//! and [`scheduler_core::Scheduler`] the host composer already built and is running. This
//! crate performs no identity checks of its own — see [`middleware::auth`] for the
//! pluggable operator-identity seam.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use utoipa::OpenApi;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use state::AppState;

/// Build the router for an already-assembled [`AppState`].
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(state.config());
    let request_timeout = Duration::from_secs(state.config().request_timeout_secs);

    Router::new()
        .nest("/admin", routes::admin_routes())
        .nest("/health", routes::health_routes())
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", <routes::ApiDoc as OpenApi>::openapi()),
        )
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit::layer))
        .layer(from_fn_with_state(state.clone(), middleware::auth::permissive_layer))
        .layer(axum::middleware::from_fn(middleware::timing_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
}

/// Build the CORS layer from configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    use tower_http::cors::Any;

    let mut cors = CorsLayer::new();

    if config.cors.allow_any_origin {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<http::HeaderValue> = config.cors.allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors = cors.allow_origin(origins);
    }

    let methods: Vec<http::Method> = config.cors.allowed_methods.iter().filter_map(|m| m.parse().ok()).collect();
    cors = cors.allow_methods(methods);

    let headers: Vec<http::header::HeaderName> = config.cors.allowed_headers.iter().filter_map(|h| h.parse().ok()).collect();
    cors = cors.allow_headers(headers);

    if config.cors.allow_credentials {
        cors = cors.allow_credentials(true);
    }

    cors
}

/// Bind and serve the administration surface until the process is killed. The host
/// binary's `serve` command spawns this as a background task alongside the reload
/// engine and scheduler loops (spec §2.1).
pub async fn serve(config: ServerConfig, state: AppState) -> ServerResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid admin bind address: {e}")))?;

    let app = build_router(state);

    info!(%addr, "admin server listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to bind admin server to {addr}: {e}")))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| ServerError::Internal(format!("admin server error: {e}")))?;

    warn!("admin server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::isolation::ResourceMonitor;
    use plugin_core::reload::ReloadConfig;
    use plugin_core::supervisor::SupervisorConfig;
    use plugin_core::{EntryResolver, PluginManager, ReloadEngine, TrustedFactory};
    use scheduler_core::{JobRunner, Scheduler};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NoopResolver;
    impl EntryResolver for NoopResolver {
        fn resolve_trusted(&self, _entry: &str) -> Option<TrustedFactory> {
            None
        }
    }

    struct NoopRunner;
    #[async_trait::async_trait]
    impl JobRunner for NoopRunner {
        async fn run_job(&self, _plugin: &str, _callable_ref: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn test_state() -> AppState {
        let manager = PluginManager::new();
        let reload = Arc::new(ReloadEngine::new(
            std::path::PathBuf::from("./plugins"),
            ReloadConfig::default(),
            manager.clone(),
            SupervisorConfig::default(),
            ResourceMonitor::new(),
            Arc::new(NoopResolver),
            HashMap::new(),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::new(NoopRunner), "UTC", 4).unwrap());
        AppState::new(ServerConfig::default(), manager, reload, scheduler)
    }

    #[test]
    fn test_router_builds() {
        let _router = build_router(test_state());
    }
}
