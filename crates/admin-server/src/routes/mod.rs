//! Route definitions for the administration HTTP surface (spec §6).

pub mod jobs;
pub mod plugins;

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::OpenApi;

use crate::state::AppState;

/// Build the `/admin` router: `/admin/plugins` and `/admin/jobs`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .nest("/plugins", plugins::routes())
        .nest("/jobs", jobs::routes())
}

/// Build health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Health check handler.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "Health"
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Readiness check handler.
async fn readiness_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Liveness check handler.
async fn liveness_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// OpenAPI documentation for the administration surface.
#[derive(OpenApi)]
#[openapi(
    paths(health_check,),
    components(schemas(HealthResponse,)),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Plugins", description = "Plugin lifecycle and status endpoints"),
        (name = "Jobs", description = "Scheduler job introspection and control endpoints"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_routes_build() {
        let _ = admin_routes();
        let _ = health_routes();
    }
}
