//! `/admin/plugins` endpoints (spec §6): enumeration, single-plugin status, on-demand
//! reload and stop.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use plugin_core::SupervisorStats;

use crate::{error::ServerError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_plugins))
        .route("/:name", get(get_plugin))
        .route("/:name/reload", post(reload_plugin))
        .route("/:name/stop", post(stop_plugin))
}

/// `GET /admin/plugins` — every mounted or failing plugin's current statistics.
async fn list_plugins(State(state): State<AppState>) -> Json<Vec<SupervisorStats>> {
    Json(state.plugins.list())
}

/// `GET /admin/plugins/:name` — one plugin's statistics, 404 if never registered.
async fn get_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SupervisorStats>, ServerError> {
    state
        .plugins
        .stats_for(&name)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("plugin '{name}' not found")))
}

/// `POST /admin/plugins/:name/reload` — force a stop-then-start reload outside the scan
/// loop (spec §4.H).
async fn reload_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(), ServerError> {
    state.reload.reload_plugin(&name).await?;
    Ok(())
}

/// `POST /admin/plugins/:name/stop` — unmount and stop one plugin on demand.
async fn stop_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(), ServerError> {
    state.reload.stop_plugin(&name).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_build() {
        let _ = routes();
    }
}
