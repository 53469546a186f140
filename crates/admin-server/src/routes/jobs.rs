//! `/admin/jobs` endpoints (spec §6): enumeration, history, manual trigger, pause/resume.
//!
//! Job ids are the scheduler's composite `"plugin::job_id"` key (spec §4.I); the `:id`
//! path segment is that whole string, split back apart before calling into
//! [`scheduler_core::Scheduler`].

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use scheduler_core::{JobRun, JobStatus};

use crate::{error::ServerError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:id/history", get(job_history))
        .route("/:id/trigger", post(trigger_job))
        .route("/:id/pause", post(pause_job))
        .route("/:id/resume", post(resume_job))
}

/// Split a composite job id `"plugin::job_id"` into its two parts.
fn split_job_id(id: &str) -> Result<(&str, &str), ServerError> {
    id.split_once("::")
        .ok_or_else(|| ServerError::BadRequest(format!("job id '{id}' is not of the form 'plugin::job_id'")))
}

/// `GET /admin/jobs` — every registered job across every plugin.
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.scheduler.list())
}

/// `GET /admin/jobs/:id/history` — the last N runs of one job (spec §4.I Introspection).
async fn job_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<JobRun>>, ServerError> {
    let (plugin, job_id) = split_job_id(&id)?;
    Ok(Json(state.scheduler.history(plugin, job_id)))
}

/// `POST /admin/jobs/:id/trigger` — run once now, counted as attempt 1, without altering
/// the schedule (spec §4.I Manual trigger).
async fn trigger_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ServerError> {
    let (plugin, job_id) = split_job_id(&id)?;
    state.scheduler.trigger_manually(plugin, job_id)?;
    Ok(())
}

/// `POST /admin/jobs/:id/pause` — stop dispatching this job until resumed.
async fn pause_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ServerError> {
    let (plugin, job_id) = split_job_id(&id)?;
    state.scheduler.pause(plugin, job_id)?;
    Ok(())
}

/// `POST /admin/jobs/:id/resume` — recompute `next_due` and resume dispatch.
async fn resume_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ServerError> {
    let (plugin, job_id) = split_job_id(&id)?;
    state.scheduler.resume(plugin, job_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_job_id() {
        assert_eq!(split_job_id("calc::sync").unwrap(), ("calc", "sync"));
        assert!(split_job_id("no-separator").is_err());
    }

    #[test]
    fn test_routes_build() {
        let _ = routes();
    }
}
