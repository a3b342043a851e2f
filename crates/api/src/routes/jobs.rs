//! Admin endpoints for background jobs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::jobs::{JobStatus, RunNow};

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub enabled: bool,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Serialize)]
pub struct RunJobResponse {
    pub job: String,
    pub message: &'static str,
}

/// GET /api/v1/admin/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        enabled: state.config.jobs.enabled,
        jobs: state.scheduler.status().await,
    })
}

/// POST /api/v1/admin/jobs/:name/run
pub async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<RunJobResponse>), ApiError> {
    match state.scheduler.run_now(&name) {
        RunNow::Started => Ok((
            StatusCode::ACCEPTED,
            Json(RunJobResponse {
                job: name,
                message: "Job started",
            }),
        )),
        RunNow::AlreadyRunning => Err(ApiError::Conflict(format!("Job {} is already running", name))),
        RunNow::Unknown => Err(ApiError::NotFound(format!("Unknown job: {}", name))),
    }
}
