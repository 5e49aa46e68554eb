use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::JobHandle;
use crate::InnerState;

pub async fn list_tasks(State(inner): State<InnerState>) -> Json<Vec<JobHandle>> {
    Json(inner.jobs.list())
}

#[tracing::instrument(name = "Get task", skip(inner))]
pub async fn get_task(State(inner): State<InnerState>, Path(id): Path<Uuid>) -> Result<Json<JobHandle>, AppError> {
    inner
        .jobs
        .status(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
}

#[tracing::instrument(name = "Cancel task", skip(inner))]
pub async fn cancel_task(State(inner): State<InnerState>, Path(id): Path<Uuid>) -> Result<Json<JobHandle>, AppError> {
    inner
        .jobs
        .cancel(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
}
