use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::time::Duration;

use crate::api::common::{PaginationParams, TaskAccepted};
use crate::errors::AppError;
use crate::jobs::JobKind;
use crate::store::{Video, VideoFilter, VideoPage};
use crate::youtube::MAX_RESULTS_LIMIT;
use crate::InnerState;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Deserialize)]
pub struct VideoListParams {
    /// Case-insensitive substring of the title.
    pub query: Option<String>,
    /// Case-insensitive substring of the channel title.
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchVideosRequest {
    pub query: Option<String>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    pub max_age_days: Option<u64>,
}

#[tracing::instrument(name = "List videos", skip(inner))]
pub async fn list_videos(
    State(inner): State<InnerState>,
    Query(params): Query<VideoListParams>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<VideoPage>, AppError> {
    let mut filter = VideoFilter::default();
    if let Some(query) = params.query {
        filter = filter.title(query);
    }
    if let Some(channel) = params.channel {
        filter = filter.channel(channel);
    }

    let (page, page_size) = pagination.resolve(&inner.pagination);
    let result = inner.store.query(&filter, page, page_size).await?;
    tracing::debug!(total = result.total, returned = result.items.len(), "Listed videos");
    Ok(Json(result))
}

#[tracing::instrument(name = "List videos by channel", skip(inner))]
pub async fn videos_by_channel(
    State(inner): State<InnerState>,
    Query(params): Query<ChannelParams>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<VideoPage>, AppError> {
    let channel = params
        .channel
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation("channel parameter is required".to_string()))?;

    let (page, page_size) = pagination.resolve(&inner.pagination);
    let result = inner
        .store
        .query(&VideoFilter::default().channel(channel), page, page_size)
        .await?;
    Ok(Json(result))
}

#[tracing::instrument(name = "Get video", skip(inner))]
pub async fn get_video(State(inner): State<InnerState>, Path(id): Path<String>) -> Result<Json<Video>, AppError> {
    inner
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))
}

#[tracing::instrument(name = "Delete video", skip(inner))]
pub async fn delete_video(State(inner): State<InnerState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    if inner.store.delete(&id).await? {
        tracing::info!(external_id = %id, "Video deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Video {} not found", id)))
    }
}

/// Queues an ingestion job and answers before it runs.
#[tracing::instrument(name = "Trigger video fetch", skip(inner))]
pub async fn fetch_videos(
    State(inner): State<InnerState>,
    Json(request): Json<FetchVideosRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let query = match request.query {
        Some(query) if query.trim().is_empty() => {
            return Err(AppError::Validation("query must not be empty".to_string()))
        }
        Some(query) => query,
        None => inner.default_query.clone(),
    };
    let max_results = request.max_results.unwrap_or(inner.default_max_results);
    if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
        return Err(AppError::Validation(format!(
            "max_results must be between 1 and {}",
            MAX_RESULTS_LIMIT
        )));
    }

    let handle = inner.jobs.submit(JobKind::Ingest { query, max_results });
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: handle.id,
            message: "Fetching latest videos initiated.".to_string(),
        }),
    ))
}

#[tracing::instrument(name = "Trigger retention sweep", skip(inner))]
pub async fn sweep_videos(
    State(inner): State<InnerState>,
    Json(request): Json<SweepRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let max_age = match request.max_age_days {
        Some(days) => Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)),
        None => inner.retention,
    };

    let handle = inner.jobs.submit(JobKind::Sweep {
        max_age_secs: max_age.as_secs(),
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: handle.id,
            message: "Retention sweep initiated.".to_string(),
        }),
    ))
}
