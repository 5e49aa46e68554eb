//! HTTP front end: video queries, ingestion triggers and job inspection.

pub mod common;
pub mod tasks;
pub mod videos;

use axum::routing::{get, post};
use axum::Router;
use axum_prometheus::metrics_exporter_prometheus::PrometheusHandle;
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::system::create_system_router;
use crate::InnerState;

#[tracing::instrument(name = "create_api_router", skip_all)]
pub fn create_api_router(
    state: InnerState,
    prometheus_layer: PrometheusMetricLayer<'static>,
    metric_handle: PrometheusHandle,
) -> Router {
    tracing::info!("Creating API router");

    Router::new()
        .route("/videos", get(videos::list_videos))
        .route("/videos/by_channel", get(videos::videos_by_channel))
        .route("/videos/fetch_videos", post(videos::fetch_videos))
        .route("/videos/sweep", post(videos::sweep_videos))
        .route("/videos/:id", get(videos::get_video).delete(videos::delete_video))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/:id", get(tasks::get_task))
        .route("/tasks/:id/cancel", post(tasks::cancel_task))
        .merge(create_system_router())
        .route("/metrics", get(move || async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(common::tracing::make_request_span)
                .on_request(common::tracing::on_request)
                .on_response(common::tracing::on_response)
                .on_failure(common::tracing::on_failure),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
