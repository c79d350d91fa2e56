//! Prometheus Metrics Endpoint

use super::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics - Prometheus exposition of every tagging metric
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let Some(metrics) = state.metrics_state.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            "Metrics recorder not installed".to_string(),
        );
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics.prometheus_handle.render(),
    )
}
