//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers for Kubernetes.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Liveness probe endpoint. Verifies the etcd connection when one is configured.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let Some(client) = state.etcd_client.clone() else {
        return Ok("OK");
    };

    let etcd_check = tokio::time::timeout(Duration::from_secs(2), async move {
        let mut client = client;
        client.status().await
    })
    .await;

    match etcd_check {
        Ok(Ok(_)) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "etcd health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("etcd health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe endpoint. Returns OK once startup has finished.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
