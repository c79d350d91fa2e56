//! HTTP API Module
//!
//! REST API endpoints for the tagging server.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `error`: Error to status code mapping
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `tags`: Tag membership reads and writes
//! - `members`: Reverse lookup of a member's tags
//! - `migration`: Legacy migration control

mod error;
mod health;
mod members;
mod metrics;
mod migration;
mod state;
mod tags;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{delete, get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Tags
        .route("/taggingService/tags", get(tags::list_tags))
        .route(
            "/taggingService/tags/{tag}",
            get(tags::get_tag).delete(tags::delete_tag),
        )
        .route(
            "/taggingService/tags/{tag}/members",
            get(tags::get_members)
                .put(tags::add_members)
                .delete(tags::remove_members),
        )
        .route(
            "/taggingService/tags/{tag}/members/{member}",
            delete(tags::remove_member),
        )
        .route(
            "/taggingService/tags/members/{member}",
            get(members::get_member_tags),
        )
        // Migration; "migration" and "members" are reserved tag ids
        .route(
            "/taggingService/tags/migration",
            post(migration::control_migration),
        )
        .route(
            "/taggingService/tags/migration/status",
            get(migration::migration_status),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tagging_core::backend::MemoryStore;
    use tagging_core::legacy::MemoryLegacyStore;
    use tagging_core::normalize::{set_tag_prefix, to_normalized_ecm};
    use tagging_core::registry::MemoryRegistry;
    use tagging_core::{MembersPage, SyncReport, TaggingConfig};
    use tower::ServiceExt;

    struct Harness {
        backend: Arc<MemoryStore>,
        registry: Arc<MemoryRegistry>,
        legacy: Arc<MemoryLegacyStore>,
        router: Router,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryStore::new());
        let registry = Arc::new(MemoryRegistry::new());
        let legacy = Arc::new(MemoryLegacyStore::new());
        let config = TaggingConfig {
            max_batch_size: 50,
            max_page_size: 100,
            max_full_read: 8,
            ..TaggingConfig::default()
        };
        let state = AppState::new(backend.clone(), registry.clone(), legacy.clone(), config);
        state.readiness.store(true, Ordering::Release);
        Harness {
            backend,
            registry,
            legacy,
            router: create_router(state),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn macs(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("AA:BB:CC:00:00:{:02X}", i + 16)).collect()
    }

    #[tokio::test]
    async fn test_probes() {
        let h = harness();
        assert_eq!(send(&h.router, "GET", "/health", None).await.0, StatusCode::OK);
        assert_eq!(send(&h.router, "GET", "/ready", None).await.0, StatusCode::OK);
        assert_eq!(
            send(&h.router, "GET", "/metrics", None).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_add_then_read() {
        let h = harness();
        let members = macs(5);

        let (status, body) = send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!(members)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let report: SyncReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.committed, 5);
        assert!(h.registry.contains(&set_tag_prefix("promo"), &to_normalized_ecm(&members[0])).await);

        let (status, body) = send(&h.router, "GET", "/taggingService/tags/promo", None).await;
        assert_eq!(status, StatusCode::OK);
        let tag: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(tag["id"], "promo");
        assert_eq!(tag["members"].as_array().unwrap().len(), 5);

        let (status, body) = send(&h.router, "GET", "/taggingService/tags", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Vec<String>>(&body).unwrap(), vec!["promo"]);
    }

    #[tokio::test]
    async fn test_paginated_members() {
        let h = harness();
        send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!(macs(5))),
        )
        .await;

        let mut seen = Vec::new();
        let mut uri = "/taggingService/tags/promo/members?limit=2".to_string();
        loop {
            let (status, body) = send(&h.router, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            let page: MembersPage = serde_json::from_slice(&body).unwrap();
            seen.extend(page.data);
            if !page.has_more {
                break;
            }
            uri = format!(
                "/taggingService/tags/promo/members?limit=2&cursor={}",
                page.next_cursor.unwrap()
            );
        }
        seen.sort();
        let mut expected = macs(5);
        expected.sort();
        assert_eq!(seen, expected);

        for bad in ["0", "-1", "101", "many"] {
            let uri = format!("/taggingService/tags/promo/members?limit={bad}");
            assert_eq!(send(&h.router, "GET", &uri, None).await.0, StatusCode::BAD_REQUEST, "limit={bad}");
        }
    }

    #[tokio::test]
    async fn test_truncated_read_is_partial_content() {
        let h = harness();
        send(
            &h.router,
            "PUT",
            "/taggingService/tags/big/members",
            Some(serde_json::json!(macs(12))),
        )
        .await;

        let (status, body) = send(&h.router, "GET", "/taggingService/tags/big/members", None).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(serde_json::from_slice::<Vec<String>>(&body).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_validation_and_not_found() {
        let h = harness();
        let (status, _) = send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!([])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!(macs(51))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.registry.total_calls(), 0);

        let (status, _) = send(
            &h.router,
            "PUT",
            "/taggingService/tags/migration/members",
            Some(serde_json::json!(macs(1))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.registry.total_calls(), 0);
        assert_eq!(h.backend.row_count("migration").await, 0);

        assert_eq!(
            send(&h.router, "GET", "/taggingService/tags/missing", None).await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            send(&h.router, "DELETE", "/taggingService/tags/missing", None).await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_store_failure_after_registry_is_server_error() {
        let h = harness();
        h.backend.fail_writes_after(0).await;
        let (status, body) = send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!(macs(3))),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["status"], 500);
    }

    #[tokio::test]
    async fn test_remove_and_delete() {
        let h = harness();
        let members = macs(4);
        send(
            &h.router,
            "PUT",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!(members)),
        )
        .await;

        let uri = format!("/taggingService/tags/promo/members/{}", members[0]);
        assert_eq!(send(&h.router, "DELETE", &uri, None).await.0, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &h.router,
            "DELETE",
            "/taggingService/tags/promo/members",
            Some(serde_json::json!([members[1].clone()])),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(serde_json::from_slice::<SyncReport>(&body).unwrap().committed, 1);
        assert_eq!(h.backend.row_count("promo").await, 2);

        assert_eq!(
            send(&h.router, "DELETE", "/taggingService/tags/promo", None).await.0,
            StatusCode::NO_CONTENT
        );
        assert_eq!(h.backend.row_count("promo").await, 0);
    }

    #[tokio::test]
    async fn test_member_tags_from_registry() {
        let h = harness();
        let ecm = to_normalized_ecm("AA:BB:CC:DD:EE:FF");
        h.registry.seed("t_promo", &ecm).await;
        h.registry.seed("t_beta", &ecm).await;
        h.registry.seed("untagged_group", &ecm).await;

        let (status, body) = send(&h.router, "GET", "/taggingService/tags/members/AABBCCDDEEFF", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Vec<String>>(&body).unwrap(),
            vec!["beta", "promo"]
        );
    }

    #[tokio::test]
    async fn test_migration_commands() {
        let h = harness();
        h.legacy.insert("t_promo", ["M1", "M2"]).await;
        h.registry.seed("t_promo", &to_normalized_ecm("M1")).await;

        assert_eq!(
            send(&h.router, "POST", "/taggingService/tags/migration", None).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&h.router, "POST", "/taggingService/tags/migration?command=bogus", None).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&h.router, "POST", "/taggingService/tags/migration?command=cancel", None).await.0,
            StatusCode::BAD_REQUEST
        );

        let (status, body) = send(&h.router, "POST", "/taggingService/tags/migration?command=dryRun", None).await;
        assert_eq!(status, StatusCode::OK);
        let dry_run: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(dry_run["summary"]["totalMembers"], 2);

        let (status, _) = send(&h.router, "POST", "/taggingService/tags/migration?command=start", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut state = String::new();
        for _ in 0..200 {
            let (_, body) = send(&h.router, "GET", "/taggingService/tags/migration/status", None).await;
            let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
            state = status["state"].as_str().unwrap_or_default().to_string();
            if state != "running" {
                assert_eq!(status["result"]["summary"]["totalMembersWritten"], 1);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");
        assert_eq!(h.backend.row_count("promo").await, 1);
    }
}
