//! HTTP Group Registry Client
//!
//! Talks to the registry's field-table API:
//! - `POST {base}/v2/ft/{member}` with `{"fields": {key: ""}}` adds a group
//! - `DELETE {base}/v2/ft/{member}?field={key}` removes one
//! - `GET {base}/v2/ft/{member}` returns `{"fields": {...}}`, 404 when unknown
//!
//! Transport errors and 5xx responses are retried with exponential backoff;
//! 4xx responses are final.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tagging_core::registry::GroupRegistry;
use tagging_core::RegistryError;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// Header carrying the entry's time-to-live in seconds.
const TTL_HEADER: &str = "Xttl";

#[derive(Debug, Serialize, Deserialize, Default)]
struct FieldTable {
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

pub struct HttpGroupRegistry {
    client: Client,
    base_url: String,
    ttl_secs: u64,
    max_retry: Duration,
}

impl HttpGroupRegistry {
    pub fn new(config: &ServerConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(config.registry_timeout)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.registry_url.trim_end_matches('/').to_string(),
            ttl_secs: config.registry_ttl_secs,
            max_retry: config.registry_max_retry,
        })
    }

    fn entry_url(&self, member: &str) -> String {
        format!("{}/v2/ft/{member}", self.base_url)
    }

    /// Send the request built by `build`, retrying transport failures and
    /// 5xx responses. Any other response is returned to the caller.
    async fn send<F>(&self, op: &'static str, build: F) -> Result<Response, RegistryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        retry(backoff, || {
            let request = build();
            async move {
                let response = request.send().await.map_err(|e| {
                    warn!(op = op, error = %e, "Registry request failed, retrying");
                    backoff::Error::transient(RegistryError::Transport(e.to_string()))
                })?;

                let status = response.status();
                if status.is_server_error() {
                    let message = response.text().await.unwrap_or_default();
                    warn!(op = op, status = status.as_u16(), "Registry returned server error, retrying");
                    return Err(backoff::Error::transient(RegistryError::Rejected {
                        status: status.as_u16(),
                        message,
                    }));
                }
                Ok(response)
            }
        })
        .await
    }

    async fn expect_success(response: Response) -> Result<(), RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(RegistryError::Rejected {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl GroupRegistry for HttpGroupRegistry {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), RegistryError> {
        let url = self.entry_url(member);
        let body = FieldTable {
            fields: HashMap::from([(key.to_string(), serde_json::Value::String(String::new()))]),
        };

        let response = self
            .send("add", || {
                self.client
                    .post(&url)
                    .header(TTL_HEADER, self.ttl_secs)
                    .json(&body)
            })
            .await?;
        debug!(member = member, key = key, status = response.status().as_u16(), "Registry add");
        Self::expect_success(response).await
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), RegistryError> {
        let url = self.entry_url(member);
        let response = self
            .send("remove", || self.client.delete(&url).query(&[("field", key)]))
            .await?;
        debug!(member = member, key = key, status = response.status().as_u16(), "Registry remove");
        Self::expect_success(response).await
    }

    async fn groups_of(&self, member: &str) -> Result<HashSet<String>, RegistryError> {
        let url = self.entry_url(member);
        let response = self.send("lookup", || self.client.get(&url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(HashSet::new());
        }
        if !response.status().is_success() {
            return Err(RegistryError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let table: FieldTable = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(table.fields.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};

    #[derive(Clone, Default)]
    struct FakeRegistry {
        tables: Arc<Mutex<HashMap<String, HashMap<String, serde_json::Value>>>>,
        /// Number of requests to fail with 503 before answering
        flaky: Arc<AtomicUsize>,
        ttl_seen: Arc<Mutex<Option<String>>>,
    }

    impl FakeRegistry {
        fn flake(&self) -> bool {
            self.flaky
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    async fn put_fields(
        State(fake): State<FakeRegistry>,
        Path(member): Path<String>,
        headers: HeaderMap,
        Json(body): Json<FieldTable>,
    ) -> StatusCode {
        if fake.flake() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        *fake.ttl_seen.lock().unwrap() = headers
            .get(TTL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        fake.tables
            .lock()
            .unwrap()
            .entry(member)
            .or_default()
            .extend(body.fields);
        StatusCode::OK
    }

    async fn get_fields(
        State(fake): State<FakeRegistry>,
        Path(member): Path<String>,
    ) -> Result<Json<FieldTable>, StatusCode> {
        let tables = fake.tables.lock().unwrap();
        let fields = tables.get(&member).cloned().ok_or(StatusCode::NOT_FOUND)?;
        Ok(Json(FieldTable { fields }))
    }

    async fn delete_field(
        State(fake): State<FakeRegistry>,
        Path(member): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> StatusCode {
        let mut tables = fake.tables.lock().unwrap();
        let Some(fields) = tables.get_mut(&member) else {
            return StatusCode::NOT_FOUND;
        };
        match query.get("field") {
            Some(field) if fields.remove(field).is_some() => StatusCode::OK,
            Some(_) => StatusCode::NOT_FOUND,
            None => StatusCode::BAD_REQUEST,
        }
    }

    async fn spawn_fake(fake: FakeRegistry) -> HttpGroupRegistry {
        let app = Router::new()
            .route("/v2/ft/{member}", post(put_fields).get(get_fields).delete(delete_field))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = ServerConfig {
            registry_url: format!("http://{addr}"),
            registry_max_retry: Duration::from_secs(5),
            registry_ttl_secs: 60,
            ..ServerConfig::default()
        };
        HttpGroupRegistry::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_add_lookup_remove() {
        let fake = FakeRegistry::default();
        let registry = spawn_fake(fake.clone()).await;

        registry.add_member("t_promo", "AABBCCDDEEFF").await.unwrap();
        registry.add_member("t_other", "AABBCCDDEEFF").await.unwrap();
        assert_eq!(fake.ttl_seen.lock().unwrap().as_deref(), Some("60"));

        let groups = registry.groups_of("AABBCCDDEEFF").await.unwrap();
        assert!(groups.contains("t_promo"));
        assert!(groups.contains("t_other"));

        registry.remove_member("t_promo", "AABBCCDDEEFF").await.unwrap();
        let groups = registry.groups_of("AABBCCDDEEFF").await.unwrap();
        assert_eq!(groups, HashSet::from(["t_other".to_string()]));
    }

    #[tokio::test]
    async fn test_unknown_member_has_no_groups() {
        let registry = spawn_fake(FakeRegistry::default()).await;
        assert!(registry.groups_of("000000000000").await.unwrap().is_empty());
        assert!(matches!(
            registry.remove_member("t_promo", "000000000000").await,
            Err(RegistryError::Rejected { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let fake = FakeRegistry::default();
        fake.flaky.store(2, Ordering::SeqCst);
        let registry = spawn_fake(fake.clone()).await;

        registry.add_member("t_promo", "AABBCCDDEEFF").await.unwrap();
        assert_eq!(fake.flaky.load(Ordering::SeqCst), 0);
        assert!(fake.tables.lock().unwrap().contains_key("AABBCCDDEEFF"));
    }
}
