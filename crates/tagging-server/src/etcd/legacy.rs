//! Legacy single-row tags on etcd
//!
//! Each legacy tag is one key `{legacy_prefix}/{t_tag}` holding
//! `{"id": "...", "members": [...]}`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use serde::Deserialize;
use tagging_core::legacy::LegacyTagSource;
use tagging_core::normalize::remove_tag_prefix;
use tagging_core::LegacyError;

#[derive(Debug, Deserialize)]
struct LegacyTag {
    #[allow(dead_code)]
    #[serde(default)]
    id: String,
    #[serde(default)]
    members: BTreeSet<String>,
}

pub struct EtcdLegacyStore {
    client: Client,
    prefix: String,
}

impl EtcdLegacyStore {
    pub fn new(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: format!("{}/", prefix.trim_end_matches('/')),
        }
    }
}

/// Decode a stored legacy row.
fn decode(prefixed_tag_id: &str, value: &[u8]) -> Result<BTreeSet<String>, LegacyError> {
    serde_json::from_slice::<LegacyTag>(value)
        .map(|tag| tag.members)
        .map_err(|e| LegacyError::Malformed {
            tag_id: prefixed_tag_id.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl LegacyTagSource for EtcdLegacyStore {
    async fn tag_ids(&self) -> Result<Vec<String>, LegacyError> {
        let mut client = self.client.clone();
        let resp = client
            .get(
                self.prefix.as_str(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(|e| LegacyError::Read(e.to_string()))?;

        let mut ids = BTreeSet::new();
        for kv in resp.kvs() {
            let key = kv.key_str().map_err(|e| LegacyError::Read(e.to_string()))?;
            if let Some(tag) = key.strip_prefix(self.prefix.as_str()) {
                ids.insert(remove_tag_prefix(tag).to_string());
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn members(&self, prefixed_tag_id: &str) -> Result<Option<BTreeSet<String>>, LegacyError> {
        let mut client = self.client.clone();
        let key = format!("{}{prefixed_tag_id}", self.prefix);
        let resp = client
            .get(key, None)
            .await
            .map_err(|e| LegacyError::Read(e.to_string()))?;

        match resp.kvs().first() {
            None => Ok(None),
            Some(kv) => decode(prefixed_tag_id, kv.value()).map(Some),
        }
    }
}
