//! Legacy single-row-per-tag store, read only, used as a migration source.
//!
//! Legacy tags are stored under their prefixed id.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::LegacyError;

#[async_trait]
pub trait LegacyTagSource: Send + Sync {
    /// Unprefixed ids of every legacy tag.
    async fn tag_ids(&self) -> Result<Vec<String>, LegacyError>;

    /// Members of the tag stored under `prefixed_tag_id`; `None` when absent.
    async fn members(&self, prefixed_tag_id: &str) -> Result<Option<BTreeSet<String>>, LegacyError>;
}

/// Legacy source backed by a map, keyed by prefixed tag id.
#[derive(Default)]
pub struct MemoryLegacyStore {
    tags: Mutex<BTreeMap<String, Result<BTreeSet<String>, String>>>,
    /// Ids listed by `tag_ids` but with no stored row
    dangling: Mutex<BTreeSet<String>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert<I, S>(&self, prefixed_tag_id: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.lock().await.insert(
            prefixed_tag_id.to_string(),
            Ok(members.into_iter().map(Into::into).collect()),
        );
    }

    /// Store a row that cannot be decoded.
    pub async fn insert_malformed(&self, prefixed_tag_id: &str, reason: &str) {
        self.tags
            .lock()
            .await
            .insert(prefixed_tag_id.to_string(), Err(reason.to_string()));
    }

    /// List an unprefixed id whose row is missing.
    pub async fn insert_dangling(&self, tag_id: &str) {
        self.dangling.lock().await.insert(tag_id.to_string());
    }
}

#[async_trait]
impl LegacyTagSource for MemoryLegacyStore {
    async fn tag_ids(&self) -> Result<Vec<String>, LegacyError> {
        let mut ids: BTreeSet<String> = self
            .tags
            .lock()
            .await
            .keys()
            .map(|k| crate::normalize::remove_tag_prefix(k).to_string())
            .collect();
        ids.extend(self.dangling.lock().await.iter().cloned());
        Ok(ids.into_iter().collect())
    }

    async fn members(&self, prefixed_tag_id: &str) -> Result<Option<BTreeSet<String>>, LegacyError> {
        match self.tags.lock().await.get(prefixed_tag_id) {
            None => Ok(None),
            Some(Ok(members)) => Ok(Some(members.clone())),
            Some(Err(reason)) => Err(LegacyError::Malformed {
                tag_id: prefixed_tag_id.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_ids_are_unprefixed() {
        let legacy = MemoryLegacyStore::new();
        legacy.insert("t_promo", ["A", "B"]).await;
        legacy.insert_dangling("ghost").await;

        assert_eq!(legacy.tag_ids().await.unwrap(), vec!["ghost", "promo"]);
        assert_eq!(legacy.members("t_promo").await.unwrap().unwrap().len(), 2);
        assert!(legacy.members("t_ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_row() {
        let legacy = MemoryLegacyStore::new();
        legacy.insert_malformed("t_broken", "members is not a list").await;

        assert!(matches!(
            legacy.members("t_broken").await,
            Err(LegacyError::Malformed { .. })
        ));
    }
}
