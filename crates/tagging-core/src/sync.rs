//! Registry-first membership changes
//!
//! Every add or remove goes to the group registry first, one call per member
//! over a bounded worker pool. Only the members the registry confirmed are then
//! written to (or removed from) the bucketed store. A store failure after the
//! registry accepted the change is an `InconsistentWrite`: the two systems have
//! diverged and nothing is rolled back.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TaggingConfig;
use crate::error::{RegistryError, StoreError, TaggingError, TaggingResult};
use crate::models::SyncReport;
use crate::normalize::{remove_tag_prefix, set_tag_prefix, to_normalized_ecm, TAG_PREFIX};
use crate::registry::GroupRegistry;
use crate::store::BucketedStore;
use crate::worker_pool::run_pool;

/// Registry operation, used as the `op` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SyncOp {
    Add,
    Remove,
    Verify,
}

#[derive(Clone)]
pub struct RegistrySyncCoordinator {
    store: BucketedStore,
    registry: Arc<dyn GroupRegistry>,
    config: TaggingConfig,
}

impl RegistrySyncCoordinator {
    pub fn new(store: BucketedStore, registry: Arc<dyn GroupRegistry>, config: TaggingConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &TaggingConfig {
        &self.config
    }

    /// Reject empty and oversized batches before any I/O.
    pub fn validate(&self, members: &[String]) -> TaggingResult<()> {
        if members.is_empty() {
            return Err(TaggingError::EmptyBatch);
        }
        if members.len() > self.config.max_batch_size {
            return Err(TaggingError::BatchTooLarge {
                size: members.len(),
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    /// Add `members` to `tag` in the registry, then store the confirmed subset.
    #[tracing::instrument(skip(self, members), fields(requested = members.len()))]
    pub async fn add_members(&self, tag: &str, members: Vec<String>) -> TaggingResult<SyncReport> {
        self.validate(&members)?;
        let started = Instant::now();
        let requested = members.len();

        let confirmed = self.fan_out(SyncOp::Add, tag, members).await;
        if confirmed.len() < requested {
            warn!(tag_id = tag, requested = requested, confirmed = confirmed.len(), "Registry accepted only part of the batch");
        }

        let committed = if confirmed.is_empty() {
            0
        } else {
            let created = Utc::now().timestamp_millis();
            let report = self.store.add_grouped(tag, &confirmed, created).await;
            if let Some(source) = report.into_error() {
                return Err(self.inconsistent(SyncOp::Add, tag, confirmed.len(), source));
            }
            confirmed.len()
        };

        Ok(self.finish(SyncOp::Add, tag, requested, confirmed.len(), committed, started))
    }

    /// Remove `members` from `tag` in the registry, then delete the confirmed
    /// subset's rows.
    #[tracing::instrument(skip(self, members), fields(requested = members.len()))]
    pub async fn remove_members(&self, tag: &str, members: Vec<String>) -> TaggingResult<SyncReport> {
        self.validate(&members)?;
        let started = Instant::now();
        let requested = members.len();

        let confirmed = self.fan_out(SyncOp::Remove, tag, members).await;
        if confirmed.len() < requested {
            warn!(tag_id = tag, requested = requested, confirmed = confirmed.len(), "Registry removed only part of the batch");
        }

        let committed = if confirmed.is_empty() {
            0
        } else {
            let report = self.store.remove_grouped(tag, &confirmed).await;
            if let Some(source) = report.into_error() {
                return Err(self.inconsistent(SyncOp::Remove, tag, confirmed.len(), source));
            }
            confirmed.len()
        };

        Ok(self.finish(SyncOp::Remove, tag, requested, confirmed.len(), committed, started))
    }

    pub async fn remove_member(&self, tag: &str, member: &str) -> TaggingResult<SyncReport> {
        self.remove_members(tag, vec![member.to_string()]).await
    }

    /// Members whose registry groups include `tag`, compared case-insensitively.
    /// Lookup failures count as unverified. Stops early when `cancel` fires.
    pub async fn verify_members(&self, tag: &str, members: Vec<String>, cancel: &CancellationToken) -> Vec<String> {
        let key = set_tag_prefix(tag);
        let workers = self.config.sync_workers(members.len());
        let registry = Arc::clone(&self.registry);
        let cancel = cancel.clone();

        run_pool(members, workers, move |member: String| {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let normalized = to_normalized_ecm(&member);
                match registry.groups_of(&normalized).await {
                    Ok(groups) => {
                        metrics::counter!("tagging_registry_calls_total", "op" => SyncOp::Verify.to_string(), "outcome" => "ok").increment(1);
                        if groups.iter().any(|g| g.eq_ignore_ascii_case(&key)) {
                            Some(member)
                        } else {
                            debug!(member = %normalized, key = %key, "Member not in registry group");
                            None
                        }
                    }
                    Err(e) => {
                        metrics::counter!("tagging_registry_calls_total", "op" => SyncOp::Verify.to_string(), "outcome" => "error").increment(1);
                        error!(member = %normalized, key = %key, error = %e, "Registry lookup failed");
                        None
                    }
                }
            }
        })
        .await
    }

    /// Tags `member` belongs to, according to the registry, without prefix.
    pub async fn tags_of_member(&self, member: &str) -> TaggingResult<Vec<String>> {
        let normalized = to_normalized_ecm(member);
        let groups = self.registry.groups_of(&normalized).await?;
        let mut tags: Vec<String> = groups
            .iter()
            .filter(|g| g.starts_with(TAG_PREFIX))
            .map(|g| remove_tag_prefix(g).to_string())
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn fan_out(&self, op: SyncOp, tag: &str, members: Vec<String>) -> Vec<String> {
        let key = set_tag_prefix(tag);
        let workers = self.config.sync_workers(members.len());
        let registry = Arc::clone(&self.registry);
        debug!(tag_id = tag, op = %op, workers = workers, members = members.len(), "Starting registry fan-out");

        run_pool(members, workers, move |member: String| {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            async move {
                let normalized = to_normalized_ecm(&member);
                let result = match op {
                    SyncOp::Add => registry.add_member(&key, &normalized).await,
                    // Already absent counts as removed
                    SyncOp::Remove => match registry.remove_member(&key, &normalized).await {
                        Err(RegistryError::Rejected { status: 404, .. }) => {
                            warn!(member = %normalized, key = %key, "Member was not in registry group");
                            Ok(())
                        }
                        other => other,
                    },
                    SyncOp::Verify => Ok(()),
                };

                match result {
                    Ok(()) => {
                        metrics::counter!("tagging_registry_calls_total", "op" => op.to_string(), "outcome" => "ok").increment(1);
                        Some(member)
                    }
                    Err(e) => {
                        metrics::counter!("tagging_registry_calls_total", "op" => op.to_string(), "outcome" => "error").increment(1);
                        error!(member = %normalized, key = %key, op = %op, error = %e, "Registry call failed");
                        None
                    }
                }
            }
        })
        .await
    }

    fn inconsistent(
        &self,
        op: SyncOp,
        tag: &str,
        confirmed: usize,
        source: StoreError,
    ) -> TaggingError {
        metrics::counter!("tagging_inconsistent_writes_total", "op" => op.to_string()).increment(1);
        error!(
            tag_id = tag,
            op = %op,
            confirmed = confirmed,
            error = %source,
            "Registry change succeeded but store write failed"
        );
        TaggingError::InconsistentWrite {
            tag_id: tag.to_string(),
            confirmed,
            source,
        }
    }

    fn finish(
        &self,
        op: SyncOp,
        tag: &str,
        requested: usize,
        confirmed: usize,
        committed: usize,
        started: Instant,
    ) -> SyncReport {
        let elapsed = started.elapsed();
        metrics::histogram!("tagging_sync_duration_seconds", "op" => op.to_string()).record(elapsed.as_secs_f64());
        metrics::counter!("tagging_members_committed_total", "op" => op.to_string()).increment(committed as u64);
        info!(
            tag_id = tag,
            op = %op,
            requested = requested,
            confirmed = confirmed,
            committed = committed,
            duration_ms = elapsed.as_millis() as u64,
            "Membership sync finished"
        );
        SyncReport {
            requested,
            confirmed,
            committed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::reader::PaginatedReader;
    use crate::registry::MemoryRegistry;

    struct Harness {
        backend: Arc<MemoryStore>,
        registry: Arc<MemoryRegistry>,
        coordinator: RegistrySyncCoordinator,
    }

    fn harness(config: TaggingConfig) -> Harness {
        let backend = Arc::new(MemoryStore::new());
        let registry = Arc::new(MemoryRegistry::new());
        let coordinator = RegistrySyncCoordinator::new(
            BucketedStore::new(backend.clone()),
            registry.clone(),
            config,
        );
        Harness {
            backend,
            registry,
            coordinator,
        }
    }

    fn macs(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("AA:BB:CC:{:02X}:{:02X}:{:02X}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let h = harness(TaggingConfig::default());
        assert!(matches!(
            h.coordinator.add_members("promo", vec![]).await,
            Err(TaggingError::EmptyBatch)
        ));
        assert_eq!(h.registry.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_boundary() {
        let config = TaggingConfig {
            max_batch_size: 50,
            ..TaggingConfig::default()
        };
        let h = harness(config);

        let report = h.coordinator.add_members("promo", macs(50)).await.unwrap();
        assert_eq!(report.committed, 50);
        let calls = h.registry.total_calls();

        let err = h.coordinator.add_members("promo", macs(51)).await.unwrap_err();
        assert!(matches!(err, TaggingError::BatchTooLarge { size: 51, max: 50 }));
        assert_eq!(h.registry.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_registry_receives_prefixed_key_and_ecm_member() {
        let h = harness(TaggingConfig::default());
        h.coordinator
            .add_members("promo", vec!["aa:bb:cc:dd:ee:ff".to_string()])
            .await
            .unwrap();

        assert!(h.registry.contains("t_promo", "AABBCCDDEEFD").await);
        // Rows keep the member as submitted
        let reader = PaginatedReader::new(BucketedStore::new(h.backend.clone()), TaggingConfig::default());
        let page = reader.page("promo", 10, "").await.unwrap();
        assert_eq!(page.data, vec!["aa:bb:cc:dd:ee:ff"]);
    }

    #[tokio::test]
    async fn test_idempotent_add() {
        let h = harness(TaggingConfig::default());
        let member = vec!["AA:BB:CC:DD:EE:FF".to_string()];
        h.coordinator.add_members("promo", member.clone()).await.unwrap();
        h.coordinator.add_members("promo", member).await.unwrap();
        assert_eq!(h.backend.row_count("promo").await, 1);
    }

    #[tokio::test]
    async fn test_partial_confirmation_commits_confirmed_subset() {
        let h = harness(TaggingConfig::default());
        let members = macs(10);
        for rejected in &members[..3] {
            h.registry.reject_member(to_normalized_ecm(rejected)).await;
        }

        let report = h.coordinator.add_members("promo", members).await.unwrap();
        assert_eq!(report.requested, 10);
        assert_eq!(report.confirmed, 7);
        assert_eq!(report.committed, 7);
        assert!(report.partial_failure());
        assert_eq!(h.backend.row_count("promo").await, 7);
    }

    #[tokio::test]
    async fn test_store_failure_after_registry_success_is_inconsistent() {
        let h = harness(TaggingConfig::default());
        h.backend.fail_writes_after(0).await;

        let err = h.coordinator.add_members("promo", macs(4)).await.unwrap_err();
        match err {
            TaggingError::InconsistentWrite { tag_id, confirmed, .. } => {
                assert_eq!(tag_id, "promo");
                assert_eq!(confirmed, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Registry kept the change
        assert!(h.registry.contains("t_promo", &to_normalized_ecm(&macs(4)[0])).await);
    }

    #[tokio::test]
    async fn test_nothing_confirmed_writes_nothing() {
        let h = harness(TaggingConfig::default());
        let members = macs(2);
        for m in &members {
            h.registry.reject_member(to_normalized_ecm(m)).await;
        }
        let report = h.coordinator.add_members("promo", members).await.unwrap();
        assert_eq!(report.committed, 0);
        assert_eq!(h.backend.batches_executed(), 0);
    }

    #[tokio::test]
    async fn test_remove_members() {
        let h = harness(TaggingConfig::default());
        let members = macs(6);
        h.coordinator.add_members("promo", members.clone()).await.unwrap();

        let report = h.coordinator.remove_members("promo", members[..4].to_vec()).await.unwrap();
        assert_eq!(report.committed, 4);
        assert_eq!(h.backend.row_count("promo").await, 2);
        assert!(!h.registry.contains("t_promo", &to_normalized_ecm(&members[0])).await);

        let report = h.coordinator.remove_member("promo", &members[4]).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(h.backend.row_count("promo").await, 1);
    }

    #[tokio::test]
    async fn test_verify_members() {
        let h = harness(TaggingConfig::default());
        h.registry.seed("T_PROMO", "AABBCCDDEEFD").await;
        h.registry.seed("t_other", "AABBCCDDEEFE").await;

        let verified = h
            .coordinator
            .verify_members(
                "promo",
                vec!["AA:BB:CC:DD:EE:FF".to_string(), "AA:BB:CC:DD:EE:00".to_string()],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(verified, vec!["AA:BB:CC:DD:EE:FF"]);
    }

    #[tokio::test]
    async fn test_verify_members_stops_when_cancelled() {
        let h = harness(TaggingConfig::default());
        h.registry.seed("t_promo", "AABBCCDDEEFD").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let verified = h
            .coordinator
            .verify_members("promo", vec!["AA:BB:CC:DD:EE:FF".to_string()], &cancel)
            .await;
        assert!(verified.is_empty());
        assert_eq!(h.registry.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_tags_of_member() {
        let h = harness(TaggingConfig::default());
        h.registry.seed("t_promo", "AABBCCDDEEFD").await;
        h.registry.seed("t_beta", "AABBCCDDEEFD").await;
        h.registry.seed("unrelated", "AABBCCDDEEFD").await;

        let tags = h.coordinator.tags_of_member("aa:bb:cc:dd:ee:ff").await.unwrap();
        assert_eq!(tags, vec!["beta", "promo"]);
    }
}
