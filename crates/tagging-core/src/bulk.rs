//! Tag deletion
//!
//! Deletes a tag one bucket at a time. Each bucket is drained in chunks of the
//! max batch size through registry-first removal; the bucket's rows and
//! presence row are only dropped once every chunk was fully confirmed. Memory
//! use is bounded by one chunk regardless of tag size.

use tracing::{debug, error, info, warn};

use crate::bucket::BucketId;
use crate::config::TaggingConfig;
use crate::error::{TaggingError, TaggingResult};
use crate::models::DeleteReport;
use crate::store::BucketedStore;
use crate::sync::RegistrySyncCoordinator;

enum BucketOutcome {
    Deleted { members: usize },
    /// The registry refused part of a chunk; the bucket stays in place.
    Unconfirmed { members: usize },
}

#[derive(Clone)]
pub struct BulkOperations {
    store: BucketedStore,
    coordinator: RegistrySyncCoordinator,
    config: TaggingConfig,
}

impl BulkOperations {
    pub fn new(store: BucketedStore, coordinator: RegistrySyncCoordinator, config: TaggingConfig) -> Self {
        Self {
            store,
            coordinator,
            config,
        }
    }

    /// Remove every member of `tag` from the registry and the store.
    ///
    /// Stops at the first bucket that cannot be fully removed and reports
    /// `PartialDelete`; calling again resumes with the buckets that remain.
    #[tracing::instrument(skip(self))]
    pub async fn delete_tag(&self, tag: &str) -> TaggingResult<DeleteReport> {
        let buckets = self.store.populated_buckets(tag).await?;
        if buckets.is_empty() {
            return Err(TaggingError::not_found(tag));
        }

        info!(tag_id = tag, buckets = buckets.len(), "Deleting tag");
        let mut report = DeleteReport::default();

        for bucket in &buckets {
            let stopped_at = match self.delete_bucket(tag, *bucket).await {
                Ok(BucketOutcome::Deleted { members }) => {
                    report.buckets_deleted += 1;
                    report.members_removed += members;
                    debug!(tag_id = tag, bucket = bucket, members = members, "Deleted bucket");
                    continue;
                }
                Ok(BucketOutcome::Unconfirmed { members }) => {
                    warn!(tag_id = tag, bucket = bucket, "Registry did not confirm every member, stopping deletion");
                    members
                }
                Err((members, e)) => {
                    error!(tag_id = tag, bucket = bucket, error = %e, "Failed to delete bucket");
                    members
                }
            };

            return Err(TaggingError::PartialDelete {
                tag_id: tag.to_string(),
                buckets_deleted: report.buckets_deleted,
                buckets_total: buckets.len(),
                members_removed: report.members_removed + stopped_at,
            });
        }

        info!(
            tag_id = tag,
            buckets = report.buckets_deleted,
            members = report.members_removed,
            "Deleted tag"
        );
        Ok(report)
    }

    async fn delete_bucket(&self, tag: &str, bucket: BucketId) -> Result<BucketOutcome, (usize, TaggingError)> {
        let chunk_size = self.config.max_batch_size.max(1);
        let mut removed = 0usize;
        let mut after = String::new();

        loop {
            let chunk = self
                .store
                .members_of(tag, bucket, &after, chunk_size)
                .await
                .map_err(|e| (removed, TaggingError::from(e)))?;
            if chunk.is_empty() {
                break;
            }

            let fetched = chunk.len();
            let last = chunk.last().cloned().unwrap_or_default();
            let sync = self
                .coordinator
                .remove_members(tag, chunk)
                .await
                .map_err(|e| (removed, e))?;
            removed += sync.committed;

            if sync.partial_failure() {
                return Ok(BucketOutcome::Unconfirmed { members: removed });
            }
            if fetched < chunk_size {
                break;
            }
            after = last;
        }

        self.store
            .delete_bucket(tag, bucket)
            .await
            .map_err(|e| (removed, TaggingError::from(e)))?;
        Ok(BucketOutcome::Deleted { members: removed })
    }
}
