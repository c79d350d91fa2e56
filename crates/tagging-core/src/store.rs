//! Bucketed membership store
//!
//! CRUD over membership rows and the bucket presence index. Backend errors
//! propagate unchanged; nothing at this layer retries.

use std::sync::Arc;

use tracing::{debug, error};

use crate::backend::{Mutation, WideColumnStore};
use crate::bucket::{BucketAssignor, BucketId};
use crate::error::StoreError;

/// A bucket whose batch failed during a grouped write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFailure {
    pub bucket: BucketId,
    pub members: usize,
    pub error: StoreError,
}

/// Per-bucket accounting for [`BucketedStore::add_grouped`] and
/// [`BucketedStore::remove_grouped`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedWriteReport {
    pub buckets: usize,
    /// Members whose bucket batch succeeded
    pub written: usize,
    pub failures: Vec<BucketFailure>,
}

impl GroupedWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_members(&self) -> usize {
        self.failures.iter().map(|f| f.members).sum()
    }

    /// Single error covering every failed bucket, if any failed.
    pub fn into_error(self) -> Option<StoreError> {
        let first = self.failures.first()?;
        if self.failures.len() == 1 {
            return Some(first.error.clone());
        }
        let detail = self
            .failures
            .iter()
            .map(|f| format!("bucket {}: {}", f.bucket, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Some(StoreError::Write(format!(
            "{} members in {} buckets failed: {detail}",
            self.failures.iter().map(|f| f.members).sum::<usize>(),
            self.failures.len()
        )))
    }
}

#[derive(Clone)]
pub struct BucketedStore {
    backend: Arc<dyn WideColumnStore>,
}

impl BucketedStore {
    pub fn new(backend: Arc<dyn WideColumnStore>) -> Self {
        Self { backend }
    }

    /// Insert one row per member plus the bucket's presence row, as one
    /// unlogged batch.
    pub async fn add_members(
        &self,
        tag: &str,
        bucket: BucketId,
        members: &[String],
        created: i64,
    ) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut batch: Vec<Mutation> = members
            .iter()
            .map(|member| Mutation::PutMember {
                tag: tag.to_string(),
                bucket,
                member: member.clone(),
                created,
            })
            .collect();
        batch.push(Mutation::PutPresence {
            tag: tag.to_string(),
            bucket,
        });

        self.backend.execute_batch(batch).await
    }

    /// Delete the named rows. The presence row is left in place.
    pub async fn remove_members(
        &self,
        tag: &str,
        bucket: BucketId,
        members: &[String],
    ) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }

        let batch = members
            .iter()
            .map(|member| Mutation::DeleteMember {
                tag: tag.to_string(),
                bucket,
                member: member.clone(),
            })
            .collect();

        self.backend.execute_batch(batch).await
    }

    pub async fn members_of(
        &self,
        tag: &str,
        bucket: BucketId,
        after: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.backend.scan_members(tag, bucket, after, limit).await
    }

    pub async fn populated_buckets(&self, tag: &str) -> Result<Vec<BucketId>, StoreError> {
        self.backend.scan_presence(tag).await
    }

    /// Remove every row of one bucket together with its presence row.
    pub async fn delete_bucket(&self, tag: &str, bucket: BucketId) -> Result<(), StoreError> {
        self.backend
            .execute_batch(vec![
                Mutation::DeleteBucketMembers {
                    tag: tag.to_string(),
                    bucket,
                },
                Mutation::DeletePresence {
                    tag: tag.to_string(),
                    bucket,
                },
            ])
            .await
    }

    pub async fn tag_ids(&self) -> Result<Vec<String>, StoreError> {
        self.backend.scan_tag_ids().await
    }

    /// Group `members` by bucket and write one batch per bucket.
    pub async fn add_grouped(&self, tag: &str, members: &[String], created: i64) -> GroupedWriteReport {
        let groups = BucketAssignor::group(members.iter().cloned());
        let mut report = GroupedWriteReport {
            buckets: groups.len(),
            ..Default::default()
        };

        for (bucket, bucket_members) in groups {
            match self.add_members(tag, bucket, &bucket_members, created).await {
                Ok(()) => {
                    report.written += bucket_members.len();
                    debug!(tag_id = tag, bucket = bucket, count = bucket_members.len(), "Added members to bucket");
                }
                Err(e) => {
                    error!(tag_id = tag, bucket = bucket, count = bucket_members.len(), error = %e, "Failed to add members to bucket");
                    report.failures.push(BucketFailure {
                        bucket,
                        members: bucket_members.len(),
                        error: e,
                    });
                }
            }
        }

        report
    }

    /// Group `members` by bucket and delete their rows, one batch per bucket.
    pub async fn remove_grouped(&self, tag: &str, members: &[String]) -> GroupedWriteReport {
        let groups = BucketAssignor::group(members.iter().cloned());
        let mut report = GroupedWriteReport {
            buckets: groups.len(),
            ..Default::default()
        };

        for (bucket, bucket_members) in groups {
            match self.remove_members(tag, bucket, &bucket_members).await {
                Ok(()) => report.written += bucket_members.len(),
                Err(e) => {
                    error!(tag_id = tag, bucket = bucket, count = bucket_members.len(), error = %e, "Failed to remove members from bucket");
                    report.failures.push(BucketFailure {
                        bucket,
                        members: bucket_members.len(),
                        error: e,
                    });
                }
            }
        }

        report
    }
}
