//! In-memory backing store
//!
//! Ordered maps behind a tokio mutex. Carries fault knobs so callers can
//! exercise failure paths: failing scans for chosen buckets, failing the
//! presence scan, and failing batch writes after a number of successes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Mutation, WideColumnStore};
use crate::bucket::BucketId;
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    members: BTreeMap<(String, BucketId), BTreeMap<String, i64>>,
    presence: BTreeSet<(String, BucketId)>,
}

#[derive(Default)]
struct Faults {
    failing_buckets: HashSet<BucketId>,
    fail_presence_scan: bool,
    /// Remaining successful batches before writes start failing
    writes_before_failure: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    batches_executed: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans of `bucket` fail until [`MemoryStore::heal`] is called.
    pub async fn fail_bucket_reads(&self, bucket: BucketId) {
        self.faults.lock().await.failing_buckets.insert(bucket);
    }

    pub async fn fail_presence_scan(&self) {
        self.faults.lock().await.fail_presence_scan = true;
    }

    /// Let the next `successes` batches through, then fail every batch.
    pub async fn fail_writes_after(&self, successes: usize) {
        self.faults.lock().await.writes_before_failure = Some(successes);
    }

    /// Clear every fault knob.
    pub async fn heal(&self) {
        *self.faults.lock().await = Faults::default();
    }

    /// Batches applied successfully since creation.
    pub fn batches_executed(&self) -> usize {
        self.batches_executed.load(Ordering::SeqCst)
    }

    /// Total membership rows for `tag` across all buckets.
    pub async fn row_count(&self, tag: &str) -> usize {
        self.tables
            .lock()
            .await
            .members
            .iter()
            .filter(|((t, _), _)| t == tag)
            .map(|(_, rows)| rows.len())
            .sum()
    }

    /// Whether a presence row exists, regardless of the bucket's contents.
    pub async fn has_presence(&self, tag: &str, bucket: BucketId) -> bool {
        self.tables
            .lock()
            .await
            .presence
            .contains(&(tag.to_string(), bucket))
    }

    /// Insert a presence row without rows, as left behind by single removes.
    pub async fn insert_stale_presence(&self, tag: &str, bucket: BucketId) {
        self.tables
            .lock()
            .await
            .presence
            .insert((tag.to_string(), bucket));
    }
}

#[async_trait]
impl WideColumnStore for MemoryStore {
    async fn scan_members(
        &self,
        tag: &str,
        bucket: BucketId,
        after: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        if self.faults.lock().await.failing_buckets.contains(&bucket) {
            return Err(StoreError::Query(format!(
                "injected read failure for bucket {bucket}"
            )));
        }

        let tables = self.tables.lock().await;
        let Some(rows) = tables.members.get(&(tag.to_string(), bucket)) else {
            return Ok(Vec::new());
        };

        let lower = if after.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(after.to_string())
        };

        Ok(rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn scan_presence(&self, tag: &str) -> Result<Vec<BucketId>, StoreError> {
        if self.faults.lock().await.fail_presence_scan {
            return Err(StoreError::Unavailable(
                "injected presence scan failure".to_string(),
            ));
        }

        let tables = self.tables.lock().await;
        Ok(tables
            .presence
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, bucket)| *bucket)
            .collect())
    }

    async fn scan_tag_ids(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        let tags: BTreeSet<&String> = tables.presence.iter().map(|(t, _)| t).collect();
        Ok(tags.into_iter().cloned().collect())
    }

    async fn execute_batch(&self, batch: Vec<Mutation>) -> Result<(), StoreError> {
        {
            let mut faults = self.faults.lock().await;
            if let Some(remaining) = faults.writes_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(StoreError::Write("injected batch failure".to_string()));
                }
                *remaining -= 1;
            }
        }

        let mut tables = self.tables.lock().await;
        for mutation in batch {
            match mutation {
                Mutation::PutMember {
                    tag,
                    bucket,
                    member,
                    created,
                } => {
                    tables
                        .members
                        .entry((tag, bucket))
                        .or_default()
                        .insert(member, created);
                }
                Mutation::PutPresence { tag, bucket } => {
                    tables.presence.insert((tag, bucket));
                }
                Mutation::DeleteMember {
                    tag,
                    bucket,
                    member,
                } => {
                    let key = (tag, bucket);
                    if let Some(rows) = tables.members.get_mut(&key) {
                        rows.remove(&member);
                        if rows.is_empty() {
                            tables.members.remove(&key);
                        }
                    }
                }
                Mutation::DeleteBucketMembers { tag, bucket } => {
                    tables.members.remove(&(tag, bucket));
                }
                Mutation::DeletePresence { tag, bucket } => {
                    tables.presence.remove(&(tag, bucket));
                }
            }
        }

        self.batches_executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
