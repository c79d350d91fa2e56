//! Wide-column backing store contract
//!
//! Two logical tables:
//! - membership rows keyed by `(tag, bucket, member)` holding the creation timestamp
//! - presence rows keyed by `(tag, bucket)`
//!
//! Batches are unlogged: the backend may apply part of a batch before failing.

use async_trait::async_trait;

use crate::bucket::BucketId;
use crate::error::StoreError;

mod memory;

pub use memory::MemoryStore;

/// A single row change inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Upsert a membership row. Re-inserting an existing key is a no-op apart
    /// from refreshing `created`.
    PutMember {
        tag: String,
        bucket: BucketId,
        member: String,
        created: i64,
    },
    /// Upsert the presence row for a bucket.
    PutPresence { tag: String, bucket: BucketId },
    DeleteMember {
        tag: String,
        bucket: BucketId,
        member: String,
    },
    /// Delete every membership row in the bucket.
    DeleteBucketMembers { tag: String, bucket: BucketId },
    DeletePresence { tag: String, bucket: BucketId },
}

impl Mutation {
    pub fn bucket(&self) -> BucketId {
        match self {
            Self::PutMember { bucket, .. }
            | Self::PutPresence { bucket, .. }
            | Self::DeleteMember { bucket, .. }
            | Self::DeleteBucketMembers { bucket, .. }
            | Self::DeletePresence { bucket, .. } => *bucket,
        }
    }
}

#[async_trait]
pub trait WideColumnStore: Send + Sync {
    /// Up to `limit` members of one bucket strictly greater than `after`
    /// (empty `after` starts at the beginning), in natural key order.
    async fn scan_members(
        &self,
        tag: &str,
        bucket: BucketId,
        after: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Buckets with a presence row for `tag`, in the store's enumeration order.
    async fn scan_presence(&self, tag: &str) -> Result<Vec<BucketId>, StoreError>;

    /// Distinct tags with at least one presence row.
    async fn scan_tag_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Apply an unlogged batch.
    async fn execute_batch(&self, batch: Vec<Mutation>) -> Result<(), StoreError>;
}
