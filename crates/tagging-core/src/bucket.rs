//! Bucket Assignment
//!
//! Maps a member to one of `BUCKET_COUNT` buckets with a 32-bit FNV-1a hash of
//! the member's bytes. The mapping is part of the persisted layout: changing
//! the hash or the bucket count orphans every row already written.

use std::collections::BTreeMap;

/// Bucket identifier in `[0, BUCKET_COUNT)`.
pub type BucketId = u32;

/// Number of buckets per tag.
pub const BUCKET_COUNT: u32 = 1000;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Stateless member-to-bucket mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketAssignor;

impl BucketAssignor {
    /// Bucket owning `member`.
    pub fn bucket_of(member: &str) -> BucketId {
        fnv1a_32(member.as_bytes()) % BUCKET_COUNT
    }

    /// Whether `bucket_id` is inside the valid range.
    pub fn is_valid(bucket_id: i64) -> bool {
        (0..BUCKET_COUNT as i64).contains(&bucket_id)
    }

    /// Group members by bucket, preserving input order within each bucket.
    pub fn group<I, S>(members: I) -> BTreeMap<BucketId, Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut groups: BTreeMap<BucketId, Vec<String>> = BTreeMap::new();
        for member in members {
            let member = member.into();
            groups
                .entry(Self::bucket_of(&member))
                .or_default()
                .push(member);
        }
        groups
    }
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
