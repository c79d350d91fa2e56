//! Pagination cursors
//!
//! A cursor is the URL-safe base64 (padded) encoding of a small JSON object:
//! `{"bucketId":N,"lastMember":"...","totalCollected":N}`. `lastMember` is
//! omitted when empty. Clients treat it as opaque.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bucket::{BucketAssignor, BucketId};

/// Resume position for a paginated scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub bucket_id: BucketId,
    /// Members strictly greater than this are returned next. Empty means
    /// the start of the bucket.
    pub last_member: String,
    pub total_collected: u64,
}

impl Cursor {
    pub fn new(bucket_id: BucketId, last_member: impl Into<String>, total_collected: u64) -> Self {
        Self {
            bucket_id,
            last_member: last_member.into(),
            total_collected,
        }
    }

    /// Cursor pointing at the very beginning of a tag.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_start(&self) -> bool {
        self.bucket_id == 0 && self.last_member.is_empty() && self.total_collected == 0
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCursor {
    bucket_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    last_member: String,
    #[serde(default)]
    total_collected: i64,
}

/// Encodes and decodes cursors. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorCodec;

impl CursorCodec {
    pub fn encode(cursor: &Cursor) -> String {
        let wire = WireCursor {
            bucket_id: i64::from(cursor.bucket_id),
            last_member: cursor.last_member.clone(),
            total_collected: i64::try_from(cursor.total_collected).unwrap_or(i64::MAX),
        };
        // Serializing a struct of integers and a string cannot fail
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        URL_SAFE.encode(json)
    }

    /// Decode a cursor string. Empty input is the start cursor. Malformed or
    /// out-of-range input also yields the start cursor, with a warning.
    pub fn decode(raw: &str) -> Cursor {
        if raw.is_empty() {
            return Cursor::start();
        }

        match Self::try_decode(raw) {
            Ok(cursor) => cursor,
            Err(reason) => {
                warn!(cursor = raw, reason = %reason, "Invalid pagination cursor, restarting from the first bucket");
                Cursor::start()
            }
        }
    }

    fn try_decode(raw: &str) -> Result<Cursor, String> {
        let bytes = URL_SAFE
            .decode(raw.as_bytes())
            .map_err(|e| format!("base64: {e}"))?;
        let wire: WireCursor =
            serde_json::from_slice(&bytes).map_err(|e| format!("json: {e}"))?;

        if !BucketAssignor::is_valid(wire.bucket_id) {
            return Err(format!("bucket {} out of range", wire.bucket_id));
        }
        if wire.total_collected < 0 {
            return Err(format!("negative total {}", wire.total_collected));
        }

        Ok(Cursor {
            bucket_id: wire.bucket_id as BucketId,
            last_member: wire.last_member,
            total_collected: wire.total_collected as u64,
        })
    }
}
