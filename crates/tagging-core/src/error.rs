//! Error kinds
//!
//! Collaborator failures (`StoreError`, `RegistryError`, `LegacyError`) are kept
//! separate from the operation-level `TaggingError` so callers can branch on kind
//! instead of matching message text.

use thiserror::Error;

/// Failure reported by the wide-column backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("backing store query failed: {0}")]
    Query(String),
    #[error("backing store batch write failed: {0}")]
    Write(String),
    #[error("malformed row in backing store: {0}")]
    Corrupt(String),
}

/// Failure reported by the group registry client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("registry transport error: {0}")]
    Transport(String),
    #[error("registry response could not be decoded: {0}")]
    Decode(String),
}

/// Failure reported by the legacy tag store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LegacyError {
    #[error("legacy store read failed: {0}")]
    Read(String),
    #[error("legacy tag {tag_id} is malformed: {reason}")]
    Malformed { tag_id: String, reason: String },
}

/// Operation-level error returned by the tagging services.
#[derive(Debug, Error)]
pub enum TaggingError {
    /// The tag has no populated buckets.
    #[error("{tag_id} tag not found")]
    NotFound { tag_id: String },

    /// The member list was empty.
    #[error("member list is empty")]
    EmptyBatch,

    /// The member list exceeds the configured batch limit.
    #[error("batch size {size} exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// The registry accepted the change but the bucketed store did not.
    /// The two systems have diverged and the operation must be retried.
    #[error("registry confirmed {confirmed} members for tag {tag_id} but the store write failed: {source}")]
    InconsistentWrite {
        tag_id: String,
        confirmed: usize,
        #[source]
        source: StoreError,
    },

    /// Tag deletion stopped before every bucket was removed. Safe to re-invoke.
    #[error(
        "partial deletion of tag {tag_id}: {buckets_deleted}/{buckets_total} buckets deleted, {members_removed} members removed"
    )]
    PartialDelete {
        tag_id: String,
        buckets_deleted: usize,
        buckets_total: usize,
        members_removed: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
}

impl TaggingError {
    pub fn not_found(tag_id: impl Into<String>) -> Self {
        Self::NotFound {
            tag_id: tag_id.into(),
        }
    }

    /// Validation errors are raised before any I/O takes place.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyBatch | Self::BatchTooLarge { .. })
    }

    /// Errors after which re-invoking the same operation is expected to converge.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InconsistentWrite { .. } | Self::PartialDelete { .. } | Self::Store(_)
        )
    }
}

pub type TaggingResult<T> = Result<T, TaggingError>;
