//! Data models for tagging-core

use serde::{Deserialize, Serialize};

/// One page of a paginated member read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersPage {
    /// Members in bucket order, natural key order within a bucket
    pub data: Vec<String>,
    /// Opaque resume token, absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Result of a non-paginated read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersSnapshot {
    pub members: Vec<String>,
    /// The read stopped at the configured ceiling
    pub truncated: bool,
}

/// Outcome of a registry-first add or remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Members in the request
    pub requested: usize,
    /// Members the registry accepted
    pub confirmed: usize,
    /// Members written to (or removed from) the bucketed store
    pub committed: usize,
}

impl SyncReport {
    /// Some members were rejected by the registry. Non-fatal: the confirmed
    /// subset was still committed.
    pub fn partial_failure(&self) -> bool {
        self.confirmed < self.requested
    }

    pub fn rejected(&self) -> usize {
        self.requested.saturating_sub(self.confirmed)
    }
}

/// Outcome of a completed tag deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub buckets_deleted: usize,
    pub members_removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_report_partial_failure() {
        let full = SyncReport {
            requested: 5,
            confirmed: 5,
            committed: 5,
        };
        assert!(!full.partial_failure());

        let partial = SyncReport {
            requested: 5,
            confirmed: 3,
            committed: 3,
        };
        assert!(partial.partial_failure());
        assert_eq!(partial.rejected(), 2);
    }

    #[test]
    fn test_page_serialization() {
        let page = MembersPage {
            data: vec!["A".to_string()],
            next_cursor: None,
            has_more: false,
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json, serde_json::json!({"data": ["A"], "hasMore": false}));
    }
}
