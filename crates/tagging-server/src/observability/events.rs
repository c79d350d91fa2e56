//! Structured Events
//!
//! One function per event type so field names stay consistent across the
//! service. Every event carries an `event_type` field.
//!
//! Event types:
//! - `sync_completed` - add or remove finished
//! - `inconsistent_write` - registry confirmed members the store failed to keep
//! - `tag_deleted` - a tag was fully deleted
//! - `tag_delete_partial` - a deletion stopped part way
//! - `migration_started` - a migration job began
//! - `migration_finished` - a migration job ended

use tagging_core::SyncReport;
use tracing::{error, info, warn};

/// Emit a sync completed event, at warn level when the registry rejected
/// part of the batch
pub fn sync_completed(op: &str, tag_id: &str, report: &SyncReport) {
    if report.partial_failure() {
        warn!(
            event_type = "sync_completed",
            op = %op,
            tag_id = %tag_id,
            requested = report.requested,
            confirmed = report.confirmed,
            committed = report.committed,
            rejected = report.rejected(),
            "Sync completed with rejected members"
        );
    } else {
        info!(
            event_type = "sync_completed",
            op = %op,
            tag_id = %tag_id,
            requested = report.requested,
            confirmed = report.confirmed,
            committed = report.committed,
            "Sync completed"
        );
    }
}

/// Emit an inconsistent write event
pub fn inconsistent_write(op: &str, tag_id: &str, confirmed: usize, error: &str) {
    error!(
        event_type = "inconsistent_write",
        op = %op,
        tag_id = %tag_id,
        confirmed = confirmed,
        error = %error,
        "Registry and store diverged"
    );
}

pub fn tag_deleted(tag_id: &str, buckets: usize, members: usize) {
    info!(
        event_type = "tag_deleted",
        tag_id = %tag_id,
        buckets = buckets,
        members = members,
        "Tag deleted"
    );
}

/// Emit a partial delete event
pub fn tag_delete_partial(tag_id: &str, buckets_deleted: usize, buckets_total: usize, members_removed: usize) {
    warn!(
        event_type = "tag_delete_partial",
        tag_id = %tag_id,
        buckets_deleted = buckets_deleted,
        buckets_total = buckets_total,
        members_removed = members_removed,
        "Tag deletion incomplete"
    );
}

pub fn migration_started(job_id: &str) {
    info!(
        event_type = "migration_started",
        job_id = %job_id,
        "Migration started"
    );
}

/// Emit a migration finished event
pub fn migration_finished(job_id: &str, status: &str, succeeded: usize, failed: usize, skipped: usize, duration_secs: f64) {
    info!(
        event_type = "migration_finished",
        job_id = %job_id,
        status = %status,
        succeeded = succeeded,
        failed = failed,
        skipped = skipped,
        duration_secs = duration_secs,
        "Migration finished"
    );
}
