//! Legacy store migration
//!
//! Copies every legacy tag into the bucketed store. Each tag's members are
//! re-verified against the registry first; only members the registry lists
//! under the tag are written, in batches of the max batch size. Verification
//! of a tag always completes before any of its writes start.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TaggingConfig;
use crate::error::{LegacyError, TaggingError, TaggingResult};
use crate::legacy::LegacyTagSource;
use crate::normalize::set_tag_prefix;
use crate::store::BucketedStore;
use crate::sync::RegistrySyncCoordinator;

/// Why a tag was left out of the migration. Skips are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TagNotFound,
    NoMembers,
    TypeConversionError,
    NoVerifiedMembers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    LegacyReadFailed,
    DatabaseWriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Migrated,
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl TagOutcome {
    /// Metric label for the outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Overall result of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// At least one tag migrated and none failed
    Completed,
    CompletedWithErrors,
    /// Nothing migrated
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMigrationStats {
    pub total_members: usize,
    pub members_written: usize,
    pub members_missing_in_registry: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub total_tags: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub total_members: usize,
    pub total_members_written: usize,
    pub total_members_missing_in_registry: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSkip {
    pub tag_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub status: MigrationStatus,
    pub summary: MigrationSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_tags: Vec<TagSkip>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Live counters for a running migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub total_tags: usize,
    pub processed_tags: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tag: Option<String>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub current_tag_total_members: usize,
    pub current_tag_members_written: usize,
    pub current_tag_members_missing_in_registry: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSummary {
    pub total_tags: usize,
    pub total_members: usize,
}

/// What a migration would do, without touching the registry or the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub summary: DryRunSummary,
    /// Member count per tag that would be migrated
    pub tags: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Receives progress snapshots while a migration runs.
pub type ProgressFn = dyn Fn(&MigrationProgress) + Send + Sync;

#[derive(Clone)]
pub struct Migrator {
    legacy: Arc<dyn LegacyTagSource>,
    store: BucketedStore,
    coordinator: RegistrySyncCoordinator,
    config: TaggingConfig,
}

impl Migrator {
    pub fn new(
        legacy: Arc<dyn LegacyTagSource>,
        store: BucketedStore,
        coordinator: RegistrySyncCoordinator,
        config: TaggingConfig,
    ) -> Self {
        Self {
            legacy,
            store,
            coordinator,
            config,
        }
    }

    pub async fn dry_run(&self) -> TaggingResult<DryRunReport> {
        let tag_ids = self.legacy.tag_ids().await?;
        info!(tags = tag_ids.len(), "Analyzing legacy tags");

        let mut report = DryRunReport {
            summary: DryRunSummary {
                total_tags: tag_ids.len(),
                total_members: 0,
            },
            ..Default::default()
        };

        for tag_id in tag_ids {
            match self.legacy.members(&set_tag_prefix(&tag_id)).await {
                Ok(Some(members)) if members.is_empty() => report
                    .warnings
                    .push(format!("Tag '{tag_id}' has no members, will be skipped during migration")),
                Ok(Some(members)) => {
                    report.summary.total_members += members.len();
                    report.tags.insert(tag_id, members.len());
                }
                Ok(None) => report.warnings.push(format!(
                    "Tag '{tag_id}' not found in legacy store, will be skipped during migration"
                )),
                Err(LegacyError::Malformed { .. }) => report.warnings.push(format!(
                    "Tag '{tag_id}' has type conversion error, will be skipped during migration"
                )),
                Err(e) => report
                    .warnings
                    .push(format!("Tag '{tag_id}' could not be read: {e}")),
            }
        }

        info!(
            tags = report.tags.len(),
            members = report.summary.total_members,
            warnings = report.warnings.len(),
            "Dry run completed"
        );
        Ok(report)
    }

    /// Migrate every legacy tag. Checks `cancel` between tags and between
    /// write batches; a cancelled run still returns a report of what was done.
    pub async fn run(&self, cancel: &CancellationToken, on_progress: &ProgressFn) -> TaggingResult<MigrationReport> {
        let start_time = Utc::now();
        let tag_ids = self.legacy.tag_ids().await?;
        info!(tags = tag_ids.len(), "Starting legacy migration");

        let mut progress = MigrationProgress {
            total_tags: tag_ids.len(),
            ..Default::default()
        };
        on_progress(&progress);

        let mut summary = MigrationSummary {
            total_tags: tag_ids.len(),
            ..Default::default()
        };
        let mut failed_tags = Vec::new();
        let mut skipped_tags = Vec::new();
        let mut cancelled = false;

        for tag_id in tag_ids {
            if cancel.is_cancelled() {
                warn!(processed = progress.processed_tags, total = progress.total_tags, "Migration cancelled");
                cancelled = true;
                break;
            }

            progress.current_tag = Some(tag_id.clone());
            progress.current_tag_total_members = 0;
            progress.current_tag_members_written = 0;
            progress.current_tag_members_missing_in_registry = 0;
            on_progress(&progress);

            let (outcome, stats) = match self.migrate_tag(&tag_id, cancel, &mut progress, on_progress).await {
                Ok(result) => result,
                Err(TaggingError::Cancelled) => {
                    warn!(tag_id = %tag_id, "Migration cancelled mid-tag");
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            summary.total_members += stats.total_members;
            summary.total_members_written += stats.members_written;
            summary.total_members_missing_in_registry += stats.members_missing_in_registry;

            match outcome {
                TagOutcome::Migrated => {
                    summary.success_count += 1;
                    progress.success_count += 1;
                }
                TagOutcome::Skipped(reason) => {
                    summary.skipped_count += 1;
                    progress.skipped_count += 1;
                    skipped_tags.push(TagSkip {
                        tag_id: tag_id.clone(),
                        reason,
                    });
                }
                TagOutcome::Failed(reason) => {
                    error!(tag_id = %tag_id, reason = %reason, "Failed to migrate tag");
                    summary.failure_count += 1;
                    progress.failure_count += 1;
                    failed_tags.push(tag_id.clone());
                }
            }
            metrics::counter!("tagging_migration_tags_total", "outcome" => outcome.label()).increment(1);

            progress.processed_tags += 1;
            on_progress(&progress);
        }

        let status = if cancelled {
            MigrationStatus::Cancelled
        } else if summary.failure_count == 0 && summary.success_count > 0 {
            MigrationStatus::Completed
        } else if summary.success_count > 0 {
            MigrationStatus::CompletedWithErrors
        } else {
            MigrationStatus::Failed
        };

        let end_time = Utc::now();
        let duration_seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        info!(
            status = %status,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            skipped = summary.skipped_count,
            duration_seconds = duration_seconds,
            "Legacy migration finished"
        );

        Ok(MigrationReport {
            status,
            summary,
            failed_tags,
            skipped_tags,
            start_time,
            end_time,
            duration_seconds,
        })
    }

    async fn migrate_tag(
        &self,
        tag_id: &str,
        cancel: &CancellationToken,
        progress: &mut MigrationProgress,
        on_progress: &ProgressFn,
    ) -> TaggingResult<(TagOutcome, TagMigrationStats)> {
        let mut stats = TagMigrationStats::default();

        let members = match self.legacy.members(&set_tag_prefix(tag_id)).await {
            Ok(Some(members)) => members,
            Ok(None) => {
                warn!(tag_id = tag_id, "Tag not found in legacy store, skipping");
                return Ok((TagOutcome::Skipped(SkipReason::TagNotFound), stats));
            }
            Err(LegacyError::Malformed { reason, .. }) => {
                error!(tag_id = tag_id, reason = %reason, "Legacy tag cannot be decoded, skipping");
                return Ok((TagOutcome::Skipped(SkipReason::TypeConversionError), stats));
            }
            Err(e) => {
                error!(tag_id = tag_id, error = %e, "Failed to read legacy tag");
                return Ok((TagOutcome::Failed(FailureReason::LegacyReadFailed), stats));
            }
        };

        if members.is_empty() {
            warn!(tag_id = tag_id, "Tag has no members, skipping");
            return Ok((TagOutcome::Skipped(SkipReason::NoMembers), stats));
        }

        stats.total_members = members.len();
        progress.current_tag_total_members = members.len();
        on_progress(&*progress);
        info!(tag_id = tag_id, members = members.len(), "Migrating tag");

        let verified = self
            .coordinator
            .verify_members(tag_id, members.into_iter().collect(), cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(TaggingError::Cancelled);
        }

        stats.members_missing_in_registry = stats.total_members - verified.len();
        progress.current_tag_members_missing_in_registry = stats.members_missing_in_registry;
        on_progress(&*progress);

        if verified.is_empty() {
            warn!(tag_id = tag_id, "No members verified in registry, skipping");
            return Ok((TagOutcome::Skipped(SkipReason::NoVerifiedMembers), stats));
        }
        if stats.members_missing_in_registry > 0 {
            warn!(
                tag_id = tag_id,
                verified = verified.len(),
                total = stats.total_members,
                "Only part of the tag is present in registry"
            );
        }

        let created = Utc::now().timestamp_millis();
        for batch in verified.chunks(self.config.max_batch_size.max(1)) {
            if cancel.is_cancelled() {
                warn!(tag_id = tag_id, written = stats.members_written, total = verified.len(), "Batch write cancelled");
                return Err(TaggingError::Cancelled);
            }

            let report = self.store.add_grouped(tag_id, batch, created).await;
            stats.members_written += report.written;
            progress.current_tag_members_written += report.written;
            on_progress(&*progress);
            if !report.is_complete() {
                error!(
                    tag_id = tag_id,
                    failed = report.failed_members(),
                    batch = batch.len(),
                    "Batch write partially failed"
                );
            } else {
                debug!(tag_id = tag_id, batch = batch.len(), "Wrote batch");
            }
        }

        if stats.members_written < verified.len() {
            return Ok((TagOutcome::Failed(FailureReason::DatabaseWriteFailed), stats));
        }

        info!(
            tag_id = tag_id,
            verified = verified.len(),
            total = stats.total_members,
            "Tag migrated"
        );
        Ok((TagOutcome::Migrated, stats))
    }
}
