//! MigrationJobActor Message Types

use chrono::{DateTime, Utc};
use kameo::Reply;
use serde::{Deserialize, Serialize};
use tagging_core::migration::{MigrationProgress, MigrationReport};

/// Start a migration run.
#[derive(Debug, Clone)]
pub struct StartMigration;

/// Ask the running migration to stop at its next checkpoint.
#[derive(Debug, Clone)]
pub struct CancelMigration;

/// Get the current job status.
#[derive(Debug, Clone)]
pub struct GetMigrationStatus;

/// Lifecycle of the migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// No migration has run since startup
    Idle,
    Running,
    Completed,
    /// Finished with at least one migrated and at least one failed tag
    #[serde(rename = "completed_with_errors")]
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::CompletedWithErrors => write!(f, "completed_with_errors"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of the migration job.
#[derive(Debug, Clone, Serialize, Deserialize, Reply)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<MigrationProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MigrationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a start request.
#[derive(Debug, Clone, Reply)]
pub enum StartOutcome {
    Started(MigrationJobStatus),
    AlreadyRunning(MigrationJobStatus),
}

/// Result of a cancel request.
#[derive(Debug, Clone, Reply)]
pub enum CancelOutcome {
    /// Cancellation was requested; the run stops at its next checkpoint
    Cancelling(MigrationJobStatus),
    NotRunning(MigrationJobStatus),
}
