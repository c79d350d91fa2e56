//! MigrationJobActor Implementation
//!
//! Owns the state of the single migration job. The run itself happens in a
//! spawned task; the actor watches its progress through a watch channel and
//! collects the final report once the task has finished.

use super::messages::{
    CancelMigration, CancelOutcome, GetMigrationStatus, JobState, MigrationJobStatus,
    StartMigration, StartOutcome,
};
use crate::observability::events;
use chrono::{DateTime, Utc};
use kameo::{
    message::{Context, Message},
    Actor,
};
use tagging_core::migration::{MigrationProgress, MigrationReport, MigrationStatus, Migrator};
use tagging_core::TaggingError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RunningJob {
    handle: JoinHandle<Result<MigrationReport, TaggingError>>,
    progress: watch::Receiver<MigrationProgress>,
    cancel: CancellationToken,
}

/// Actor serialising start, cancel and status requests for migrations.
#[derive(Actor)]
pub struct MigrationJobActor {
    migrator: Migrator,
    state: JobState,
    job_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    running: Option<RunningJob>,
    /// Last progress seen from a finished run
    last_progress: Option<MigrationProgress>,
    report: Option<MigrationReport>,
    error: Option<String>,
}

impl MigrationJobActor {
    pub fn new(migrator: Migrator) -> Self {
        Self {
            migrator,
            state: JobState::Idle,
            job_id: None,
            started_at: None,
            ended_at: None,
            running: None,
            last_progress: None,
            report: None,
            error: None,
        }
    }

    /// Fold a finished run back into the job state.
    async fn reap(&mut self) {
        let finished = self
            .running
            .as_ref()
            .is_some_and(|job| job.handle.is_finished());
        if !finished {
            return;
        }
        let Some(job) = self.running.take() else {
            return;
        };

        self.last_progress = Some(job.progress.borrow().clone());
        self.ended_at = Some(Utc::now());

        match job.handle.await {
            Ok(Ok(report)) => {
                self.state = match report.status {
                    MigrationStatus::Completed => JobState::Completed,
                    MigrationStatus::CompletedWithErrors => JobState::CompletedWithErrors,
                    MigrationStatus::Failed => JobState::Failed,
                    MigrationStatus::Cancelled => JobState::Cancelled,
                };
                self.ended_at = Some(report.end_time);
                self.report = Some(report);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Migration aborted");
                self.state = JobState::Failed;
                self.error = Some(e.to_string());
            }
            Err(e) => {
                error!(error = %e, "Migration task panicked");
                self.state = JobState::Failed;
                self.error = Some(format!("migration task failed: {e}"));
            }
        }
    }

    fn status(&self) -> MigrationJobStatus {
        let progress = match &self.running {
            Some(job) => Some(job.progress.borrow().clone()),
            None => self.last_progress.clone(),
        };
        let end = self.ended_at.or_else(|| self.running.as_ref().map(|_| Utc::now()));
        let duration_seconds = self
            .started_at
            .zip(end)
            .map(|(start, end)| (end - start).num_milliseconds() as f64 / 1000.0);

        MigrationJobStatus {
            state: self.state,
            job_id: self.job_id.clone(),
            start_time: self.started_at,
            end_time: self.ended_at,
            duration_seconds,
            progress,
            result: self.report.clone(),
            error: self.error.clone(),
        }
    }

    fn spawn_run(&mut self) {
        let job_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(MigrationProgress::default());

        let migrator = self.migrator.clone();
        let task_cancel = cancel.clone();
        let task_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            let report_progress = move |progress: &MigrationProgress| {
                progress_tx.send_replace(progress.clone());
            };
            let result = migrator.run(&task_cancel, &report_progress).await;
            match &result {
                Ok(report) => events::migration_finished(
                    &task_job_id,
                    &report.status.to_string(),
                    report.summary.success_count,
                    report.summary.failure_count,
                    report.summary.skipped_count,
                    report.duration_seconds,
                ),
                Err(e) => events::migration_finished(&task_job_id, &format!("error: {e}"), 0, 0, 0, 0.0),
            }
            result
        });

        events::migration_started(&job_id);
        self.state = JobState::Running;
        self.job_id = Some(job_id);
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.last_progress = None;
        self.report = None;
        self.error = None;
        self.running = Some(RunningJob {
            handle,
            progress: progress_rx,
            cancel,
        });
    }
}

impl Message<StartMigration> for MigrationJobActor {
    type Reply = StartOutcome;

    async fn handle(
        &mut self,
        _msg: StartMigration,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reap().await;
        if self.running.is_some() {
            warn!(job_id = ?self.job_id, "Migration already running");
            return StartOutcome::AlreadyRunning(self.status());
        }

        self.spawn_run();
        info!(job_id = ?self.job_id, "Migration job started");
        StartOutcome::Started(self.status())
    }
}

impl Message<CancelMigration> for MigrationJobActor {
    type Reply = CancelOutcome;

    async fn handle(
        &mut self,
        _msg: CancelMigration,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reap().await;
        match &self.running {
            Some(job) => {
                job.cancel.cancel();
                info!(job_id = ?self.job_id, "Migration cancellation requested");
                CancelOutcome::Cancelling(self.status())
            }
            None => CancelOutcome::NotRunning(self.status()),
        }
    }
}

impl Message<GetMigrationStatus> for MigrationJobActor {
    type Reply = MigrationJobStatus;

    async fn handle(
        &mut self,
        _msg: GetMigrationStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reap().await;
        self.status()
    }
}
