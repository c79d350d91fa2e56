//! Migration Control Endpoints
//!
//! `POST /taggingService/tags/migration?command=dryRun|start|cancel` and
//! `GET /taggingService/tags/migration/status`.

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::migration_job::{
    CancelMigration, CancelOutcome, GetMigrationStatus, MigrationJobStatus, StartMigration,
    StartOutcome,
};
use crate::observability::metrics::record_request;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use strum::EnumString;

#[derive(Debug, Deserialize)]
pub struct MigrationQuery {
    pub command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "camelCase")]
enum MigrationCommand {
    DryRun,
    Start,
    Cancel,
}

fn parse_command(raw: Option<&str>) -> ApiResult<MigrationCommand> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("command parameter is required".to_string()))?;
    raw.parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "invalid command '{raw}', expected one of dryRun, start, cancel"
        ))
    })
}

fn actor_gone(e: impl std::fmt::Display) -> ApiError {
    ApiError::Unavailable(format!("migration job unavailable: {e}"))
}

/// POST /taggingService/tags/migration
#[tracing::instrument(skip(state))]
pub async fn control_migration(
    State(state): State<AppState>,
    Query(query): Query<MigrationQuery>,
) -> ApiResult<Response> {
    match parse_command(query.command.as_deref())? {
        MigrationCommand::DryRun => {
            let report = state.migrator.dry_run().await?;
            record_request("migration_dry_run", 200);
            Ok(Json(report).into_response())
        }
        MigrationCommand::Start => {
            match state.migration_job.ask(StartMigration).send().await.map_err(actor_gone)? {
                StartOutcome::Started(status) => {
                    record_request("migration_start", 202);
                    Ok((StatusCode::ACCEPTED, Json(status)).into_response())
                }
                StartOutcome::AlreadyRunning(_) => {
                    Err(ApiError::Conflict("Migration is already running".to_string()))
                }
            }
        }
        MigrationCommand::Cancel => {
            match state.migration_job.ask(CancelMigration).send().await.map_err(actor_gone)? {
                CancelOutcome::Cancelling(status) => {
                    record_request("migration_cancel", 200);
                    Ok(Json(status).into_response())
                }
                CancelOutcome::NotRunning(_) => {
                    Err(ApiError::BadRequest("No migration is currently running".to_string()))
                }
            }
        }
    }
}

/// GET /taggingService/tags/migration/status
#[tracing::instrument(skip(state))]
pub async fn migration_status(State(state): State<AppState>) -> ApiResult<Json<MigrationJobStatus>> {
    let status = state
        .migration_job
        .ask(GetMigrationStatus)
        .send()
        .await
        .map_err(actor_gone)?;
    record_request("migration_status", 200);
    Ok(Json(status))
}
