//! Tag Endpoints
//!
//! Membership reads and writes under `/taggingService/tags`.

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::observability::{events, metrics::record_request};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tagging_core::{MembersSnapshot, SyncReport, TaggingError};

/// Response for GET /taggingService/tags/{tag}
#[derive(Debug, Serialize)]
pub struct TagResponse {
    pub id: String,
    pub members: Vec<String>,
}

/// Query for GET /taggingService/tags/{tag}/members
#[derive(Debug, Default, Deserialize)]
pub struct MembersQuery {
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

/// Path segments routed to other handlers under `/taggingService/tags/`.
/// A tag with one of these ids could be written but never read back.
pub const RESERVED_TAG_IDS: [&str; 2] = ["migration", "members"];

fn check_writable_tag(tag: &str) -> ApiResult<()> {
    if RESERVED_TAG_IDS.contains(&tag) {
        return Err(ApiError::BadRequest(format!("tag id '{tag}' is reserved")));
    }
    Ok(())
}

/// 206 when the read stopped at the ceiling
fn snapshot_status(snapshot: &MembersSnapshot) -> StatusCode {
    if snapshot.truncated {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    }
}

/// Parse a caller-supplied page size. Missing means the default page size.
fn parse_limit(raw: Option<&str>, max: usize) -> ApiResult<usize> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    let limit: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid limit '{raw}'")))?;
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }
    if limit as u64 > max as u64 {
        return Err(ApiError::BadRequest(format!("limit {limit} exceeds maximum {max}")));
    }
    Ok(limit as usize)
}

/// GET /taggingService/tags - every tag with at least one populated bucket
#[tracing::instrument(skip(state))]
pub async fn list_tags(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let tags = state.store.tag_ids().await.map_err(TaggingError::from)?;
    record_request("list_tags", 200);
    Ok(Json(tags))
}

/// GET /taggingService/tags/{tag}
#[tracing::instrument(skip(state))]
pub async fn get_tag(State(state): State<AppState>, Path(tag): Path<String>) -> ApiResult<Response> {
    let snapshot = state.reader.read_all(&tag).await?;
    let status = snapshot_status(&snapshot);
    record_request("get_tag", status.as_u16());

    let body = TagResponse {
        id: tag,
        members: snapshot.members,
    };
    Ok((status, Json(body)).into_response())
}

/// DELETE /taggingService/tags/{tag}
#[tracing::instrument(skip(state))]
pub async fn delete_tag(State(state): State<AppState>, Path(tag): Path<String>) -> ApiResult<StatusCode> {
    match state.bulk.delete_tag(&tag).await {
        Ok(report) => {
            events::tag_deleted(&tag, report.buckets_deleted, report.members_removed);
            record_request("delete_tag", 204);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            if let TaggingError::PartialDelete {
                buckets_deleted,
                buckets_total,
                members_removed,
                ..
            } = &e
            {
                events::tag_delete_partial(&tag, *buckets_deleted, *buckets_total, *members_removed);
            }
            Err(e.into())
        }
    }
}

/// GET /taggingService/tags/{tag}/members
///
/// Paginated when `limit` or `cursor` is given; otherwise the full member
/// list as a plain array.
#[tracing::instrument(skip(state, query))]
pub async fn get_members(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<MembersQuery>,
) -> ApiResult<Response> {
    if query.limit.is_none() && query.cursor.is_none() {
        let snapshot = state.reader.read_all(&tag).await?;
        let status = snapshot_status(&snapshot);
        record_request("get_members", status.as_u16());
        return Ok((status, Json(snapshot.members)).into_response());
    }

    let limit = parse_limit(query.limit.as_deref(), state.config.max_page_size)?;
    let cursor = query.cursor.unwrap_or_default();
    let page = state.reader.page(&tag, limit, &cursor).await?;
    record_request("get_members_page", 200);
    Ok(Json(page).into_response())
}

fn sync_outcome(op: &str, tag: &str, result: Result<SyncReport, TaggingError>) -> ApiResult<SyncReport> {
    match result {
        Ok(report) => {
            events::sync_completed(op, tag, &report);
            Ok(report)
        }
        Err(e) => {
            if let TaggingError::InconsistentWrite { confirmed, source, .. } = &e {
                events::inconsistent_write(op, tag, *confirmed, &source.to_string());
            }
            Err(e.into())
        }
    }
}

/// PUT /taggingService/tags/{tag}/members
#[tracing::instrument(skip(state, members), fields(count = members.len()))]
pub async fn add_members(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Json(members): Json<Vec<String>>,
) -> ApiResult<(StatusCode, Json<SyncReport>)> {
    check_writable_tag(&tag)?;
    let result = state.coordinator.add_members(&tag, members).await;
    let report = sync_outcome("add", &tag, result)?;
    record_request("add_members", 202);
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// DELETE /taggingService/tags/{tag}/members
#[tracing::instrument(skip(state, members), fields(count = members.len()))]
pub async fn remove_members(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Json(members): Json<Vec<String>>,
) -> ApiResult<(StatusCode, Json<SyncReport>)> {
    let result = state.coordinator.remove_members(&tag, members).await;
    let report = sync_outcome("remove", &tag, result)?;
    record_request("remove_members", 202);
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// DELETE /taggingService/tags/{tag}/members/{member}
#[tracing::instrument(skip(state))]
pub async fn remove_member(
    State(state): State<AppState>,
    Path((tag, member)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let result = state.coordinator.remove_member(&tag, &member).await;
    sync_outcome("remove", &tag, result)?;
    record_request("remove_member", 204);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None, 5000).unwrap(), 0);
        assert_eq!(parse_limit(Some(""), 5000).unwrap(), 0);
        assert_eq!(parse_limit(Some("250"), 5000).unwrap(), 250);
        assert_eq!(parse_limit(Some("5000"), 5000).unwrap(), 5000);
        assert!(parse_limit(Some("5001"), 5000).is_err());
        assert!(parse_limit(Some("0"), 5000).is_err());
        assert!(parse_limit(Some("-3"), 5000).is_err());
        assert!(parse_limit(Some("ten"), 5000).is_err());
    }

    #[test]
    fn test_reserved_tag_ids() {
        assert!(check_writable_tag("promo").is_ok());
        assert!(check_writable_tag("migration-2024").is_ok());
        assert!(matches!(check_writable_tag("migration"), Err(ApiError::BadRequest(_))));
        assert!(matches!(check_writable_tag("members"), Err(ApiError::BadRequest(_))));
    }
}
