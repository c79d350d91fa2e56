//! Member Lookup Endpoint

use super::error::ApiResult;
use super::state::AppState;
use crate::observability::metrics::record_request;
use axum::{
    extract::{Path, State},
    Json,
};

/// GET /taggingService/tags/members/{member} - tags containing `member`,
/// as recorded by the registry
#[tracing::instrument(skip(state))]
pub async fn get_member_tags(
    State(state): State<AppState>,
    Path(member): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let tags = state.coordinator.tags_of_member(&member).await?;
    record_request("get_member_tags", 200);
    Ok(Json(tags))
}
