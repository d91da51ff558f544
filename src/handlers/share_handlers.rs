//! HTTP handlers for share tickets: owner listing, public lookup and
//! download by code, and deletion.

use crate::{
    errors::AppError,
    handlers::{
        actor::Actor,
        file_handlers::{PageQuery, file_response},
    },
    models::{file_record::FileRecord, share_ticket::{ShareListing, ShareTicket}},
    services::error::ServiceError,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Serialize)]
pub struct ShareList {
    pub shares: Vec<ShareListing>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Serialize)]
pub struct ShareInfo {
    pub share: ShareTicket,
    pub file: FileRecord,
}

/// GET `/api/shares`: tickets on the caller's files, newest first.
pub async fn list_shares(
    State(state): State<AppState>,
    actor: Actor,
    Query(q): Query<PageQuery>,
) -> Result<Json<ShareList>, AppError> {
    let owner = actor.required()?;
    let (page, limit) = q.resolve();
    let (shares, total) = state.shares.list_for_owner(owner, page, limit).await?;
    Ok(Json(ShareList {
        shares,
        total,
        page,
        limit,
    }))
}

/// GET `/api/shares/{code}`: ticket and file details for a live code.
pub async fn share_info(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ShareInfo>, AppError> {
    let (share, file) = state
        .shares
        .resolve(&code)
        .await
        .map_err(AppError::from_share_lookup)?;
    Ok(Json(ShareInfo { share, file }))
}

/// GET `/api/shares/{code}/download`: stream the shared file.
///
/// The download is counted after the payload is opened. Losing the race for
/// the last download is a 404; a metadata failure while counting is logged
/// and the transfer goes ahead.
pub async fn download_shared(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let (ticket, file) = state
        .shares
        .resolve(&code)
        .await
        .map_err(AppError::from_share_lookup)?;
    let reader = state.files.open_stored(&file).await?;

    match state.shares.record_download(ticket.id).await {
        Ok(_) => {}
        Err(err @ (ServiceError::Expired | ServiceError::NotFound(_))) => {
            return Err(AppError::from_share_lookup(err));
        }
        Err(err) => {
            warn!(ticket_id = %ticket.id, "failed to record share download: {}", err);
        }
    }

    Ok(file_response(&file, reader))
}

/// DELETE `/api/shares/{id}`: retire a ticket.
pub async fn delete_share(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.shares.delete(id, actor.0).await?;
    Ok(StatusCode::NO_CONTENT)
}
