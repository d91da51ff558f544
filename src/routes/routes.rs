//! Defines routes for file and share operations.
//!
//! ## Structure
//! - **Files**
//!   - `POST   /api/files`                — upload (optionally authenticated)
//!   - `POST   /api/files/anonymous`      — anonymous upload + share
//!   - `GET    /api/files`                — list the caller's files
//!   - `GET    /api/files/{id}`           — file metadata
//!   - `GET    /api/files/{id}/download`  — direct download
//!   - `DELETE /api/files/{id}`           — delete file and its shares
//!   - `POST   /api/files/{id}/share`     — create share ticket
//!
//! - **Shares**
//!   - `GET    /api/shares`                  — list the caller's tickets
//!   - `GET    /api/shares/{code}`           — ticket info by code
//!   - `GET    /api/shares/{code}/download`  — download by code
//!   - `DELETE /api/shares/{id}`             — delete ticket
//!
//! `GET` and `DELETE` on `/api/shares/{key}` share one path segment: the
//! segment is a code for `GET` and a ticket id for `DELETE`.

use crate::{
    handlers::{
        file_handlers::{
            create_share, delete_file, download_file, get_file, list_files, upload_anonymous,
            upload_file,
        },
        health_handlers::{healthz, readyz},
        share_handlers::{delete_share, download_shared, list_shares, share_info},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all file and share routes.
///
/// Upload size is enforced per caller while spooling, so the framework's
/// default body limit is lifted.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File routes
        .route("/api/files", post(upload_file).get(list_files))
        .route("/api/files/anonymous", post(upload_anonymous))
        .route("/api/files/{id}", get(get_file).delete(delete_file))
        .route("/api/files/{id}/download", get(download_file))
        .route("/api/files/{id}/share", post(create_share))
        // Share routes
        .route("/api/shares", get(list_shares))
        .route("/api/shares/{key}", get(share_info).delete(delete_share))
        .route("/api/shares/{key}/download", get(download_shared))
        .layer(DefaultBodyLimit::disable())
}
