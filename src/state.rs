//! Shared application state handed to every handler.

use crate::services::{
    file_service::{FileService, UploadLimits},
    object_store::ObjectStore,
    share_service::{ShareDefaults, ShareService},
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite connection pool, also used by readiness checks.
    pub db: Arc<SqlitePool>,
    pub files: FileService,
    pub shares: ShareService,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, store: ObjectStore, limits: UploadLimits, defaults: ShareDefaults) -> Self {
        Self {
            files: FileService::new(db.clone(), store, limits),
            shares: ShareService::new(db.clone(), defaults),
            db,
        }
    }
}
