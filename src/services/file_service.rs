//! src/services/file_service.rs
//!
//! FileService — binds stored objects to `files` rows in SQLite. Upload writes
//! the payload first and the row second (a failed insert removes the payload);
//! delete removes tickets and the row in one transaction and then deletes the
//! payload best-effort.

use crate::{
    models::file_record::FileRecord,
    services::{
        error::{ServiceError, ServiceResult},
        object_store::{ObjectReader, ObjectStore, ObjectStoreError, SpooledUpload},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub(crate) const FILE_COLUMNS: &str =
    "id, owner_id, name, size_bytes, content_type, content_hash, storage_handle, created_at, updated_at";

/// Size ceilings per caller identity, read once at startup.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    pub anonymous_max_bytes: u64,
    pub authenticated_max_bytes: u64,
}

impl UploadLimits {
    pub fn ceiling_for(&self, actor: Option<Uuid>) -> u64 {
        match actor {
            Some(_) => self.authenticated_max_bytes,
            None => self.anonymous_max_bytes,
        }
    }
}

#[derive(Clone)]
pub struct FileService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Encrypted payload storage.
    pub store: ObjectStore,

    limits: UploadLimits,
}

impl FileService {
    pub fn new(db: Arc<SqlitePool>, store: ObjectStore, limits: UploadLimits) -> Self {
        Self { db, store, limits }
    }

    /// Store `source` and record it as a file owned by `actor`.
    ///
    /// `size_hint` is checked against the actor's ceiling before anything is
    /// written; the observed size is checked again after the digest pass.
    pub async fn upload<R>(
        &self,
        source: &mut R,
        declared_name: &str,
        declared_content_type: &str,
        size_hint: Option<u64>,
        actor: Option<Uuid>,
    ) -> ServiceResult<FileRecord>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let limit = self.limits.ceiling_for(actor);
        if let Some(size) = size_hint {
            if size > limit {
                return Err(ServiceError::SizeExceeded { limit, size });
            }
        }

        let stored = self.store.put(source, declared_name).await?;
        if stored.size_bytes > limit {
            self.discard_object(&stored.handle).await;
            return Err(ServiceError::SizeExceeded {
                limit,
                size: stored.size_bytes,
            });
        }

        let now = Utc::now();
        let content_type = match declared_content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE.to_string(),
            other => other.to_string(),
        };
        let record = FileRecord {
            id: Uuid::new_v4(),
            owner_id: actor,
            name: declared_name.to_string(),
            size_bytes: stored.size_bytes as i64,
            content_type,
            content_hash: stored.content_hash,
            storage_handle: stored.handle,
            created_at: now,
            updated_at: now,
        };

        let insert = sqlx::query(
            "INSERT INTO files (
                id, owner_id, name, size_bytes, content_type, content_hash,
                storage_handle, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.name)
        .bind(record.size_bytes)
        .bind(&record.content_type)
        .bind(&record.content_hash)
        .bind(&record.storage_handle)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.db)
        .await;

        if let Err(err) = insert {
            self.discard_object(&record.storage_handle).await;
            return Err(ServiceError::Database(err));
        }

        info!(file_id = %record.id, size = record.size_bytes, anonymous = actor.is_none(), "file uploaded");
        Ok(record)
    }

    /// Buffer a forward-only stream to a scratch file, enforcing the actor's
    /// ceiling as bytes arrive.
    pub async fn spool<S>(&self, stream: S, actor: Option<Uuid>) -> ServiceResult<SpooledUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let limit = self.limits.ceiling_for(actor);
        self.store.spool(stream, limit).await.map_err(|err| match err {
            // The spool stops reading at the first byte past the limit.
            ObjectStoreError::LimitExceeded { limit } => ServiceError::SizeExceeded { limit, size: limit + 1 },
            other => other.into(),
        })
    }

    /// Upload a previously spooled stream; the scratch file is removed when
    /// `spooled` is dropped at the end of this call.
    pub async fn upload_spooled(
        &self,
        mut spooled: SpooledUpload,
        declared_name: &str,
        declared_content_type: &str,
        actor: Option<Uuid>,
    ) -> ServiceResult<FileRecord> {
        let size = spooled.size();
        self.upload(spooled.file_mut(), declared_name, declared_content_type, Some(size), actor)
            .await
    }

    /// Upload from a forward-only stream: spool, then hash and encrypt.
    pub async fn upload_stream<S>(
        &self,
        stream: S,
        declared_name: &str,
        declared_content_type: &str,
        actor: Option<Uuid>,
    ) -> ServiceResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let spooled = self.spool(stream, actor).await?;
        self.upload_spooled(spooled, declared_name, declared_content_type, actor)
            .await
    }

    /// Fetch a file record by id.
    pub async fn get(&self, id: Uuid) -> ServiceResult<FileRecord> {
        find_file(&self.db, id).await
    }

    /// Fetch a file record the actor is allowed to read.
    pub async fn get_for_actor(&self, id: Uuid, actor: Option<Uuid>) -> ServiceResult<FileRecord> {
        let record = self.get(id).await?;
        if !record.is_accessible_by(actor) {
            return Err(ServiceError::Forbidden("no permission to access this file".into()));
        }
        Ok(record)
    }

    /// Direct download: ownership-checked record plus a plaintext reader.
    pub async fn open_content(&self, id: Uuid, actor: Option<Uuid>) -> ServiceResult<(FileRecord, ObjectReader)> {
        let record = self.get_for_actor(id, actor).await?;
        let reader = self.open_stored(&record).await?;
        Ok((record, reader))
    }

    /// Open the payload of an already-authorized record.
    pub async fn open_stored(&self, record: &FileRecord) -> ServiceResult<ObjectReader> {
        Ok(self.store.get(&record.storage_handle).await?)
    }

    /// Delete a file, its share tickets, and (best-effort) its payload.
    pub async fn delete(&self, id: Uuid, actor: Option<Uuid>) -> ServiceResult<FileRecord> {
        let record = self.get(id).await?;
        if !record.is_owned_by(actor) {
            return Err(ServiceError::Forbidden("no permission to delete this file".into()));
        }

        let mut tx = self.db.begin().await?;
        let tickets = sqlx::query("DELETE FROM share_tickets WHERE file_id = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
        if rows.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ServiceError::NotFound(format!("file `{}`", record.id)));
        }
        tx.commit().await?;

        // The row is gone, so nothing can resolve this handle any more.
        if let Err(err) = self.store.delete(&record.storage_handle).await {
            warn!(file_id = %record.id, handle = %record.storage_handle, "failed to delete stored object: {}", err);
        }

        info!(file_id = %record.id, tickets_removed = tickets.rows_affected(), "file deleted");
        Ok(record)
    }

    /// A page of the owner's files, newest first, plus the total count.
    pub async fn list_for_owner(&self, owner: Uuid, page: i64, page_size: i64) -> ServiceResult<(Vec<FileRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE owner_id = ?")
            .bind(owner)
            .fetch_one(&*self.db)
            .await?;

        let offset = page_offset(page, page_size);
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(owner)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&*self.db)
        .await?;

        Ok((records, total))
    }

    /// Compensating delete for a payload whose metadata never materialized.
    async fn discard_object(&self, handle: &str) {
        if let Err(err) = self.store.delete(handle).await {
            warn!(%handle, "failed to remove orphaned stored object: {}", err);
        }
    }
}

/// Row offset of a 1-based page; saturates instead of overflowing, which
/// simply yields an empty page.
pub(crate) fn page_offset(page: i64, page_size: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(page_size.max(0))
}

/// Fetch a file row, mapping a missing row to `NotFound`.
pub(crate) async fn find_file(db: &SqlitePool, id: Uuid) -> ServiceResult<FileRecord> {
    sqlx::query_as::<_, FileRecord>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
        .bind(id)
        .fetch_one(db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound(format!("file `{id}`")),
            other => ServiceError::Database(other),
        })
}
