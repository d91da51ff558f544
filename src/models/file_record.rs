//! Represents an uploaded file: the metadata bound to one stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single uploaded file.
///
/// The payload itself lives in the object store; `storage_handle` is the only
/// link to it and is never exposed to API callers.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Unique identifier for this file.
    pub id: Uuid,

    /// Uploading user, or `None` for anonymous uploads.
    pub owner_id: Option<Uuid>,

    /// Filename as declared by the uploader.
    pub name: String,

    /// Plaintext size in bytes (the stored ciphertext is longer by the IV).
    pub size_bytes: i64,

    /// Content type (MIME type) as declared by the uploader.
    pub content_type: String,

    /// Hex SHA-256 of the plaintext.
    pub content_hash: String,

    /// Object store handle (path relative to the storage root).
    #[serde(skip_serializing, default)]
    pub storage_handle: String,

    /// When the file was uploaded.
    pub created_at: DateTime<Utc>,

    /// Last metadata change; equal to `created_at` since records are immutable.
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Read access and share creation: files with an owner are reserved to
    /// that owner, anonymous files are open to whoever holds the id.
    pub fn is_accessible_by(&self, actor: Option<Uuid>) -> bool {
        match self.owner_id {
            Some(owner) => actor == Some(owner),
            None => true,
        }
    }

    /// Destructive operations: the actor must be exactly the owner, where an
    /// anonymous actor owns only anonymous files.
    pub fn is_owned_by(&self, actor: Option<Uuid>) -> bool {
        self.owner_id == actor
    }
}
