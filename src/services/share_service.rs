//! src/services/share_service.rs
//!
//! ShareService — issues, resolves and retires share tickets stored in the
//! `share_tickets` table. Tickets carry no owner; every permission check goes
//! through the ticket's file.

use crate::{
    models::{
        file_record::FileRecord,
        share_ticket::{ShareListing, ShareTicket},
    },
    services::{
        error::{ServiceError, ServiceResult, is_unique_violation},
        file_service::{find_file, page_offset},
        share_code,
    },
};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Random codes tried before giving up with `GenerationExhausted`.
pub const MAX_CODE_ATTEMPTS: usize = 5;

const TICKET_COLUMNS: &str =
    "id, file_id, code, expires_at, download_limit, download_count, created_at, updated_at";

/// Fallbacks applied when a share request leaves expiry or limit non-positive.
#[derive(Clone, Copy, Debug)]
pub struct ShareDefaults {
    pub expire_hours: i64,
    pub download_limit: i64,
}

/// Parameters for a new ticket. Non-positive numbers select the defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewShare {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "expires_in")]
    pub expires_in_hours: i64,
    #[serde(default)]
    pub download_limit: i64,
}

#[derive(Clone)]
pub struct ShareService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    defaults: ShareDefaults,
    generate_code: fn() -> String,
}

impl ShareService {
    pub fn new(db: Arc<SqlitePool>, defaults: ShareDefaults) -> Self {
        Self {
            db,
            defaults,
            generate_code: share_code::generate_code,
        }
    }

    /// Replace the random code source.
    pub fn with_code_generator(mut self, generate_code: fn() -> String) -> Self {
        self.generate_code = generate_code;
        self
    }

    /// Issue a ticket for `file_id` on behalf of `actor`.
    pub async fn create(&self, file_id: Uuid, request: NewShare, actor: Option<Uuid>) -> ServiceResult<ShareTicket> {
        let file = find_file(&self.db, file_id).await?;
        if !file.is_accessible_by(actor) {
            return Err(ServiceError::Forbidden("no permission to share this file".into()));
        }

        let code = match request.code.as_deref().filter(|c| !c.is_empty()) {
            Some(custom) => {
                if !share_code::is_valid_code(custom) {
                    return Err(ServiceError::InvalidInput(format!(
                        "share code must be {}-{} letters or digits",
                        share_code::MIN_CODE_LEN,
                        share_code::MAX_CODE_LEN
                    )));
                }
                if self.code_exists(custom).await? {
                    return Err(ServiceError::Conflict("share code is already in use".into()));
                }
                custom.to_string()
            }
            None => self.unused_random_code().await?,
        };

        let expire_hours = if request.expires_in_hours > 0 {
            request.expires_in_hours
        } else {
            self.defaults.expire_hours
        };
        let download_limit = if request.download_limit > 0 {
            request.download_limit
        } else {
            self.defaults.download_limit
        };

        let now = Utc::now();
        let expires_at = TimeDelta::try_hours(expire_hours)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(|| ServiceError::InvalidInput("expiry is out of range".into()))?;

        let ticket = ShareTicket {
            id: Uuid::new_v4(),
            file_id: file.id,
            code,
            expires_at,
            download_limit,
            download_count: 0,
            created_at: now,
            updated_at: now,
        };

        match sqlx::query(
            "INSERT INTO share_tickets (
                id, file_id, code, expires_at, download_limit, download_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id)
        .bind(ticket.file_id)
        .bind(&ticket.code)
        .bind(ticket.expires_at)
        .bind(ticket.download_limit)
        .bind(ticket.download_count)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {
                info!(ticket_id = %ticket.id, file_id = %ticket.file_id, "share ticket created");
                Ok(ticket)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(ServiceError::Conflict("share code is already in use".into()))
            }
            Err(err) => Err(ServiceError::Database(err)),
        }
    }

    /// Look up a live ticket and its file by code.
    pub async fn resolve(&self, code: &str) -> ServiceResult<(ShareTicket, FileRecord)> {
        let ticket = sqlx::query_as::<_, ShareTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM share_tickets WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound("share code".into()))?;

        if ticket.is_expired() {
            debug!(ticket_id = %ticket.id, "rejected expired share ticket");
            return Err(ServiceError::Expired);
        }

        let file = find_file(&self.db, ticket.file_id).await?;
        Ok((ticket, file))
    }

    /// Count one download, returning the new count.
    ///
    /// The increment is a single conditional statement, so concurrent callers
    /// can never push the count past the limit.
    pub async fn record_download(&self, ticket_id: Uuid) -> ServiceResult<i64> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE share_tickets
             SET download_count = download_count + 1, updated_at = ?
             WHERE id = ? AND download_count < download_limit
             RETURNING download_count",
        )
        .bind(Utc::now())
        .bind(ticket_id)
        .fetch_optional(&*self.db)
        .await?;

        match updated {
            Some(count) => Ok(count),
            None => {
                let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM share_tickets WHERE id = ?")
                    .bind(ticket_id)
                    .fetch_optional(&*self.db)
                    .await?;
                match exists {
                    Some(_) => Err(ServiceError::Expired),
                    None => Err(ServiceError::NotFound(format!("share ticket `{ticket_id}`"))),
                }
            }
        }
    }

    /// A page of tickets on files owned by `owner`, newest first, plus the
    /// total count.
    pub async fn list_for_owner(&self, owner: Uuid, page: i64, page_size: i64) -> ServiceResult<(Vec<ShareListing>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM share_tickets s
             JOIN files f ON f.id = s.file_id
             WHERE f.owner_id = ?",
        )
        .bind(owner)
        .fetch_one(&*self.db)
        .await?;

        let offset = page_offset(page, page_size);
        let listings = sqlx::query_as::<_, ShareListing>(
            "SELECT s.id, s.file_id, s.code, s.expires_at, s.download_limit, s.download_count,
                    s.created_at, s.updated_at,
                    f.name AS file_name, f.size_bytes AS file_size, f.content_type
             FROM share_tickets s
             JOIN files f ON f.id = s.file_id
             WHERE f.owner_id = ?
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(owner)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&*self.db)
        .await?;

        Ok((listings, total))
    }

    /// Delete a ticket; only the owner of the ticket's file may do so.
    pub async fn delete(&self, ticket_id: Uuid, actor: Option<Uuid>) -> ServiceResult<()> {
        let ticket = sqlx::query_as::<_, ShareTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM share_tickets WHERE id = ?"
        ))
        .bind(ticket_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("share ticket `{ticket_id}`")))?;

        let file = find_file(&self.db, ticket.file_id).await?;
        if !file.is_owned_by(actor) {
            return Err(ServiceError::Forbidden("no permission to delete this share".into()));
        }

        let result = sqlx::query("DELETE FROM share_tickets WHERE id = ?")
            .bind(ticket_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(format!("share ticket `{ticket_id}`")));
        }

        info!(%ticket_id, "share ticket deleted");
        Ok(())
    }

    async fn code_exists(&self, code: &str) -> ServiceResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM share_tickets WHERE code = ?")
            .bind(code)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    async fn unused_random_code(&self) -> ServiceResult<String> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = (self.generate_code)();
            if !self.code_exists(&code).await? {
                return Ok(code);
            }
            debug!(attempt, "generated share code collided");
        }
        Err(ServiceError::GenerationExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }
}
