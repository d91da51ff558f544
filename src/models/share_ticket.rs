//! Represents a share ticket: a code granting bounded access to one file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A time- and count-bounded capability addressed by a short code.
///
/// Tickets have no owner of their own; ownership is that of the file.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ShareTicket {
    /// Unique identifier for this ticket.
    pub id: Uuid,

    /// The shared file.
    pub file_id: Uuid,

    /// Alphanumeric pickup code, unique across all tickets ever issued.
    pub code: String,

    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,

    /// Maximum number of downloads.
    pub download_limit: i64,

    /// Downloads recorded so far.
    pub download_count: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShareTicket {
    /// A ticket is spent once its time has passed or its downloads are used up.
    ///
    /// A limit of 0 therefore means the ticket is expired from the start.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at || self.download_count >= self.download_limit
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A ticket together with the file fields shown in owner listings.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct ShareListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub ticket: ShareTicket,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
}
