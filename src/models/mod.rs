//! Core data models for the file drop service.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`.

pub mod file_record;
pub mod share_ticket;
