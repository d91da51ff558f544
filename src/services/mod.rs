//! Storage and ticket services.
//!
//! Leaves first: `cipher` → `object_store` → `file_service` → `share_service`.

pub mod cipher;
pub mod error;
pub mod file_service;
pub mod object_store;
pub mod share_code;
pub mod share_service;
