//! Encrypted file drop: content-hashed object storage on local disk, file
//! metadata in SQLite, and short share codes that grant time- and
//! count-bounded downloads.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
