pub mod actor;
pub mod file_handlers;
pub mod health_handlers;
pub mod share_handlers;
