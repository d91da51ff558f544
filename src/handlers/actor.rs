//! Acting-user extraction.
//!
//! Authentication happens upstream; the gateway forwards the verified user id
//! in `x-user-id`. No header means an anonymous caller.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const ACTOR_HEADER: &str = "x-user-id";

/// The already-authenticated caller, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Option<Uuid>);

impl Actor {
    /// The caller's id, or 401 for anonymous callers.
    pub fn required(self) -> Result<Uuid, AppError> {
        self.0
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ACTOR_HEADER) else {
            return Ok(Actor(None));
        };
        let id = value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or_else(|| AppError::bad_request("invalid user id"))?;
        Ok(Actor(Some(id)))
    }
}
