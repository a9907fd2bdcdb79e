//! Actor extraction
//!
//! Authentication lives in front of this service. Callers pass the acting
//! user's id in the `X-Actor-Id` header, and every ledger write and document
//! close is attributed to it.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// The user on whose behalf a request acts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or(AppError::MissingActor)?;

        value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .map(Actor)
            .ok_or_else(|| AppError::validation("X-Actor-Id", "Actor id must be a UUID"))
    }
}
