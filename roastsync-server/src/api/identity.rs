//! Caller identity
//!
//! Requests name their user in the `X-User-Id` header. Without it the
//! configured default user is assumed.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Uuid);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_HEADER) else {
            return Ok(Caller(state.default_user));
        };
        let text = value
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-User-Id header is not valid text".into()))?;
        roastsync_common::uuid_utils::parse(text.trim())
            .map(Caller)
            .map_err(|_| ApiError::BadRequest(format!("Invalid X-User-Id header '{}'", text)))
    }
}
