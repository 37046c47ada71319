//! HTTP API handlers for roastsync-server

pub mod blends;
pub mod goals;
pub mod health;
pub mod identity;
pub mod notifications;
pub mod profiles;
pub mod references;
pub mod roasts;
pub mod tasks;

pub use health::health_routes;
pub use identity::Caller;

use crate::error::{ApiError, ApiResult};
use uuid::Uuid;

/// Parse an identifier taken from the request path
pub(crate) fn path_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    roastsync_common::uuid_utils::parse(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} format", what)))
}
