//! Error types for roastsync-server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Stale write (409); the server copy is newer than the client's
    #[error("Conflict: server has newer data ({server_modified_at} > {client_modified_at})")]
    Conflict {
        server_modified_at: DateTime<Utc>,
        client_modified_at: DateTime<Utc>,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// roastsync-common error
    #[error("Common error: {0}")]
    Common(roastsync_common::Error),
}

impl From<roastsync_common::Error> for ApiError {
    fn from(err: roastsync_common::Error) -> Self {
        match err {
            roastsync_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            roastsync_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("JSON encoding failed: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Conflict {
            server_modified_at,
            client_modified_at,
        } = &self
        {
            let body = Json(json!({
                "success": false,
                "error": {
                    "code": "CONFLICT",
                    "message": "Server has newer data; fetch the roast and retry",
                },
                "server_modified_at": server_modified_at.to_rfc3339(),
                "client_modified_at": client_modified_at.to_rfc3339(),
            }));
            return (StatusCode::CONFLICT, body).into_response();
        }

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT", String::new()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Database(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("{}: {}", error_code, message);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_conflict_body_carries_both_timestamps() {
        let server = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let client = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let response = ApiError::Conflict {
            server_modified_at: server,
            client_modified_at: client,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CONFLICT");
        assert_eq!(body["server_modified_at"], server.to_rfc3339());
        assert_eq!(body["client_modified_at"], client.to_rfc3339());
    }

    #[tokio::test]
    async fn test_common_not_found_maps_to_404() {
        let err: ApiError = roastsync_common::Error::NotFound("roast".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
