use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::RecordNotFound(_) | StorageError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            StorageError::AccessDenied(_) => StatusCode::FORBIDDEN,
            StorageError::EmptyUpload => StatusCode::BAD_REQUEST,
            StorageError::Infected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            StorageError::Backend(_) | StorageError::ScanFailed(_) => StatusCode::BAD_GATEWAY,
            StorageError::Configuration(_) | StorageError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanners::ScanError;
    use uuid::Uuid;

    #[test]
    fn storage_errors_map_to_distinct_statuses() {
        let cases = [
            (
                AppError::from(StorageError::RecordNotFound(Uuid::new_v4())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::from(StorageError::AccessDenied("nope".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::from(StorageError::EmptyUpload),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(StorageError::Infected {
                    threats: vec!["Eicar-Test-Signature".into()],
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::from(StorageError::Backend("boom".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::from(StorageError::ScanFailed(ScanError::Unavailable(
                    "daemon down".into(),
                ))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::from(StorageError::Configuration("bad provider".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status, expected, "{}", err.message);
        }
    }

    #[test]
    fn access_denied_is_not_conflated_with_not_found() {
        let denied = AppError::from(StorageError::AccessDenied("nope".into()));
        let missing = AppError::from(StorageError::ObjectNotFound { key: "k".into() });
        assert_ne!(denied.status, missing.status);
    }
}
