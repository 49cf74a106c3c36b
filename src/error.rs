use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("Room has expired")]
    RoomExpired,

    #[error("Access denied")]
    Forbidden,

    #[error("file exceeds the {0} byte limit")]
    PayloadTooLarge(u64),

    #[error("{0}")]
    BadRequest(String),

    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RoomExpired => StatusCode::GONE,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // keeps 413 for bodies over the batch ceiling
            AppError::Multipart(err) => err.status(),
            AppError::Db(_) | AppError::Io(_) | AppError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Storage faults carry internals (paths, SQL); log them, don't leak them.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

macro_rules! corrupt_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::Corrupt(err.to_string())
            }
        }
    };
}

corrupt_impl!(uuid::Error);
corrupt_impl!(serde_json::Error);
corrupt_impl!(time::error::ComponentRange);
corrupt_impl!(time::error::Format);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            AppError::NotFound("Room not found").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::RoomExpired.status_code(), StatusCode::GONE);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::PayloadTooLarge(50 * 1024 * 1024).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::BadRequest("No files provided".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Io(std::io::Error::other("disk on fire")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn expired_room_is_distinct_from_not_found() {
        assert_eq!(AppError::RoomExpired.to_string(), "Room has expired");
        assert_ne!(
            AppError::RoomExpired.status_code(),
            AppError::NotFound("Room not found").status_code()
        );
    }

    #[test]
    fn server_errors_hide_internals() {
        let response = AppError::Db(sqlx::Error::PoolClosed).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
