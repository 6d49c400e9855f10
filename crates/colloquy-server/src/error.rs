use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use colloquy_service::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] colloquy_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// A [`ServiceError`] on its way out as an HTTP response.
///
/// Renders `{"error": {"code": ..., "message": ...}}` with the status that
/// matches the error category.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(ServiceError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ServiceError::Internal(detail) = &self.0 {
            error!(error = %detail, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.public_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
