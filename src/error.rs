use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::services::{IngestError, RetrievalError};
use crate::store::StoreError;
use crate::validation::ValidationError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Service errors convert into these via `From`, so handlers only use `?`.
/// The response body is always the `{success: false, error, code}` envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation(v) => AppError::Validation(v),
            IngestError::Store(s) => AppError::Store(s),
        }
    }
}

impl From<RetrievalError> for AppError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::NotFound(_) => AppError::NotFound(e.to_string()),
            RetrievalError::Store(s) => AppError::Store(s),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge(rejection.body_text());
        }
        AppError::BadRequest(sanitize_json_rejection(&rejection))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Store(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable `code` in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Store(_) => "store_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = match &self {
            AppError::Validation(v) => {
                ErrorResponse::new(self.code(), v.to_string()).with_details(v.messages())
            }
            AppError::NotFound(msg) | AppError::BadRequest(msg) => {
                ErrorResponse::new(self.code(), msg.as_str())
            }
            AppError::PayloadTooLarge(_) => {
                ErrorResponse::new(self.code(), "Request body exceeds the configured limit")
            }

            // Internal errors - never expose internal details to clients
            AppError::Store(_) => ErrorResponse::new(
                self.code(),
                "Failed to access reading storage. Please try again later.",
            ),
            AppError::ConfigError(_) => ErrorResponse::new(
                self.code(),
                "Service configuration error. Please contact support.",
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Map a JSON extractor rejection to a client-safe message.
///
/// Serde messages can carry line/column positions and internal type names;
/// only the class of failure is returned.
fn sanitize_json_rejection(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".to_string(),
        JsonRejection::JsonDataError(_) => "Invalid data type in request body".to_string(),
        JsonRejection::BytesRejection(_) => "Failed to read request body".to_string(),
        _ => "Invalid request format".to_string(),
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
