//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::domain::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Errors from the ledger core
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The body could not be decoded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Route requires a bearer token
    #[error("You must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("The requested resource could not be found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::NotFound
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Ledger(err) => match err {
                // 422 Unprocessable Entity
                LedgerError::Validation(fields) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "failed_validation",
                    serde_json::to_value(fields).ok(),
                ),

                // 404 Not Found
                LedgerError::AccountNotFound(_)
                | LedgerError::TransferNotFound(_)
                | LedgerError::BankNotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),

                // 403 Forbidden
                LedgerError::NotPermitted => (StatusCode::FORBIDDEN, "not_permitted", None),

                // 400 Bad Request
                LedgerError::AccountFrozen { account_id } => (
                    StatusCode::BAD_REQUEST,
                    "account_frozen",
                    Some(json!({ "account_id": account_id })),
                ),
                LedgerError::InsufficientFunds {
                    account_id,
                    required,
                    available,
                } => (
                    StatusCode::BAD_REQUEST,
                    "insufficient_funds",
                    Some(json!({
                        "account_id": account_id,
                        "required": required,
                        "available": available,
                    })),
                ),

                // 409 Conflict
                LedgerError::EditConflict => (StatusCode::CONFLICT, "edit_conflict", None),

                // 401 Unauthorized
                LedgerError::InvalidCredentials => {
                    (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
                }
                LedgerError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),

                // 500 Internal Server Error
                LedgerError::Unavailable(msg) => {
                    tracing::error!("Backend unavailable: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, "unavailable", None)
                }
                LedgerError::Timeout => {
                    tracing::error!("Backend operation timed out");
                    (StatusCode::INTERNAL_SERVER_ERROR, "timeout", None)
                }
            },

            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                Some(serde_json::Value::String(msg.clone())),
            ),
            AppError::AuthenticationRequired => {
                (StatusCode::UNAUTHORIZED, "authentication_required", None)
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();

        let error = if status.is_server_error() {
            SERVER_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
