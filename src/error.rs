use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;

use crate::auth::errors::{AuthError, ConfirmError, SignUpError};

/// Transport-level error rendered as `{ "error": ..., "code": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String, code: &'static str },
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            code: "validation",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message, code) = match self {
            ApiError::BadRequest { message, code } => (StatusCode::BAD_REQUEST, message, code),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "unauthorized"),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found"),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, "conflict"),
            ApiError::Internal(e) => {
                error!(error = ?e, "unhandled error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                    "internal",
                )
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<SignUpError> for ApiError {
    fn from(err: SignUpError) -> Self {
        match err {
            SignUpError::EmailOccupied => ApiError::Conflict("Such user already exists".into()),
            SignUpError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl From<ConfirmError> for ApiError {
    fn from(err: ConfirmError) -> Self {
        match err {
            ConfirmError::UserNotFound => ApiError::NotFound("User not found".into()),
            ConfirmError::CodeMismatch => ApiError::BadRequest {
                message: "Confirmation code mismatched".into(),
                code: "code_mismatch",
            },
            ConfirmError::CouldNotConfirm => ApiError::BadRequest {
                message: "Could not confirm this user".into(),
                code: "unconfirmable",
            },
            ConfirmError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UserNotFound => ApiError::NotFound("User not found".into()),
            AuthError::InvalidPassword => ApiError::BadRequest {
                message: "Password is invalid".into(),
                code: "invalid_pass",
            },
            AuthError::UserNotConfirmed
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenDoesNotExist => ApiError::Unauthorized(err.to_string()),
            AuthError::Conflict => ApiError::Conflict(err.to_string()),
            AuthError::Internal(e) => ApiError::Internal(e),
        }
    }
}
