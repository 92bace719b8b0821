//! API error handling
//!
//! Every failure crossing the HTTP boundary becomes an [`AppError`], rendered
//! as an [`ApiError`] JSON body. Session failures are collapsed into a uniform
//! 401 that only tells "expired" apart from "invalid".

use crate::auth::service::AccountError;
use crate::auth::session::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Forbidden(String),
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    Internal(String),
    Database(String),
}

impl AppError {
    pub fn expired_token() -> Self {
        AppError::Unauthorized {
            code: "TOKEN_EXPIRED",
            message: "Token has expired",
        }
    }

    pub fn invalid_token() -> Self {
        AppError::Unauthorized {
            code: "INVALID_TOKEN",
            message: "Invalid token",
        }
    }

    pub fn invalid_refresh_token() -> Self {
        AppError::Unauthorized {
            code: "INVALID_REFRESH_TOKEN",
            message: "Invalid or expired refresh token",
        }
    }

    pub fn invalid_credentials() -> Self {
        AppError::Unauthorized {
            code: "INVALID_CREDENTIALS",
            message: "Invalid login or password",
        }
    }

    pub fn missing_authorization() -> Self {
        AppError::Unauthorized {
            code: "UNAUTHORIZED",
            message: "Authorization header is required",
        }
    }

    pub fn malformed_authorization() -> Self {
        AppError::Unauthorized {
            code: "UNAUTHORIZED",
            message: "Invalid authorization header format",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::NotFound(msg) => ApiError::not_found(&msg),
            AppError::BadRequest(msg) => ApiError::bad_request(msg),
            AppError::Conflict(msg) => ApiError::new("CONFLICT", msg),
            AppError::Forbidden(msg) => ApiError::new("FORBIDDEN", msg),
            AppError::Unauthorized { code, message } => ApiError::new(code, message),
            AppError::Internal(msg) => {
                tracing::error!(details = %msg, "Internal error");
                ApiError::internal_error().with_details(msg)
            }
            AppError::Database(msg) => {
                tracing::error!(details = %msg, "Database error");
                ApiError::new("DATABASE_ERROR", "Database operation failed").with_details(msg)
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ExpiredToken => AppError::expired_token(),
            SessionError::InvalidToken => AppError::invalid_token(),
            SessionError::InvalidRefreshToken => AppError::invalid_refresh_token(),
            SessionError::Issuance(msg) => AppError::Internal(format!("Token issuance failed: {msg}")),
            SessionError::Storage(msg) => AppError::Database(msg),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidCredentials => AppError::invalid_credentials(),
            AccountError::LoginTaken => AppError::Conflict("Login is already taken".to_string()),
            AccountError::Validation(msg) => AppError::BadRequest(msg),
            AccountError::UserNotFound => AppError::NotFound("User".to_string()),
            AccountError::Forbidden => {
                AppError::Forbidden("Not allowed to modify another account".to_string())
            }
            AccountError::Session(e) => e.into(),
            AccountError::Storage(msg) => AppError::Database(msg),
            AccountError::Password(e) => AppError::Internal(e.to_string()),
            AccountError::Task(msg) => AppError::Internal(msg),
        }
    }
}
