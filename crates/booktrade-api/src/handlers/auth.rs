//! Authentication API handlers
//!
//! Login, refresh, logout and registration endpoints. Refresh and logout
//! take the refresh token from the `X-Refresh-Token` header.

use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::auth::{AccountError, LoginRequest, RegisterRequest, SessionError, UserPublic};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use booktrade_core::Identity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Header carrying the refresh token on refresh and logout
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// Login response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Access token
    pub token: String,
    pub refresh_token: String,
    pub user_id: Uuid,
}

/// Refresh response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires
    pub expires_in: u64,
    /// Access token expiry (Unix epoch seconds)
    pub expires_at: u64,
}

fn refresh_token_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Register a new user account
///
/// * `login` - 3 to 64 characters, unique
/// * `email` - Valid email address
/// * `password` - 8+ chars with uppercase, lowercase, digit and special char
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = UserPublic),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Login already taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let login = request.login.clone();

    match state.accounts.register(request).await {
        Ok(user) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: user.id,
                login: user.login.clone(),
                ctx,
            });
            Ok((StatusCode::CREATED, Json(user.to_public())))
        }
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                login,
                reason: e.to_string(),
                ctx,
            });
            Err(e.into())
        }
    }
}

/// Login with login name and password
///
/// Unknown login and wrong password get the same 401.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let login = request.login.clone();

    match state.accounts.login(request).await {
        Ok((pair, user)) => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: user.id,
                login: user.login,
                ctx,
            });
            Ok(Json(LoginResponse {
                token: pair.access_token,
                refresh_token: pair.refresh_token,
                user_id: user.id,
            }))
        }
        Err(e) => {
            if matches!(e, AccountError::InvalidCredentials) {
                audit_log(&AuditEvent::LoginFailure {
                    login,
                    reason: e.to_string(),
                    ctx,
                });
            }
            Err(e.into())
        }
    }
}

/// Exchange a refresh token for a new token pair
///
/// The presented refresh token is consumed; reusing it fails with 401.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    params(
        ("X-Refresh-Token" = String, Header, description = "Refresh token from login or a previous refresh")
    ),
    responses(
        (status = 200, description = "Token refreshed successfully", body = RefreshResponse),
        (status = 401, description = "Invalid or expired refresh token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let ctx = RequestContext::from_headers(&headers);
    let Some(refresh_token) = refresh_token_header(&headers) else {
        audit_log(&AuditEvent::RefreshRejected {
            reason: "missing refresh token".to_string(),
            ctx,
        });
        return Err(AppError::invalid_refresh_token());
    };

    match state.sessions.rotate_refresh_token(refresh_token).await {
        Ok(pair) => {
            audit_log(&AuditEvent::TokenRefresh {
                user_id: pair.subject_id,
                ctx,
            });
            Ok(Json(RefreshResponse {
                expires_in: pair.expires_in(),
                expires_at: pair.access_expires_at,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            }))
        }
        Err(e) => {
            if matches!(e, SessionError::InvalidRefreshToken) {
                audit_log(&AuditEvent::RefreshRejected {
                    reason: e.to_string(),
                    ctx,
                });
            }
            Err(e.into())
        }
    }
}

/// Close the session behind a refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    params(
        ("X-Refresh-Token" = String, Header, description = "Refresh token to invalidate")
    ),
    responses(
        (status = 204, description = "Logout successful"),
        (status = 400, description = "Missing refresh token", body = crate::error::ApiError),
        (status = 401, description = "Invalid refresh token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = refresh_token_header(&headers)
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

    state.sessions.revoke(refresh_token).await?;

    audit_log(&AuditEvent::Logout {
        ctx: RequestContext::from_headers(&headers),
    });
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke every session of the authenticated user
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "auth",
    responses(
        (status = 204, description = "All sessions revoked"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.sessions.revoke_all(identity.subject_id).await?;

    audit_log(&AuditEvent::LogoutAll {
        user_id: identity.subject_id,
        login: identity.login,
        revoked,
        ctx: RequestContext::from_headers(&headers),
    });
    Ok(StatusCode::NO_CONTENT)
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = UserPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.current_user(&identity).await?;
    Ok(Json(user.to_public()))
}
