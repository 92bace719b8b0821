//! User account handlers
//!
//! Listing and lookup are open to any authenticated caller. Deleting is
//! limited to the caller's own account and revokes every session it holds.

use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::auth::service::DEFAULT_PAGE_SIZE;
use crate::auth::UserPublic;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use booktrade_core::Identity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query parameters for the user listing
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListUsersQuery {
    /// Page size, at most 100
    #[param(default = 20)]
    pub limit: Option<u32>,

    /// Number of users to skip
    #[param(default = 0)]
    pub offset: Option<u32>,
}

/// One page of users
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserPublic>,
    pub limit: u32,
    pub offset: u32,
}

/// List users, newest first
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = UserListResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);

    let users = state.accounts.list_users(limit, offset).await?;

    Ok(Json(UserListResponse {
        users: users.iter().map(|u| u.to_public()).collect(),
        limit,
        offset,
    }))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(
        ("id" = Uuid, Path, description = "User UUID")
    ),
    responses(
        (status = 200, description = "User found", body = UserPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.get_user(id).await?;
    Ok(Json(user.to_public()))
}

/// Delete the caller's own account
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(
        ("id" = Uuid, Path, description = "User UUID; must be the caller's own")
    ),
    responses(
        (status = 204, description = "Account deleted and sessions revoked"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not the caller's account", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.accounts.delete_account(&identity, id).await?;

    audit_log(&AuditEvent::AccountDeleted {
        user_id: id,
        login: identity.login,
        revoked,
        ctx: RequestContext::from_headers(&headers),
    });
    Ok(StatusCode::NO_CONTENT)
}
