//! OpenAPI document served at `/api-docs/openapi.json`

use crate::auth::{LoginRequest, RegisterRequest, UserPublic};
use crate::error::ApiError;
use crate::handlers::{auth, health, users};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(title = "booktrade API", description = "Session and identity endpoints"),
    paths(
        health::health_check,
        auth::register_handler,
        auth::login_handler,
        auth::refresh_handler,
        auth::logout_handler,
        auth::logout_all_handler,
        auth::me_handler,
        users::list_users,
        users::get_user,
        users::delete_user,
    ),
    components(schemas(
        ApiError,
        LoginRequest,
        RegisterRequest,
        UserPublic,
        auth::LoginResponse,
        auth::RefreshResponse,
        health::HealthResponse,
        users::UserListResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Authentication and sessions"),
        (name = "users", description = "User accounts"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_session_endpoints() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;

        for path in [
            "/health",
            "/api/v1/auth/login",
            "/api/v1/auth/refresh",
            "/api/v1/auth/logout",
            "/api/v1/auth/logout-all",
            "/api/v1/auth/register",
            "/api/v1/auth/me",
            "/api/v1/users",
            "/api/v1/users/{id}",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }

        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
