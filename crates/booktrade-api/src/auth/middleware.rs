/// Authentication gate for protected routes
///
/// Extracts the bearer token from the Authorization header and validates it
/// through the [`SessionService`]. On success the resulting [`Identity`] is
/// added to request extensions; handlers read it with `Extension<Identity>`.
use super::session::{SessionError, SessionService};
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use booktrade_core::Identity;
use std::sync::Arc;

/// Pull the token out of an `Authorization: Bearer <token>` header
///
/// The value must be exactly two space-separated parts, the first being
/// `Bearer` and the second non-empty.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(AppError::missing_authorization)?
        .to_str()
        .map_err(|_| AppError::malformed_authorization())?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AppError::malformed_authorization()),
    }
}

/// Middleware that requires a valid access token
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use booktrade_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(sessions, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(sessions): State<Arc<SessionService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?;

    let identity: Identity = match sessions.validate_access_token(token) {
        Ok(identity) => identity,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                ctx: RequestContext::from_headers(request.headers()),
            });
            return Err(match e {
                SessionError::ExpiredToken => AppError::expired_token(),
                _ => AppError::invalid_token(),
            });
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::{claims_for, now_secs, test_config};
    use crate::auth::jwt::TokenCodec;
    use crate::auth::repository::{InMemoryRefreshTokenStore, InMemoryUserRepository};
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn sessions() -> Arc<SessionService> {
        let config = test_config();
        Arc::new(SessionService::new(
            TokenCodec::new(&config),
            Arc::new(InMemoryRefreshTokenStore::new()),
            Arc::new(InMemoryUserRepository::new()),
            config.refresh_ttl(),
        ))
    }

    fn app(sessions: Arc<SessionService>) -> Router {
        async fn whoami(Extension(identity): Extension<Identity>) -> String {
            identity.login
        }

        Router::new()
            .route("/protected", get(whoami))
            .route_layer(middleware::from_fn_with_state(sessions, auth_middleware))
    }

    async fn call(app: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/protected");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        for bad in ["Bearer", "Bearer ", "bearer abc", "Token abc", "Bearer a b", "Bearer  abc"] {
            headers.insert(header::AUTHORIZATION, bad.parse().unwrap());
            assert!(bearer_token(&headers).is_err(), "accepted {bad:?}");
        }

        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn test_valid_token_passes_identity_through() {
        let sessions = sessions();
        let identity = Identity::new(Uuid::new_v4(), "bookworm").unwrap();
        let token = sessions.codec().issue_access(&identity).unwrap().token;

        let (status, body) = call(app(sessions), Some(&format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "bookworm");
    }

    #[tokio::test]
    async fn test_missing_and_malformed_header() {
        let sessions = sessions();

        let (status, body) = call(app(sessions.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Authorization header is required"));

        let (status, body) = call(app(sessions), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Invalid authorization header format"));
    }

    #[tokio::test]
    async fn test_expired_and_invalid_are_distinguished() {
        let sessions = sessions();
        let identity = Identity::new(Uuid::new_v4(), "bookworm").unwrap();

        let mut claims = claims_for(sessions.codec(), &identity);
        claims.iat -= 3600;
        claims.nbf -= 3600;
        claims.exp = now_secs() - 60;
        let expired = sessions.codec().sign(&claims).unwrap();

        let (status, body) = call(app(sessions.clone()), Some(&format!("Bearer {expired}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("TOKEN_EXPIRED"));

        let (status, body) = call(app(sessions), Some("Bearer not.a.jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("INVALID_TOKEN"));
    }

    #[tokio::test]
    async fn test_token_from_other_secret_is_invalid() {
        let mut other = test_config();
        other.access_secret = "another-access-secret-0123456789abcdef".to_string();
        let foreign = TokenCodec::new(&other)
            .issue_access(&Identity::new(Uuid::new_v4(), "mallory").unwrap())
            .unwrap()
            .token;

        let (status, body) = call(app(sessions()), Some(&format!("Bearer {foreign}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("INVALID_TOKEN"));
    }
}
