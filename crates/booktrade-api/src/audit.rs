//! Security audit logging for session events
//!
//! Logins, refreshes, logouts, registrations, account deletions and rejected
//! bearer tokens are logged at INFO level on the "audit" target, so they can
//! be filtered and routed separately from application logs. Each record
//! carries the event serialized as JSON.
//!
//! ```ignore
//! use booktrade_api::audit::{audit_log, AuditEvent, RequestContext};
//!
//! let ctx = RequestContext::from_headers(request.headers());
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     login: user.login.clone(),
//!     ctx,
//! });
//! ```

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Client metadata attached to every audit record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: Uuid,
        login: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// Unknown login and wrong password are logged alike
    LoginFailure {
        login: String,
        reason: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    TokenRefresh {
        user_id: Uuid,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// Refresh token absent, consumed or expired
    RefreshRejected {
        reason: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// A single session closed with its refresh token
    Logout {
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// Every session of a principal revoked
    LogoutAll {
        user_id: Uuid,
        login: String,
        revoked: u64,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    RegistrationSuccess {
        user_id: Uuid,
        login: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    RegistrationFailure {
        login: String,
        reason: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// Account removed by its owner, with every session revoked
    AccountDeleted {
        user_id: Uuid,
        login: String,
        revoked: u64,
        #[serde(flatten)]
        ctx: RequestContext,
    },

    /// Bearer token rejected by the auth gate
    InvalidToken {
        reason: String,
        #[serde(flatten)]
        ctx: RequestContext,
    },
}

impl AuditEvent {
    fn message(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshRejected { .. } => "Token refresh rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::LogoutAll { .. } => "User logout from all sessions",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::AccountDeleted { .. } => "Account deleted",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::LogoutAll { user_id, .. }
            | AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::AccountDeleted { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    fn ctx(&self) -> &RequestContext {
        match self {
            AuditEvent::LoginSuccess { ctx, .. }
            | AuditEvent::LoginFailure { ctx, .. }
            | AuditEvent::TokenRefresh { ctx, .. }
            | AuditEvent::RefreshRejected { ctx, .. }
            | AuditEvent::Logout { ctx }
            | AuditEvent::LogoutAll { ctx, .. }
            | AuditEvent::RegistrationSuccess { ctx, .. }
            | AuditEvent::RegistrationFailure { ctx, .. }
            | AuditEvent::AccountDeleted { ctx, .. }
            | AuditEvent::InvalidToken { ctx, .. } => ctx,
        }
    }
}

/// Log a security audit event on the "audit" target
///
/// Example output field `event`:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "login": "bookworm",
///   "ip_address": "192.168.1.1",
///   "user_agent": "Mozilla/5.0..."
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    let ctx = event.ctx();
    match event.user_id() {
        Some(user_id) => info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            user_id = %user_id,
            ip_address = ?ctx.ip_address,
            "{}",
            event.message()
        ),
        None => info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            ip_address = ?ctx.ip_address,
            "{}",
            event.message()
        ),
    }
}

/// Extract the client IP from proxy headers
///
/// Checks X-Forwarded-For (first hop) then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
