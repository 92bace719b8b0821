//! HTTP middleware shared by all routes
//!
//! The bearer-token gate lives in `auth::middleware`.

pub mod security_headers;

pub use security_headers::security_headers_middleware;
