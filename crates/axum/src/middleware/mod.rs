//! HTTP middleware for sign-in checks and CSRF protection.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. CSRF error responder (rewrite CSRF failures)
//! 2. Session loader (attach the stored session)
//! 3. CSRF protection (validate or issue tokens)
//! 4. Auth guard (per route group, via `route_layer`)

pub mod auth;
pub mod csrf;
pub mod csrf_error;

pub use auth::{AuthGuard, auth_middleware, client_fingerprint};
pub use csrf::{CsrfOptions, CsrfToken, csrf_middleware};
pub use csrf_error::csrf_error_middleware;
