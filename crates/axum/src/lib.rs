//! Web Security for axum.
//!
//! Middleware that gates routes behind a session-based sign-in (with
//! optional company and scope authorisation) and protects forms with
//! synchroniser CSRF tokens. Decisions come from `web-security-core`; this
//! crate supplies sessions, request plumbing and HTTP responses.
//!
//! # Modules
//!
//! - [`config`] - Environment configuration
//! - [`error`] - Middleware error type and HTTP mapping
//! - [`middleware`] - Auth guard, CSRF protection and CSRF error responder
//! - [`session`] - Session stores and the session loader

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod middleware;
pub mod session;

pub use config::{ConfigError, SecurityConfig};
pub use error::{CsrfFailure, SecurityError};
pub use middleware::{
    AuthGuard, CsrfOptions, CsrfToken, auth_middleware, csrf_error_middleware, csrf_middleware,
};
pub use session::{
    CurrentSession, MemorySessionStore, RequestSession, SessionLoader, SessionStore, StoreError,
    TowerSessionStore, session_loader_middleware,
};
