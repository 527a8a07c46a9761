//! Session loading and persistence.
//!
//! The session document lives in an external store keyed by the value of
//! the session cookie. [`session_loader_middleware`] loads it once per
//! request into a [`RequestSession`] extension; the auth and CSRF
//! middleware read it from there and write changes back through the
//! [`SessionStore`].

mod memory;
mod tower_store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tower_sessions::cookie::Cookie;
use web_security_core::SessionData;

use crate::error::SecurityError;

pub use memory::MemorySessionStore;
pub use tower_store::TowerSessionStore;

/// Default session cookie name.
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "_SID";

/// Session store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The document could not be converted.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The cookie value is not a valid session id for this backend.
    #[error("invalid session id")]
    InvalidSessionId,
}

/// Persistent session storage keyed by session id.
#[async_trait]
pub trait SessionStore: std::fmt::Debug + Send + Sync + 'static {
    /// Load a session; `Ok(None)` when there is no such session.
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError>;

    /// Write a session, replacing what is stored.
    async fn store(&self, session_id: &str, data: &SessionData) -> Result<(), StoreError>;
}

/// The session attached to the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSession {
    /// Session id (the session cookie value).
    pub id: String,
    /// Session document.
    pub data: SessionData,
}

/// Read a cookie value from the request headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// State for [`session_loader_middleware`].
#[derive(Debug, Clone)]
pub struct SessionLoader {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl SessionLoader {
    /// Load sessions from `store` using the default cookie name.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
        }
    }

    /// Use a different session cookie.
    #[must_use]
    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }
}

/// Middleware that loads the session named by the session cookie.
///
/// No cookie, no stored record, or a record that does not decode means no
/// session; the request continues without a [`RequestSession`]. Backend
/// failures end the request with a 500.
pub async fn session_loader_middleware(
    State(loader): State<SessionLoader>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(id) = cookie_value(request.headers(), &loader.cookie_name) {
        match loader.store.load(&id).await {
            Ok(Some(data)) => {
                request.extensions_mut().insert(RequestSession { id, data });
            }
            Ok(None) => tracing::debug!("session cookie present but no session stored"),
            Err(StoreError::InvalidSessionId) => {
                tracing::debug!("session cookie is not a valid session id");
            }
            Err(StoreError::Encoding(err)) => {
                tracing::warn!(error = %err, "stored session could not be decoded, treating as no session");
            }
            Err(err) => return SecurityError::Store(err).into_response(),
        }
    }

    next.run(request).await
}

/// Extractor for the current session, if any.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentSession(session): CurrentSession) -> impl IntoResponse {
///     match session {
///         Some(s) if s.data.is_signed_in() => "Welcome back",
///         _ => "Hello, guest",
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Option<RequestSession>);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<RequestSession>().cloned()))
    }
}
