//! Integration tests for the web security middleware.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p web-security-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `auth_middleware` - Sign-in, company, scope and hijack redirects
//! - `csrf_middleware` - Token issuing, validation and error mapping
//!
//! Every test drives a full router (session loader, CSRF, auth guard) over
//! an in-memory session store; no database or network is needed.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
    middleware,
    routing::{get, post},
};
use secrecy::SecretString;
use tower::ServiceExt;
use web_security_axum::{
    AuthGuard, CsrfOptions, CsrfToken, MemorySessionStore, SessionLoader, SessionStore,
    auth_middleware, csrf_error_middleware, csrf_middleware, session_loader_middleware,
};
use web_security_core::{AuthOptions, CsrfErrorResponses, SessionData};

/// Session cookie name used by every test app.
pub const COOKIE_NAME: &str = "_SID";

/// Cookie secret used to sign client fingerprints.
pub const COOKIE_SECRET: &str = "k2J9xQ7vL0pR4sT8wZ1cF5hM3nB6dG0a";

/// Return URL configured on every guard.
pub const RETURN_URL: &str = "origin";

/// Sign-in service base URL configured on every guard.
pub const CHS_WEB_URL: &str = "accounts";

/// A test application and the store behind it.
#[derive(Debug, Clone)]
pub struct TestApp {
    /// Session storage shared by every layer.
    pub store: Arc<dyn SessionStore>,
    router: Router,
}

/// What a test app response looked like.
#[derive(Debug)]
pub struct TestResponse {
    /// Response status.
    pub status: StatusCode,
    /// `Location` header, if any.
    pub location: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl TestApp {
    /// Build an app guarding `/protected` with `options`.
    ///
    /// `/form` accepts POSTs and `/page` renders the CSRF token; both sit
    /// behind CSRF protection only.
    ///
    /// # Panics
    ///
    /// Panics if `options` are invalid.
    #[must_use]
    pub fn new(options: AuthOptions) -> Self {
        Self::build(options, |csrf| csrf, CsrfErrorResponses::default())
    }

    /// Build an app with customised CSRF options and error responses.
    ///
    /// # Panics
    ///
    /// Panics if `options` are invalid.
    #[must_use]
    pub fn build(
        options: AuthOptions,
        csrf: impl FnOnce(CsrfOptions) -> CsrfOptions,
        responses: CsrfErrorResponses,
    ) -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let guard = AuthGuard::new(
            options,
            store.clone(),
            SecretString::from(COOKIE_SECRET.to_string()),
        )
        .unwrap_or_else(|err| panic!("invalid auth options: {err}"));

        let csrf_options = csrf(CsrfOptions::new(store.clone()).with_cookie_name(COOKIE_NAME));
        let loader = SessionLoader::new(store.clone()).with_cookie_name(COOKIE_NAME);

        let router = Router::new()
            .route("/page", get(|token: CsrfToken| async move { token.0 }))
            .route("/form", post(|| async { "accepted" }))
            .merge(
                Router::new()
                    .route("/protected", get(|| async { "protected" }))
                    .route_layer(middleware::from_fn_with_state(guard, auth_middleware)),
            )
            .layer(middleware::from_fn_with_state(csrf_options, csrf_middleware))
            .layer(middleware::from_fn_with_state(loader, session_loader_middleware))
            .layer(middleware::from_fn_with_state(
                Arc::new(responses),
                csrf_error_middleware,
            ));

        Self { store, router }
    }

    /// Store `data` under `id`.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the session.
    pub async fn seed(&self, id: &str, data: &SessionData) {
        self.store
            .store(id, data)
            .await
            .unwrap_or_else(|err| panic!("failed to seed session: {err}"));
    }

    /// Load the session stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if the store fails.
    pub async fn session(&self, id: &str) -> Option<SessionData> {
        self.store
            .load(id)
            .await
            .unwrap_or_else(|err| panic!("failed to load session: {err}"))
    }

    /// Send `request` through the app.
    ///
    /// # Panics
    ///
    /// Panics if the body cannot be read.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|err| match err {});
        read(response).await
    }
}

async fn read(response: Response<Body>) -> TestResponse {
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|err| panic!("failed to read body: {err}"));

    TestResponse {
        status,
        location,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// Start a request carrying the session cookie for `session_id`.
#[must_use]
pub fn with_session(method: &str, uri: &str, session_id: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("{COOKIE_NAME}={session_id}"))
}

/// Signed-in session data built from a JSON document.
///
/// # Panics
///
/// Panics if `document` is not a valid session.
#[must_use]
pub fn session_from(document: serde_json::Value) -> SessionData {
    serde_json::from_value(document).unwrap_or_else(|err| panic!("invalid session document: {err}"))
}
