//! Auth guard middleware.
//!
//! Wraps the auth decision engine: gathers the client fingerprint and the
//! loaded session, persists any signature patch, then either runs the
//! protected handler or redirects to the sign-in service with a 302.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use web_security_core::auth::{self, AuthAction, AuthConfigError, AuthOptions, AuthRequest};
use web_security_core::ClientFingerprint;

use crate::error::SecurityError;
use crate::session::{RequestSession, SessionStore};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// State for [`auth_middleware`]: one guard per protected route group.
#[derive(Debug, Clone)]
pub struct AuthGuard {
    inner: Arc<AuthGuardInner>,
}

#[derive(Debug)]
struct AuthGuardInner {
    options: AuthOptions,
    store: Arc<dyn SessionStore>,
    cookie_secret: SecretString,
}

impl AuthGuard {
    /// Create a guard.
    ///
    /// # Errors
    ///
    /// Returns [`AuthConfigError`] if `options` are unusable, so
    /// misconfiguration surfaces at startup rather than per request.
    pub fn new(
        options: AuthOptions,
        store: Arc<dyn SessionStore>,
        cookie_secret: SecretString,
    ) -> Result<Self, AuthConfigError> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(AuthGuardInner {
                options,
                store,
                cookie_secret,
            }),
        })
    }

    /// The options this guard enforces.
    #[must_use]
    pub fn options(&self) -> &AuthOptions {
        &self.inner.options
    }
}

/// Resolve the client fingerprint from request headers and the peer address.
#[must_use]
pub fn client_fingerprint(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientFingerprint {
    let peer = peer.map(|addr| addr.ip().to_string());
    let forwarded_for = forwarded_for(headers);

    ClientFingerprint::resolve(
        headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok()),
        forwarded_for.as_deref(),
        peer.as_deref(),
    )
}

/// Repeated `X-Forwarded-For` headers joined into one list, in arrival order.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    (!values.is_empty()).then(|| values.join(", "))
}

/// Build a 302 redirect.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Middleware enforcing an [`AuthGuard`].
///
/// # Example
///
/// ```rust,ignore
/// let guard = AuthGuard::new(options, store, secret)?;
/// let protected = Router::new()
///     .route("/dashboard", get(dashboard))
///     .route_layer(middleware::from_fn_with_state(guard, auth_middleware));
/// ```
pub async fn auth_middleware(State(guard): State<AuthGuard>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let fingerprint = client_fingerprint(request.headers(), peer);
    let session = request.extensions().get::<RequestSession>().cloned();

    let decision = match auth::evaluate(
        &guard.inner.options,
        &AuthRequest {
            session: session.as_ref().map(|s| &s.data),
            fingerprint: &fingerprint,
            cookie_secret: &guard.inner.cookie_secret,
            now: chrono::Utc::now().timestamp(),
        },
    ) {
        Ok(decision) => decision,
        Err(err) => return SecurityError::Config(err).into_response(),
    };

    if let (Some(patch), Some(mut session)) = (decision.patch.as_ref(), session) {
        session.data.apply(patch);
        if let Err(err) = guard.inner.store.store(&session.id, &session.data).await {
            return SecurityError::Store(err).into_response();
        }
        request.extensions_mut().insert(session);
    }

    match decision.action {
        AuthAction::Proceed => next.run(request).await,
        AuthAction::Redirect(uri) => found(&uri),
    }
}
