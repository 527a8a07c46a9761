//! CSRF protection middleware.
//!
//! Mutating requests (`POST`, `PUT`, `PATCH`, `DELETE`) must submit the
//! session's synchroniser token in the `_csrf` body field (form or JSON) or
//! the `X-CSRF-TOKEN` header. Safe requests get a token issued and persisted
//! when the session has none. The current token is exposed to handlers via
//! the [`CsrfToken`] extractor.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{HeaderMap, HeaderName, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use web_security_core::csrf::{self, CsrfError, CsrfOutcome, CsrfPolicy, MethodClass, SubmittedToken};

use crate::error::SecurityError;
use crate::session::{DEFAULT_SESSION_COOKIE_NAME, RequestSession, SessionStore, cookie_value};

/// Default header carrying the token (`X-CSRF-TOKEN`).
pub const DEFAULT_HEADER_NAME: &str = "x-csrf-token";

/// Largest request body buffered when looking for the token (2 MiB).
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// State for [`csrf_middleware`].
#[derive(Debug, Clone)]
pub struct CsrfOptions {
    /// Lifecycle policy: enabled flag, issuing and the token factory.
    pub policy: CsrfPolicy,
    /// Where issued tokens are persisted.
    pub store: Arc<dyn SessionStore>,
    /// Cookie carrying the session id.
    pub cookie_name: String,
    /// Header checked for the token.
    pub header_name: HeaderName,
    /// Body field checked for the token.
    pub parameter_name: String,
    /// Body size limit when reading the token from the body.
    pub body_limit: usize,
}

impl CsrfOptions {
    /// Options with the defaults: enabled, issuing on safe requests, UUID
    /// tokens, `_SID` cookie, `X-CSRF-TOKEN` header and `_csrf` field.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            policy: CsrfPolicy::default(),
            store,
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            header_name: HeaderName::from_static(DEFAULT_HEADER_NAME),
            parameter_name: csrf::DEFAULT_PARAMETER_NAME.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Enable or disable protection.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.policy.enabled = enabled;
        self
    }

    /// Whether safe requests get a token issued when the session has none.
    #[must_use]
    pub const fn create_when_absent(mut self, create: bool) -> Self {
        self.policy.create_when_absent = create;
        self
    }

    /// Replace the token factory.
    #[must_use]
    pub fn with_token_factory(mut self, factory: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.policy.token_factory = Arc::new(factory);
        self
    }

    /// Use a different session cookie.
    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Use a different token header.
    #[must_use]
    pub fn with_header_name(mut self, name: HeaderName) -> Self {
        self.header_name = name;
        self
    }

    /// Use a different token body field.
    #[must_use]
    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }
}

/// The session's CSRF token, for rendering into forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    /// Get the token value for use in templates.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Extractor for the CSRF token.
///
/// Yields an empty token when none was exposed for the request; use
/// `Option<CsrfToken>` to tell the cases apart.
impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_else(|| {
            tracing::debug!("CSRF token not found in request extensions");
            Self(String::new())
        }))
    }
}

impl<S> OptionalFromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned())
    }
}

/// Middleware enforcing [`CsrfOptions`].
///
/// Must run after the session loader. Failures become [`SecurityError`]
/// responses; wrap with
/// [`csrf_error_middleware`](super::csrf_error_middleware) to customise them.
pub async fn csrf_middleware(State(options): State<CsrfOptions>, request: Request, next: Next) -> Response {
    match protect(&options, request).await {
        Ok((request, token)) => {
            let mut response = next.run(request).await;
            if let Some(token) = token {
                response.extensions_mut().insert(token);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn protect(options: &CsrfOptions, request: Request) -> Result<(Request, Option<CsrfToken>), SecurityError> {
    if !options.policy.enabled {
        return Ok((request, None));
    }

    let method = MethodClass::of(request.method().as_str());
    let session = request.extensions().get::<RequestSession>().cloned();

    let (mut request, body_token) = if method == MethodClass::Mutable && session.is_some() {
        read_body_token(request, options).await?
    } else {
        (request, None)
    };

    let header_token = request
        .headers()
        .get(&options.header_name)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let outcome = csrf::evaluate(
        &options.policy,
        method,
        session.as_ref().map(|s| &s.data),
        SubmittedToken {
            body: body_token.as_deref(),
            header: header_token.as_deref(),
        },
    )
    .inspect_err(|err| log_failure(err, request.method().as_str()))?;

    let token = match outcome {
        CsrfOutcome::Proceed { token } => token,
        CsrfOutcome::Issue { token } => {
            if let Some(mut session) = session {
                session.data = session.data.with_csrf_token(token.clone());
                let key = cookie_value(request.headers(), &options.cookie_name)
                    .unwrap_or_else(|| session.id.clone());
                options.store.store(&key, &session.data).await?;
                tracing::debug!("issued CSRF token");
                request.extensions_mut().insert(session);
            }
            Some(token)
        }
    };

    let token = token.map(CsrfToken);
    if let Some(token) = &token {
        request.extensions_mut().insert(token.clone());
    }
    Ok((request, token))
}

fn log_failure(err: &CsrfError, method: &str) {
    match err {
        CsrfError::TokensMismatch => tracing::error!(method, error = %err, "CSRF token mismatch"),
        _ => tracing::warn!(method, error = %err, "CSRF check failed"),
    }
}

async fn read_body_token(request: Request, options: &CsrfOptions) -> Result<(Request, Option<String>), SecurityError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, options.body_limit)
        .await
        .map_err(|e| SecurityError::Body(e.to_string()))?;

    let token = body_field(&parts.headers, &bytes, &options.parameter_name);
    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

/// Read a string field from a form or JSON body.
fn body_field(headers: &HeaderMap, body: &[u8], name: &str) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type.split(';').next().unwrap_or_default().trim();

    if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    } else if mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json") {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get(name)?.as_str().map(String::from)
    } else {
        None
    }
}
