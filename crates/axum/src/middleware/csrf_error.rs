//! CSRF failure responder.
//!
//! Sits outside [`csrf_middleware`](super::csrf_middleware) and rewrites
//! the responses of CSRF failures from a [`CsrfErrorResponses`] table.
//! Every other response, including other errors, passes through untouched.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use web_security_core::CsrfErrorResponses;

use crate::error::CsrfFailure;

/// Middleware that maps CSRF failures to configured responses.
///
/// # Example
///
/// ```rust,ignore
/// let responses = Arc::new(CsrfErrorResponses::default());
/// let app = Router::new()
///     .route("/form", post(submit))
///     .layer(middleware::from_fn_with_state(csrf_options, csrf_middleware))
///     .layer(middleware::from_fn_with_state(responses, csrf_error_middleware));
/// ```
pub async fn csrf_error_middleware(
    State(responses): State<Arc<CsrfErrorResponses>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let Some(CsrfFailure(error)) = response.extensions().get::<CsrfFailure>().cloned() else {
        return response;
    };

    let (status, reason) = responses.resolve(&error);
    let status = StatusCode::from_u16(status).unwrap_or_else(|_| {
        tracing::warn!(status, "invalid CSRF error status, using 403");
        StatusCode::FORBIDDEN
    });

    (status, reason).into_response()
}
