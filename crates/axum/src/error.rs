//! Middleware error type with Sentry integration.
//!
//! CSRF failures become a 403 carrying a [`CsrfFailure`] response extension
//! so [`csrf_error_middleware`](crate::middleware::csrf_error_middleware)
//! further out can rewrite them. Server-side failures are captured to
//! Sentry before responding.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use web_security_core::{AuthConfigError, CsrfError};

use crate::session::StoreError;

/// Errors raised by the security middleware.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// CSRF validation failed.
    #[error(transparent)]
    Csrf(#[from] CsrfError),

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Auth options are unusable.
    #[error("Auth configuration error: {0}")]
    Config(#[from] AuthConfigError),

    /// Request body could not be read.
    #[error("Unreadable request body: {0}")]
    Body(String),
}

/// Marks a response produced by a CSRF failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfFailure(pub CsrfError);

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        match self {
            Self::Csrf(error) => {
                let mut response = (StatusCode::FORBIDDEN, error.to_string()).into_response();
                response.extensions_mut().insert(CsrfFailure(error));
                response
            }
            Self::Store(_) | Self::Config(_) => {
                let event_id = sentry::capture_error(&self);
                tracing::error!(
                    error = %self,
                    sentry_event_id = %event_id,
                    "Request error"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            Self::Body(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
        }
    }
}
