//! HTTP route handlers for the demo.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health          - Health check
//! GET  /                - Feedback form (carries the CSRF token)
//! POST /feedback        - Feedback submission (CSRF protected)
//! GET  /session/start   - Start an anonymous session
//!
//! # Guarded
//! GET  /dashboard       - Signed-in users
//! GET  /company         - Users authorised for the configured company
//! GET  /acsp/profile    - Users holding the ACSP profile create permission
//! ```

use std::sync::Arc;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    http::header,
    response::{IntoResponse, Redirect},
};
use serde::Deserialize;
use tower_sessions::cookie::{Cookie, SameSite};
use tower_sessions::session::Id;
use web_security_axum::{CsrfToken, CurrentSession, SecurityError, SessionStore};
use web_security_core::SessionData;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session storage
    pub store: Arc<dyn SessionStore>,
    /// Session cookie name
    pub cookie_name: String,
}

// =============================================================================
// Templates
// =============================================================================

/// Feedback form template.
#[derive(Template, WebTemplate)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub has_session: bool,
    pub csrf_token: String,
}

/// Feedback received template.
#[derive(Template, WebTemplate)]
#[template(path = "feedback.html")]
pub struct FeedbackTemplate {
    pub message: String,
}

/// Guarded page template.
#[derive(Template, WebTemplate)]
#[template(path = "guarded.html")]
pub struct GuardedTemplate {
    pub title: &'static str,
    pub user_id: String,
    pub email: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Liveness health check endpoint.
pub async fn health() -> &'static str {
    "ok"
}

/// GET /
pub async fn home(CurrentSession(session): CurrentSession, token: Option<CsrfToken>) -> HomeTemplate {
    HomeTemplate {
        has_session: session.is_some(),
        csrf_token: token.map(|t| t.0).unwrap_or_default(),
    }
}

/// Feedback form data.
#[derive(Debug, Deserialize)]
pub struct FeedbackForm {
    pub message: String,
}

/// POST /feedback
///
/// Only reached once the CSRF middleware has accepted the token.
pub async fn submit_feedback(Form(form): Form<FeedbackForm>) -> FeedbackTemplate {
    tracing::info!(length = form.message.len(), "feedback received");
    FeedbackTemplate {
        message: form.message,
    }
}

/// GET /session/start
///
/// Stores an empty session and sets the session cookie.
pub async fn start_session(State(state): State<AppState>) -> Result<impl IntoResponse, SecurityError> {
    let id = Id::default().to_string();
    state.store.store(&id, &SessionData::default()).await?;

    let cookie = Cookie::build((state.cookie_name.clone(), id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    tracing::debug!("anonymous session started");
    Ok(([(header::SET_COOKIE, cookie.to_string())], Redirect::to("/")))
}

fn guarded(title: &'static str, session: Option<&SessionData>) -> GuardedTemplate {
    let profile = session.and_then(SessionData::user_profile);
    GuardedTemplate {
        title,
        user_id: session
            .and_then(SessionData::user_id)
            .unwrap_or_default()
            .to_string(),
        email: profile.and_then(|p| p.email.clone()),
    }
}

/// GET /dashboard
pub async fn dashboard(CurrentSession(session): CurrentSession) -> GuardedTemplate {
    guarded("Dashboard", session.as_ref().map(|s| &s.data))
}

/// GET /company
pub async fn company(CurrentSession(session): CurrentSession) -> GuardedTemplate {
    guarded("Company", session.as_ref().map(|s| &s.data))
}

/// GET /acsp/profile
pub async fn acsp_profile(CurrentSession(session): CurrentSession) -> GuardedTemplate {
    guarded("ACSP profile", session.as_ref().map(|s| &s.data))
}
