//! Web Security Demo - sample site using the auth and CSRF middleware.
//!
//! # Architecture
//!
//! - Axum web framework with Askama templates
//! - Sessions in `PostgreSQL` (tower-sessions store) when `DATABASE_URL` is
//!   set, in memory otherwise
//! - CSRF protection on every route, auth guards on `/dashboard`,
//!   `/company` and `/acsp/profile`
//!
//! Signing in happens on the external sign-in service; this binary only
//! redirects there.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tower_sessions_sqlx_store::PostgresStore;
use web_security_axum::{
    AuthGuard, CsrfOptions, MemorySessionStore, SessionLoader, SessionStore, TowerSessionStore,
    auth_middleware, csrf_error_middleware, csrf_middleware, session_loader_middleware,
};
use web_security_core::{AuthOptions, CsrfErrorResponses};

mod config;
mod routes;

use config::DemoConfig;
use routes::AppState;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &DemoConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Pick the session backend.
async fn create_session_store(config: &DemoConfig) -> Arc<dyn SessionStore> {
    let Some(database_url) = config.database_url.as_ref() else {
        tracing::warn!("DATABASE_URL not set, sessions are kept in memory");
        return Arc::new(MemorySessionStore::new());
    };

    let pool = sqlx::PgPool::connect(database_url.expose_secret())
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    let store = PostgresStore::new(pool);
    store
        .migrate()
        .await
        .expect("Failed to create session table");

    Arc::new(TowerSessionStore::new(store))
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = DemoConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "web_security_demo=info,web_security_axum=info,web_security_core=info,tower_http=debug".into()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let store = create_session_store(&config).await;
    let security = &config.security;

    // Guards validate their options here, so misconfiguration fails startup
    let guard = |options: AuthOptions| {
        AuthGuard::new(options, store.clone(), security.cookie_secret.clone())
            .expect("Invalid auth options")
    };
    let dashboard_guard = guard(AuthOptions::new(&config.return_url, &security.chs_web_url));
    let company_guard = guard(
        AuthOptions::new(&config.return_url, &security.chs_web_url)
            .with_company_number(&config.company_number),
    );
    let acsp_guard = guard(AuthOptions::acsp_profile_create(
        &config.return_url,
        &security.chs_web_url,
    ));

    let csrf_options = CsrfOptions::new(store.clone())
        .enabled(security.csrf_enabled)
        .with_cookie_name(&security.session_cookie_name);
    let loader = SessionLoader::new(store.clone()).with_cookie_name(&security.session_cookie_name);
    let csrf_responses = Arc::new(CsrfErrorResponses::default());

    let state = AppState {
        store,
        cookie_name: security.session_cookie_name.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/", get(routes::home))
        .route("/feedback", post(routes::submit_feedback))
        .route("/session/start", get(routes::start_session))
        .merge(
            Router::new()
                .route("/dashboard", get(routes::dashboard))
                .route_layer(middleware::from_fn_with_state(dashboard_guard, auth_middleware)),
        )
        .merge(
            Router::new()
                .route("/company", get(routes::company))
                .route_layer(middleware::from_fn_with_state(company_guard, auth_middleware)),
        )
        .merge(
            Router::new()
                .route("/acsp/profile", get(routes::acsp_profile))
                .route_layer(middleware::from_fn_with_state(acsp_guard, auth_middleware)),
        )
        .layer(middleware::from_fn_with_state(csrf_options, csrf_middleware))
        .layer(middleware::from_fn_with_state(loader, session_loader_middleware))
        .layer(middleware::from_fn_with_state(csrf_responses, csrf_error_middleware))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("demo listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
