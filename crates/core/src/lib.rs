//! Web Security Core - authorisation and CSRF decision logic.
//!
//! This crate holds the request-independent half of the web-security
//! middleware:
//! - `auth` - sign-in, company and scope checks producing a redirect or a pass
//! - `csrf` - synchroniser-token validation and issuing
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! framework, no session backend. The axum crate supplies the request, the
//! session store and the response.
//!
//! # Modules
//!
//! - [`session`] - Typed session document and the patches applied to it
//! - [`scope`] - Scope matcher for requested token permissions
//! - [`company`] - Company authorisation checks
//! - [`signature`] - Client signature guard against session hijacking
//! - [`auth`] - Auth decision engine
//! - [`acsp`] - Preset options for ACSP journeys
//! - [`csrf`] - CSRF token lifecycle, error taxonomy and response mapping

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod acsp;
pub mod auth;
pub mod company;
pub mod csrf;
pub mod scope;
pub mod session;
pub mod signature;

pub use auth::{AuthAction, AuthConfigError, AuthDecision, AuthOptions, AuthRequest, AuthState, HijackPolicy};
pub use company::CompanyScopeCheck;
pub use csrf::{CsrfError, CsrfErrorKind, CsrfErrorResponses, CsrfOutcome, CsrfPolicy, MethodClass};
pub use scope::RequestScopeAndPermissions;
pub use session::{SessionData, SessionPatch};
pub use signature::ClientFingerprint;
