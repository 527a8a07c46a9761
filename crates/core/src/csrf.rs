//! CSRF synchroniser-token lifecycle.
//!
//! Decides, per request, whether a submitted token is valid, whether a
//! token needs issuing, or which [`CsrfError`] to raise. Storage and
//! transport live with the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::session::SessionData;

/// Default header carrying the token.
pub const DEFAULT_HEADER_NAME: &str = "X-CSRF-TOKEN";
/// Default body field carrying the token.
pub const DEFAULT_PARAMETER_NAME: &str = "_csrf";
/// Default status for CSRF failures.
pub const DEFAULT_ERROR_STATUS: u16 = 403;
/// Default body for CSRF failures.
pub const DEFAULT_ERROR_REASON: &str = "CSRF Token Could not be matched";

/// Whether a method changes server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// `POST`, `PUT`, `PATCH` or `DELETE`.
    Mutable,
    /// Everything else.
    Safe,
}

impl MethodClass {
    /// Classify an HTTP method name, ignoring case.
    #[must_use]
    pub fn of(method: &str) -> Self {
        const MUTABLE: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];
        if MUTABLE.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            Self::Mutable
        } else {
            Self::Safe
        }
    }
}

/// CSRF failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsrfError {
    /// Mutating request without a session.
    #[error("Session not set.")]
    SessionUnset,

    /// Mutating request whose session has no token.
    #[error("Session does not include CSRF token.")]
    MissingSessionToken,

    /// Safe request whose session has no token, with issuing disabled.
    #[error("CSRF token not found in session.")]
    TokenNotIssued,

    /// Submitted token differs from the session token.
    #[error("Invalid CSRF token.")]
    TokensMismatch,
}

/// Kind of [`CsrfError`], used as the key for response overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrfErrorKind {
    /// See [`CsrfError::SessionUnset`].
    SessionUnset,
    /// See [`CsrfError::MissingSessionToken`] and [`CsrfError::TokenNotIssued`].
    MissingSessionToken,
    /// See [`CsrfError::TokensMismatch`].
    TokensMismatch,
}

impl CsrfError {
    /// The kind of this error.
    #[must_use]
    pub const fn kind(&self) -> CsrfErrorKind {
        match self {
            Self::SessionUnset => CsrfErrorKind::SessionUnset,
            Self::MissingSessionToken | Self::TokenNotIssued => CsrfErrorKind::MissingSessionToken,
            Self::TokensMismatch => CsrfErrorKind::TokensMismatch,
        }
    }
}

/// Produces fresh tokens.
pub type TokenFactory = Arc<dyn Fn() -> String + Send + Sync>;

/// Default token factory: a random UUID v4.
#[must_use]
pub fn default_token_factory() -> TokenFactory {
    Arc::new(|| uuid::Uuid::new_v4().to_string())
}

/// Behaviour of the CSRF check.
#[derive(Clone)]
pub struct CsrfPolicy {
    /// When `false` every request proceeds untouched.
    pub enabled: bool,
    /// Issue a token on safe requests whose session has none.
    pub create_when_absent: bool,
    /// Source of new tokens.
    pub token_factory: TokenFactory,
}

impl Default for CsrfPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            create_when_absent: true,
            token_factory: default_token_factory(),
        }
    }
}

impl fmt::Debug for CsrfPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfPolicy")
            .field("enabled", &self.enabled)
            .field("create_when_absent", &self.create_when_absent)
            .field("token_factory", &"<fn>")
            .finish()
    }
}

/// Token candidates found on the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmittedToken<'a> {
    /// Value of the configured body field.
    pub body: Option<&'a str>,
    /// Value of the configured header.
    pub header: Option<&'a str>,
}

impl<'a> SubmittedToken<'a> {
    /// The candidate to compare: a non-empty body value, else the header.
    #[must_use]
    pub fn candidate(&self) -> Option<&'a str> {
        self.body.filter(|value| !value.is_empty()).or(self.header)
    }
}

/// Successful CSRF outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfOutcome {
    /// Continue; expose `token` to rendering when present.
    Proceed {
        /// Session token, if any.
        token: Option<String>,
    },
    /// A new token was minted; persist it on the session, then continue.
    Issue {
        /// The new token.
        token: String,
    },
}

impl CsrfOutcome {
    /// The token to expose to rendering.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Proceed { token } => token.as_deref(),
            Self::Issue { token } => Some(token),
        }
    }
}

/// Decide the CSRF outcome for a request.
///
/// # Errors
///
/// Returns the [`CsrfError`] for the first violation found.
pub fn evaluate(
    policy: &CsrfPolicy,
    method: MethodClass,
    session: Option<&SessionData>,
    submitted: SubmittedToken<'_>,
) -> Result<CsrfOutcome, CsrfError> {
    if !policy.enabled {
        return Ok(CsrfOutcome::Proceed { token: None });
    }

    let Some(session) = session else {
        return match method {
            MethodClass::Mutable => Err(CsrfError::SessionUnset),
            MethodClass::Safe => Ok(CsrfOutcome::Proceed { token: None }),
        };
    };

    match (method, session.csrf_token()) {
        (MethodClass::Mutable, None) => Err(CsrfError::MissingSessionToken),
        (MethodClass::Mutable, Some(stored)) => {
            let matches = submitted
                .candidate()
                .is_some_and(|candidate| constant_time_compare(candidate, stored));
            if matches {
                Ok(CsrfOutcome::Proceed {
                    token: Some(stored.to_string()),
                })
            } else {
                Err(CsrfError::TokensMismatch)
            }
        }
        (MethodClass::Safe, Some(stored)) => Ok(CsrfOutcome::Proceed {
            token: Some(stored.to_string()),
        }),
        (MethodClass::Safe, None) if policy.create_when_absent => Ok(CsrfOutcome::Issue {
            token: (policy.token_factory)(),
        }),
        (MethodClass::Safe, None) => Err(CsrfError::TokenNotIssued),
    }
}

/// Compare two strings without short-circuiting on the first difference.
#[must_use]
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Status and body override for one error kind. Either part may be unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Status override.
    pub status: Option<u16>,
    /// Body override.
    pub reason: Option<String>,
}

/// Maps CSRF errors to HTTP status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfErrorResponses {
    /// Status used when no override applies.
    pub default_status: u16,
    /// Body used when no override applies.
    pub default_reason: String,
    /// Per-kind overrides.
    pub mappings: HashMap<CsrfErrorKind, ErrorResponse>,
}

impl Default for CsrfErrorResponses {
    fn default() -> Self {
        Self {
            default_status: DEFAULT_ERROR_STATUS,
            default_reason: DEFAULT_ERROR_REASON.to_string(),
            mappings: HashMap::new(),
        }
    }
}

impl CsrfErrorResponses {
    /// Override the response for one error kind.
    #[must_use]
    pub fn with_mapping(mut self, kind: CsrfErrorKind, response: ErrorResponse) -> Self {
        self.mappings.insert(kind, response);
        self
    }

    /// Resolve status and body for `error`.
    #[must_use]
    pub fn resolve(&self, error: &CsrfError) -> (u16, String) {
        let mapping = self.mappings.get(&error.kind());
        let status = mapping
            .and_then(|m| m.status)
            .unwrap_or(self.default_status);
        let reason = mapping
            .and_then(|m| m.reason.clone())
            .unwrap_or_else(|| self.default_reason.clone());
        (status, reason)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fixed_policy(token: &'static str) -> CsrfPolicy {
        CsrfPolicy {
            token_factory: Arc::new(move || token.to_string()),
            ..CsrfPolicy::default()
        }
    }

    fn session_with(token: &str) -> SessionData {
        SessionData::default().with_csrf_token(token)
    }

    fn body(value: &str) -> SubmittedToken<'_> {
        SubmittedToken {
            body: Some(value),
            header: None,
        }
    }

    #[test]
    fn test_method_class() {
        for method in ["POST", "put", "Patch", "DELETE"] {
            assert_eq!(MethodClass::of(method), MethodClass::Mutable);
        }
        for method in ["GET", "HEAD", "OPTIONS", "TRACE"] {
            assert_eq!(MethodClass::of(method), MethodClass::Safe);
        }
    }

    #[test]
    fn test_disabled_always_proceeds() {
        let policy = CsrfPolicy {
            enabled: false,
            ..CsrfPolicy::default()
        };
        let outcome = evaluate(&policy, MethodClass::Mutable, None, SubmittedToken::default());
        assert_eq!(outcome, Ok(CsrfOutcome::Proceed { token: None }));
    }

    #[test]
    fn test_mutable_without_session() {
        let outcome = evaluate(
            &CsrfPolicy::default(),
            MethodClass::Mutable,
            None,
            body("anything"),
        );
        assert_eq!(outcome, Err(CsrfError::SessionUnset));
    }

    #[test]
    fn test_safe_without_session_proceeds() {
        let outcome = evaluate(
            &CsrfPolicy::default(),
            MethodClass::Safe,
            None,
            SubmittedToken::default(),
        );
        assert_eq!(outcome, Ok(CsrfOutcome::Proceed { token: None }));
    }

    #[test]
    fn test_mutable_without_session_token() {
        let outcome = evaluate(
            &CsrfPolicy::default(),
            MethodClass::Mutable,
            Some(&SessionData::default()),
            body("anything"),
        );
        assert_eq!(outcome, Err(CsrfError::MissingSessionToken));
    }

    #[test]
    fn test_body_token_matches() {
        let session = session_with("abc");
        let outcome = evaluate(&CsrfPolicy::default(), MethodClass::Mutable, Some(&session), body("abc"));
        assert_eq!(
            outcome,
            Ok(CsrfOutcome::Proceed {
                token: Some("abc".into())
            })
        );
    }

    #[test]
    fn test_header_token_matches() {
        let session = session_with("abc");
        let submitted = SubmittedToken {
            body: None,
            header: Some("abc"),
        };
        let outcome = evaluate(&CsrfPolicy::default(), MethodClass::Mutable, Some(&session), submitted);
        assert_eq!(outcome.unwrap().token(), Some("abc"));
    }

    #[test]
    fn test_body_takes_priority_over_header() {
        let session = session_with("abc");

        let body_wins = SubmittedToken {
            body: Some("abc"),
            header: Some("wrong"),
        };
        assert!(evaluate(&CsrfPolicy::default(), MethodClass::Mutable, Some(&session), body_wins).is_ok());

        let body_wrong = SubmittedToken {
            body: Some("wrong"),
            header: Some("abc"),
        };
        assert_eq!(
            evaluate(&CsrfPolicy::default(), MethodClass::Mutable, Some(&session), body_wrong),
            Err(CsrfError::TokensMismatch)
        );
    }

    #[test]
    fn test_empty_body_falls_through_to_header() {
        let session = session_with("abc");
        let submitted = SubmittedToken {
            body: Some(""),
            header: Some("abc"),
        };
        assert!(evaluate(&CsrfPolicy::default(), MethodClass::Mutable, Some(&session), submitted).is_ok());
    }

    #[test]
    fn test_missing_candidate_is_mismatch() {
        let session = session_with("abc");
        assert_eq!(
            evaluate(
                &CsrfPolicy::default(),
                MethodClass::Mutable,
                Some(&session),
                SubmittedToken::default()
            ),
            Err(CsrfError::TokensMismatch)
        );
    }

    #[test]
    fn test_safe_with_token_exposes_it() {
        let session = session_with("abc");
        let outcome = evaluate(
            &fixed_policy("new"),
            MethodClass::Safe,
            Some(&session),
            SubmittedToken::default(),
        );
        assert_eq!(
            outcome,
            Ok(CsrfOutcome::Proceed {
                token: Some("abc".into())
            })
        );
    }

    #[test]
    fn test_safe_without_token_issues() {
        let outcome = evaluate(
            &fixed_policy("new"),
            MethodClass::Safe,
            Some(&SessionData::default()),
            SubmittedToken::default(),
        );
        assert_eq!(outcome, Ok(CsrfOutcome::Issue { token: "new".into() }));
    }

    #[test]
    fn test_safe_without_token_and_issuing_disabled() {
        let policy = CsrfPolicy {
            create_when_absent: false,
            ..CsrfPolicy::default()
        };
        let error = evaluate(
            &policy,
            MethodClass::Safe,
            Some(&SessionData::default()),
            SubmittedToken::default(),
        )
        .unwrap_err();
        assert_eq!(error, CsrfError::TokenNotIssued);
        assert_eq!(error.kind(), CsrfErrorKind::MissingSessionToken);
        assert_eq!(error.to_string(), "CSRF token not found in session.");
    }

    #[test]
    fn test_default_factory_produces_uuids() {
        let factory = default_token_factory();
        let a = factory();
        let b = factory();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_error_responses_default() {
        let responses = CsrfErrorResponses::default();
        assert_eq!(
            responses.resolve(&CsrfError::TokensMismatch),
            (403, "CSRF Token Could not be matched".to_string())
        );
    }

    #[test]
    fn test_error_responses_partial_overrides() {
        let responses = CsrfErrorResponses::default()
            .with_mapping(
                CsrfErrorKind::SessionUnset,
                ErrorResponse {
                    status: Some(401),
                    reason: None,
                },
            )
            .with_mapping(
                CsrfErrorKind::TokensMismatch,
                ErrorResponse {
                    status: None,
                    reason: Some("Bad token".into()),
                },
            );

        assert_eq!(
            responses.resolve(&CsrfError::SessionUnset),
            (401, "CSRF Token Could not be matched".to_string())
        );
        assert_eq!(
            responses.resolve(&CsrfError::TokensMismatch),
            (403, "Bad token".to_string())
        );
        assert_eq!(
            responses.resolve(&CsrfError::MissingSessionToken),
            (403, "CSRF Token Could not be matched".to_string())
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(CsrfError::SessionUnset.to_string(), "Session not set.");
        assert_eq!(
            CsrfError::MissingSessionToken.to_string(),
            "Session does not include CSRF token."
        );
        assert_eq!(CsrfError::TokensMismatch.to_string(), "Invalid CSRF token.");
    }
}
