//! Auth decision engine.
//!
//! A single ordered evaluation per request. The redirect URI is built up
//! front (including `additional_scope` when the scope pre-check fails, even
//! without a session), then the session checks run in order and the first
//! one that fails decides the redirect:
//!
//! 1. session present
//! 2. hijack flag not set
//! 3. client signature matches (signed-in sessions only)
//! 4. signed in
//! 5. company authorised (when a company number is configured)
//! 6. requested scope granted
//!
//! Misconfiguration is an error, never a redirect. Every other negative
//! outcome is a redirect to the sign-in service.

use std::ops::ControlFlow;

use secrecy::SecretString;
use thiserror::Error;

use crate::company::{CompanyRequirement, CompanyScopeCheck};
use crate::scope::{RequestScopeAndPermissions, is_satisfied};
use crate::session::{SessionData, SessionPatch};
use crate::signature::{ClientFingerprint, SignatureCheck, check_signature, compute_signature};

/// Redirect query parameter carrying the return URL.
pub const RETURN_TO_PARAM: &str = "return_to";
/// Redirect query parameter carrying the company number.
pub const COMPANY_NUMBER_PARAM: &str = "company_number";
/// Redirect query parameter carrying the extra scope to request.
pub const ADDITIONAL_SCOPE_PARAM: &str = "additional_scope";
/// Redirect query parameter forcing company re-authentication.
pub const COMPANY_FORCE_AUTH_PARAM: &str = "company_force_auth";
/// Redirect query parameter asking the sign-in service to keep the association.
pub const SAVE_ASSOCIATION_PARAM: &str = "save_association";

/// Deployment or programming defects in auth configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthConfigError {
    /// The sign-in service base URL is empty.
    #[error("Required Field CHS Web URL not set")]
    MissingSignInUrl,

    /// Forced company authentication without a company number.
    #[error("company number is required when company authentication is forced")]
    MissingCompanyNumber,

    /// ACSP number is blank or the literal `undefined`.
    #[error("invalid ACSP number - {0}")]
    InvalidAcspNumber(String),
}

/// What to do with a session whose signature no longer matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HijackPolicy {
    /// Set the hijack flag only.
    #[default]
    FlagOnly,
    /// Set the hijack flag and drop all other session data.
    FlagAndClear,
}

/// Per-route auth configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOptions {
    /// Where the sign-in service sends the user back to.
    pub return_url: String,
    /// Base URL of the sign-in service.
    pub chs_web_url: String,
    /// Company the route belongs to.
    pub company_number: Option<String>,
    /// Scope and permissions the route needs.
    pub request_scope_and_permissions: Option<RequestScopeAndPermissions>,
    /// Demand a current upgraded company authorisation.
    pub force_company_authentication: bool,
    /// Passed through to the sign-in service on forced re-authentication.
    pub save_association: bool,
    /// How the user's OAuth scope is consulted for company access.
    pub company_scope_check: CompanyScopeCheck,
    /// Pin signed-in sessions to the client that first used them.
    pub verify_client_signature: bool,
    /// Behaviour on a signature mismatch.
    pub hijack_policy: HijackPolicy,
}

impl AuthOptions {
    /// Options for a route that only needs a signed-in user.
    #[must_use]
    pub fn new(return_url: impl Into<String>, chs_web_url: impl Into<String>) -> Self {
        Self {
            return_url: return_url.into(),
            chs_web_url: chs_web_url.into(),
            company_number: None,
            request_scope_and_permissions: None,
            force_company_authentication: false,
            save_association: false,
            company_scope_check: CompanyScopeCheck::Disabled,
            verify_client_signature: true,
            hijack_policy: HijackPolicy::FlagOnly,
        }
    }

    /// Require authorisation for a company.
    #[must_use]
    pub fn with_company_number(mut self, company_number: impl Into<String>) -> Self {
        self.company_number = Some(company_number.into());
        self
    }

    /// Require scope and permissions.
    #[must_use]
    pub fn with_scope(mut self, request: RequestScopeAndPermissions) -> Self {
        self.request_scope_and_permissions = Some(request);
        self
    }

    /// Force a fresh upgraded company authorisation.
    #[must_use]
    pub const fn force_company_authentication(mut self, save_association: bool) -> Self {
        self.force_company_authentication = true;
        self.save_association = save_association;
        self
    }

    /// Consult the user's OAuth scope for company access.
    #[must_use]
    pub const fn with_company_scope_check(mut self, check: CompanyScopeCheck) -> Self {
        self.company_scope_check = check;
        self
    }

    /// Enable or disable the client signature check.
    #[must_use]
    pub const fn verify_client_signature(mut self, verify: bool) -> Self {
        self.verify_client_signature = verify;
        self
    }

    /// Choose what happens on a signature mismatch.
    #[must_use]
    pub const fn with_hijack_policy(mut self, policy: HijackPolicy) -> Self {
        self.hijack_policy = policy;
        self
    }

    /// Configured company number; blank counts as unset.
    #[must_use]
    pub fn company_number(&self) -> Option<&str> {
        self.company_number.as_deref().filter(|number| !number.is_empty())
    }

    /// Check the options are usable.
    ///
    /// # Errors
    ///
    /// Returns [`AuthConfigError`] if the sign-in URL is blank, or if company
    /// authentication is forced without a company number.
    pub fn validate(&self) -> Result<(), AuthConfigError> {
        if self.chs_web_url.is_empty() {
            return Err(AuthConfigError::MissingSignInUrl);
        }
        if self.force_company_authentication && self.company_number().is_none() {
            return Err(AuthConfigError::MissingCompanyNumber);
        }
        Ok(())
    }
}

/// Request-scoped inputs to the engine.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    /// Session, if the request carries one.
    pub session: Option<&'a SessionData>,
    /// Client attributes for the signature check.
    pub fingerprint: &'a ClientFingerprint,
    /// Server-side secret mixed into the signature.
    pub cookie_secret: &'a SecretString,
    /// Current time in epoch seconds.
    pub now: i64,
}

/// Where the evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No session on the request.
    NoSession,
    /// Session flagged as hijacked, now or on an earlier request.
    HijackBlocked,
    /// Session is not signed in.
    NotSignedIn,
    /// Signed in but not authorised for the company.
    ResourceUnauthorized,
    /// Signed in but lacking requested permissions.
    ScopeInsufficient,
    /// All checks passed.
    Authorized,
}

/// Terminal action for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Continue to the protected handler.
    Proceed,
    /// Redirect to the sign-in service.
    Redirect(String),
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    /// Final state.
    pub state: AuthState,
    /// What the caller must do.
    pub action: AuthAction,
    /// Session changes to apply and persist, whatever the action.
    pub patch: Option<SessionPatch>,
}

impl AuthDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_authorised(&self) -> bool {
        matches!(self.action, AuthAction::Proceed)
    }

    /// Redirect target, if the request is redirected.
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        match &self.action {
            AuthAction::Proceed => None,
            AuthAction::Redirect(uri) => Some(uri),
        }
    }
}

/// Sign-in redirect URI under construction.
///
/// Values are appended verbatim; the sign-in service expects raw scope URIs.
#[derive(Debug, Clone)]
struct SignInRedirect(String);

impl SignInRedirect {
    fn new(chs_web_url: &str, return_url: &str) -> Self {
        Self(format!("{chs_web_url}/signin?{RETURN_TO_PARAM}={return_url}"))
    }

    fn append(&mut self, key: &str, value: &str) {
        self.0.push('&');
        self.0.push_str(key);
        self.0.push('=');
        self.0.push_str(value);
    }
}

struct Evaluation<'a> {
    options: &'a AuthOptions,
    request: &'a AuthRequest<'a>,
    session: &'a SessionData,
    redirect: SignInRedirect,
    patch: Option<SessionPatch>,
}

type SessionCheck = fn(&mut Evaluation<'_>) -> ControlFlow<AuthState>;

/// Checks run against a present session, in order.
const SESSION_CHECKS: [SessionCheck; 5] = [
    hijack_flag,
    client_signature,
    signed_in,
    company_authorised,
    scope_granted,
];

/// Evaluate a request against `options`.
///
/// # Errors
///
/// Returns [`AuthConfigError`] when `options` are unusable; see
/// [`AuthOptions::validate`].
pub fn evaluate(options: &AuthOptions, request: &AuthRequest<'_>) -> Result<AuthDecision, AuthConfigError> {
    if let Err(err) = options.validate() {
        tracing::error!(error = %err, "auth middleware misconfigured");
        return Err(err);
    }

    let mut redirect = SignInRedirect::new(&options.chs_web_url, &options.return_url);

    if let Some(company_number) = options.company_number() {
        redirect.append(COMPANY_NUMBER_PARAM, company_number);
    }

    if let Some(requested) = &options.request_scope_and_permissions {
        let granted = request.session.and_then(SessionData::token_permissions);
        if !is_satisfied(Some(requested), granted) {
            redirect.append(ADDITIONAL_SCOPE_PARAM, &requested.scope);
        }
    }

    let Some(session) = request.session else {
        tracing::debug!(redirect = %redirect.0, "session object is missing");
        return Ok(AuthDecision {
            state: AuthState::NoSession,
            action: AuthAction::Redirect(redirect.0),
            patch: None,
        });
    };

    let mut evaluation = Evaluation {
        options,
        request,
        session,
        redirect,
        patch: None,
    };

    for check in SESSION_CHECKS {
        if let ControlFlow::Break(state) = check(&mut evaluation) {
            return Ok(AuthDecision {
                state,
                action: AuthAction::Redirect(evaluation.redirect.0),
                patch: evaluation.patch,
            });
        }
    }

    tracing::debug!(user_id = ?session.user_id(), "authenticated successfully");
    Ok(AuthDecision {
        state: AuthState::Authorized,
        action: AuthAction::Proceed,
        patch: evaluation.patch,
    })
}

fn hijack_flag(evaluation: &mut Evaluation<'_>) -> ControlFlow<AuthState> {
    if evaluation.session.is_hijacked() {
        tracing::warn!(
            user_id = ?evaluation.session.user_id(),
            "session previously flagged as hijacked"
        );
        return ControlFlow::Break(AuthState::HijackBlocked);
    }
    ControlFlow::Continue(())
}

fn client_signature(evaluation: &mut Evaluation<'_>) -> ControlFlow<AuthState> {
    if !evaluation.options.verify_client_signature || !evaluation.session.is_signed_in() {
        return ControlFlow::Continue(());
    }

    let computed = compute_signature(evaluation.request.fingerprint, evaluation.request.cookie_secret);
    let clear = evaluation.options.hijack_policy == HijackPolicy::FlagAndClear;

    match check_signature(evaluation.session, &computed, clear) {
        SignatureCheck::Matched => ControlFlow::Continue(()),
        SignatureCheck::FirstUse(patch) => {
            tracing::debug!(user_id = ?evaluation.session.user_id(), "recording client signature");
            evaluation.patch = Some(patch);
            ControlFlow::Continue(())
        }
        SignatureCheck::Hijacked(patch) => {
            tracing::warn!(
                user_id = ?evaluation.session.user_id(),
                "client signature mismatch, possible session hijack"
            );
            evaluation.patch = Some(patch);
            ControlFlow::Break(AuthState::HijackBlocked)
        }
    }
}

fn signed_in(evaluation: &mut Evaluation<'_>) -> ControlFlow<AuthState> {
    if evaluation.session.is_signed_in() {
        return ControlFlow::Continue(());
    }
    tracing::info!(
        user_id = ?evaluation.session.user_id(),
        redirect = %evaluation.redirect.0,
        "not signed in"
    );
    ControlFlow::Break(AuthState::NotSignedIn)
}

fn company_authorised(evaluation: &mut Evaluation<'_>) -> ControlFlow<AuthState> {
    let options = evaluation.options;
    let Some(company_number) = options.company_number() else {
        return ControlFlow::Continue(());
    };

    let requirement = CompanyRequirement {
        company_number,
        scope_check: options.company_scope_check,
        force_reauthorisation: options.force_company_authentication,
    };

    let Err(denial) = requirement.check(evaluation.session, evaluation.request.now) else {
        return ControlFlow::Continue(());
    };

    if options.force_company_authentication {
        evaluation.redirect.append(COMPANY_FORCE_AUTH_PARAM, "true");
        evaluation.redirect.append(
            SAVE_ASSOCIATION_PARAM,
            if options.save_association { "true" } else { "false" },
        );
    }

    tracing::info!(
        user_id = ?evaluation.session.user_id(),
        company_number,
        ?denial,
        redirect = %evaluation.redirect.0,
        "not authorised for company"
    );
    ControlFlow::Break(AuthState::ResourceUnauthorized)
}

fn scope_granted(evaluation: &mut Evaluation<'_>) -> ControlFlow<AuthState> {
    let requested = evaluation.options.request_scope_and_permissions.as_ref();
    if is_satisfied(requested, evaluation.session.token_permissions()) {
        return ControlFlow::Continue(());
    }
    tracing::info!(
        user_id = ?evaluation.session.user_id(),
        scope = ?requested.map(|r| r.scope.as_str()),
        redirect = %evaluation.redirect.0,
        "not authorised for requested scope"
    );
    ControlFlow::Break(AuthState::ScopeInsufficient)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::{GrantedPermissions, NumericFlag, SignInInfo, UserProfile};

    const NOW: i64 = 1_700_000_000;

    fn options() -> AuthOptions {
        AuthOptions::new("origin", "accounts")
    }

    fn fingerprint() -> ClientFingerprint {
        ClientFingerprint {
            user_agent: Some("test-agent".into()),
            client_ip: Some("192.0.2.10".into()),
        }
    }

    fn secret() -> SecretString {
        SecretString::from("cookie-secret".to_string())
    }

    fn signed_in_session(signed_in: i64) -> SessionData {
        SessionData {
            signin_info: Some(SignInInfo {
                signed_in: signed_in.into(),
                user_profile: Some(UserProfile {
                    id: Some("sA==".into()),
                    ..UserProfile::default()
                }),
                ..SignInInfo::default()
            }),
            ..SessionData::default()
        }
    }

    fn with_company(mut session: SessionData, company: &str) -> SessionData {
        if let Some(info) = session.signin_info.as_mut() {
            info.company_number = Some(company.to_string());
        }
        session
    }

    fn with_permissions(mut session: SessionData, granted: &[(&str, &str)]) -> SessionData {
        let permissions: GrantedPermissions = granted
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
            .collect();
        if let Some(profile) = session
            .signin_info
            .as_mut()
            .and_then(|info| info.user_profile.as_mut())
        {
            profile.token_permissions = Some(permissions);
        }
        session
    }

    fn run(options: &AuthOptions, session: Option<&SessionData>) -> Result<AuthDecision, AuthConfigError> {
        let fingerprint = fingerprint();
        let secret = secret();
        evaluate(
            options,
            &AuthRequest {
                session,
                fingerprint: &fingerprint,
                cookie_secret: &secret,
                now: NOW,
            },
        )
    }

    fn scope_request() -> RequestScopeAndPermissions {
        RequestScopeAndPermissions::new("https://identity.example/acsp-profile.create")
            .with_permission("acsp_profile", "create")
    }

    #[test]
    fn test_blank_sign_in_url_is_config_error() {
        let options = AuthOptions::new("origin", "");
        assert_eq!(run(&options, None), Err(AuthConfigError::MissingSignInUrl));
    }

    #[test]
    fn test_force_auth_without_company_is_config_error() {
        let options = options().force_company_authentication(true);
        assert_eq!(run(&options, None), Err(AuthConfigError::MissingCompanyNumber));
    }

    #[test]
    fn test_no_session_redirects() {
        let decision = run(&options(), None).unwrap();
        assert_eq!(decision.state, AuthState::NoSession);
        assert_eq!(decision.redirect_uri(), Some("accounts/signin?return_to=origin"));
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_no_session_with_company_and_scope() {
        let options = options()
            .with_company_number("12345678")
            .with_scope(scope_request());
        let decision = run(&options, None).unwrap();
        assert_eq!(
            decision.redirect_uri(),
            Some(
                "accounts/signin?return_to=origin&company_number=12345678\
                 &additional_scope=https://identity.example/acsp-profile.create"
            )
        );
    }

    #[test]
    fn test_not_signed_in_redirects() {
        let session = signed_in_session(0);
        let decision = run(&options(), Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::NotSignedIn);
        assert_eq!(decision.redirect_uri(), Some("accounts/signin?return_to=origin"));
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_signed_in_proceeds_and_records_signature() {
        let session = signed_in_session(1);
        let decision = run(&options(), Some(&session)).unwrap();
        assert!(decision.is_authorised());
        assert_eq!(decision.state, AuthState::Authorized);

        let expected = compute_signature(&fingerprint(), &secret());
        assert_eq!(decision.patch, Some(SessionPatch::record_signature(expected)));
    }

    #[test]
    fn test_matching_signature_proceeds_without_patch() {
        let mut session = signed_in_session(1);
        session.client_signature = Some(compute_signature(&fingerprint(), &secret()));
        let decision = run(&options(), Some(&session)).unwrap();
        assert!(decision.is_authorised());
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_signature_mismatch_blocks() {
        let mut session = signed_in_session(1);
        session.client_signature = Some("deadbeef".into());
        let decision = run(&options(), Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::HijackBlocked);
        assert_eq!(decision.patch, Some(SessionPatch::hijacked(false)));
        assert_eq!(decision.redirect_uri(), Some("accounts/signin?return_to=origin"));
    }

    #[test]
    fn test_signature_mismatch_strict_policy_clears() {
        let mut session = signed_in_session(1);
        session.client_signature = Some("deadbeef".into());
        let options = options().with_hijack_policy(HijackPolicy::FlagAndClear);
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(decision.patch, Some(SessionPatch::hijacked(true)));
    }

    #[test]
    fn test_signature_check_can_be_disabled() {
        let mut session = signed_in_session(1);
        session.client_signature = Some("deadbeef".into());
        let options = options().verify_client_signature(false);
        let decision = run(&options, Some(&session)).unwrap();
        assert!(decision.is_authorised());
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_hijack_flag_blocks_before_other_checks() {
        let mut session = signed_in_session(0);
        session.hijacked = Some(NumericFlag::Text("1".into()));
        let decision = run(&options(), Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::HijackBlocked);
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_signature_not_checked_when_signed_out() {
        let mut session = signed_in_session(0);
        session.client_signature = Some("deadbeef".into());
        let decision = run(&options(), Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::NotSignedIn);
        assert!(decision.patch.is_none());
    }

    #[test]
    fn test_wrong_company_redirects() {
        let session = with_company(signed_in_session(1), "87654321");
        let options = options().with_company_number("12345678");
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::ResourceUnauthorized);
        assert_eq!(
            decision.redirect_uri(),
            Some("accounts/signin?return_to=origin&company_number=12345678")
        );
    }

    #[test]
    fn test_right_company_proceeds() {
        let session = with_company(signed_in_session(1), "12345678");
        let options = options().with_company_number("12345678");
        assert!(run(&options, Some(&session)).unwrap().is_authorised());
    }

    #[test]
    fn test_forced_company_auth_redirect_markers() {
        let session = with_company(signed_in_session(1), "12345678");

        let options = options()
            .with_company_number("12345678")
            .force_company_authentication(true);
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(
            decision.redirect_uri(),
            Some(
                "accounts/signin?return_to=origin&company_number=12345678\
                 &company_force_auth=true&save_association=true"
            )
        );

        let options = self::options()
            .with_company_number("12345678")
            .force_company_authentication(false);
        let decision = run(&options, Some(&session)).unwrap();
        assert!(decision.redirect_uri().unwrap().ends_with("&save_association=false"));
    }

    #[test]
    fn test_forced_company_auth_with_current_upgrade_proceeds() {
        let mut session = with_company(signed_in_session(1), "12345678");
        if let Some(info) = session.signin_info.as_mut() {
            info.user_upgraded_auth_timestamp = Some(NumericFlag::Int(NOW + 600));
        }
        let options = options()
            .with_company_number("12345678")
            .force_company_authentication(false);
        assert!(run(&options, Some(&session)).unwrap().is_authorised());
    }

    #[test]
    fn test_insufficient_scope_redirects_with_additional_scope() {
        let session = with_permissions(signed_in_session(1), &[("acsp_members", "read")]);
        let options = options().with_scope(scope_request());
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::ScopeInsufficient);
        assert_eq!(
            decision.redirect_uri(),
            Some(
                "accounts/signin?return_to=origin\
                 &additional_scope=https://identity.example/acsp-profile.create"
            )
        );
    }

    #[test]
    fn test_sufficient_scope_proceeds() {
        let session = with_permissions(signed_in_session(1), &[("acsp_profile", "create")]);
        let options = options().with_scope(scope_request());
        assert!(run(&options, Some(&session)).unwrap().is_authorised());
    }

    #[test]
    fn test_not_signed_in_redirect_carries_scope() {
        let session = signed_in_session(0);
        let options = options().with_scope(scope_request());
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::NotSignedIn);
        assert!(
            decision
                .redirect_uri()
                .unwrap()
                .contains("&additional_scope=https://identity.example/acsp-profile.create")
        );
    }

    #[test]
    fn test_company_checked_before_scope() {
        let session = with_company(signed_in_session(1), "87654321");
        let options = options()
            .with_company_number("12345678")
            .with_scope(scope_request());
        let decision = run(&options, Some(&session)).unwrap();
        assert_eq!(decision.state, AuthState::ResourceUnauthorized);
    }

    #[test]
    fn test_blank_company_number_is_ignored() {
        let session = signed_in_session(1);
        let options = options().with_company_number("");
        let decision = run(&options, Some(&session)).unwrap();
        assert!(decision.is_authorised());
    }
}
