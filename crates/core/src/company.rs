//! Company (resource) authorisation checks.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::session::{NumericFlag, SessionData, SignInInfo};

/// Company scope granting general access, e.g. `https://.../company/12345678`.
static COMPANY_SCOPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/company/([^/\s]+)$").expect("Invalid regex"));

/// Fine-grained company scope, e.g. `https://.../company/12345678/admin.write-full`.
static FINE_GRAINED_COMPANY_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/company/([^/\s]+)/admin\.write-full$").expect("Invalid regex")
});

/// How the user's OAuth scope string is consulted for company access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyScopeCheck {
    /// Only the session's company marker is checked.
    #[default]
    Disabled,
    /// Require a `.../company/{number}` scope.
    Company,
    /// Require a `.../company/{number}/admin.write-full` scope.
    FineGrained,
}

impl CompanyScopeCheck {
    fn pattern(self) -> Option<&'static Regex> {
        match self {
            Self::Disabled => None,
            Self::Company => Some(&COMPANY_SCOPE_RE),
            Self::FineGrained => Some(&FINE_GRAINED_COMPANY_SCOPE_RE),
        }
    }
}

/// Why a user is not authorised for a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyDenial {
    /// The session records no company, or a different one.
    NotAuthorised,
    /// The user's scope does not grant the company.
    ScopeMissing,
    /// Forced re-authentication needs a fresh upgraded authorisation.
    ReauthorisationRequired,
}

/// Whether the session records authorisation for exactly `company_number`.
///
/// The comparison is case sensitive and exact: `"12345678"` does not match
/// `"012345678"`.
#[must_use]
pub fn is_authorised_for_company(company_number: &str, sign_in_info: &SignInInfo) -> bool {
    sign_in_info
        .company_number
        .as_deref()
        .is_some_and(|authorised| !authorised.is_empty() && authorised == company_number)
}

/// Whether any scope in the space separated `scope` grants `company_number`.
#[must_use]
pub fn scope_grants_company(scope: &str, company_number: &str, check: CompanyScopeCheck) -> bool {
    let Some(pattern) = check.pattern() else {
        return true;
    };

    scope.split_whitespace().any(|granted| {
        pattern
            .captures(granted)
            .and_then(|caps| caps.get(1))
            .is_some_and(|number| number.as_str() == company_number)
    })
}

/// Whether an upgraded authorisation is still valid at `now` (epoch seconds).
///
/// Missing, non-numeric and expired timestamps are all invalid.
#[must_use]
pub fn upgraded_auth_is_current(timestamp: Option<&NumericFlag>, now: i64) -> bool {
    timestamp
        .and_then(NumericFlag::as_i64)
        .is_some_and(|expiry| expiry > now)
}

/// Requirements for accessing a company's pages.
#[derive(Debug, Clone, Copy)]
pub struct CompanyRequirement<'a> {
    /// Company being accessed.
    pub company_number: &'a str,
    /// How the OAuth scope is consulted.
    pub scope_check: CompanyScopeCheck,
    /// Demand a current upgraded authorisation.
    pub force_reauthorisation: bool,
}

impl CompanyRequirement<'_> {
    /// Check the requirement against a session.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompanyDenial`] that applies.
    pub fn check(&self, session: &SessionData, now: i64) -> Result<(), CompanyDenial> {
        let Some(info) = session.signin_info.as_ref() else {
            return Err(CompanyDenial::NotAuthorised);
        };

        if !is_authorised_for_company(self.company_number, info) {
            return Err(CompanyDenial::NotAuthorised);
        }

        if self.scope_check != CompanyScopeCheck::Disabled {
            let scope = session
                .user_profile()
                .and_then(|profile| profile.scope.as_deref())
                .unwrap_or_default();
            if !scope_grants_company(scope, self.company_number, self.scope_check) {
                return Err(CompanyDenial::ScopeMissing);
            }
        }

        if self.force_reauthorisation
            && !upgraded_auth_is_current(info.user_upgraded_auth_timestamp.as_ref(), now)
        {
            return Err(CompanyDenial::ReauthorisationRequired);
        }

        Ok(())
    }
}
