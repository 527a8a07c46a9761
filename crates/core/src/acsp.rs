//! Preset auth options for ACSP (authorised corporate service provider) routes.

use crate::auth::{AuthConfigError, AuthOptions};
use crate::scope::RequestScopeAndPermissions;

/// Scope requested when creating an ACSP profile.
pub const ACSP_PROFILE_CREATE_SCOPE: &str =
    "https://identity.company-information.service.gov.uk/acsp-profile.create";

/// Prefix of the per-ACSP scope; the ACSP number is appended.
pub const ACSP_SCOPE_PREFIX: &str =
    "https://api.company-information.service.gov.uk/authorized-corporate-service-provider/";

const MEMBER_MANAGEMENT: &str = "create,update,delete";

/// Role of the user within the ACSP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserRole {
    /// Manages owners, admins and standard members.
    Owner,
    /// Manages admins and standard members.
    Admin,
    /// Read-only member.
    #[default]
    Standard,
}

/// Scope and permissions for creating an ACSP profile.
#[must_use]
pub fn acsp_profile_create_scope() -> RequestScopeAndPermissions {
    RequestScopeAndPermissions::new(ACSP_PROFILE_CREATE_SCOPE).with_permission("acsp_profile", "create")
}

/// Scope and permissions for managing the members of an ACSP.
///
/// Every role needs `acsp_members: read` and the ACSP number; owners and
/// admins also need member management on the levels below them.
///
/// # Errors
///
/// Returns [`AuthConfigError::InvalidAcspNumber`] when `acsp_number` is blank
/// or the literal `undefined`.
pub fn acsp_manage_users_scope(
    acsp_number: &str,
    role: UserRole,
) -> Result<RequestScopeAndPermissions, AuthConfigError> {
    if acsp_number.trim().is_empty() || acsp_number == "undefined" {
        tracing::error!(acsp_number, "ACSP number invalid");
        return Err(AuthConfigError::InvalidAcspNumber(acsp_number.to_string()));
    }

    let mut request = RequestScopeAndPermissions::new(format!("{ACSP_SCOPE_PREFIX}{acsp_number}"));

    if role == UserRole::Owner {
        request = request.with_permission("acsp_members_owners", MEMBER_MANAGEMENT);
    }
    if matches!(role, UserRole::Owner | UserRole::Admin) {
        request = request
            .with_permission("acsp_members_admins", MEMBER_MANAGEMENT)
            .with_permission("acsp_members_standard", MEMBER_MANAGEMENT);
    }

    Ok(request
        .with_permission("acsp_members", "read")
        .with_permission("acsp_number", acsp_number))
}

impl AuthOptions {
    /// Options for the ACSP profile creation journey.
    #[must_use]
    pub fn acsp_profile_create(return_url: impl Into<String>, chs_web_url: impl Into<String>) -> Self {
        Self::new(return_url, chs_web_url).with_scope(acsp_profile_create_scope())
    }

    /// Options for ACSP member management.
    ///
    /// # Errors
    ///
    /// Returns [`AuthConfigError::InvalidAcspNumber`] for a blank or
    /// `undefined` ACSP number.
    pub fn acsp_manage_users(
        return_url: impl Into<String>,
        chs_web_url: impl Into<String>,
        acsp_number: &str,
        role: UserRole,
    ) -> Result<Self, AuthConfigError> {
        let scope = acsp_manage_users_scope(acsp_number, role)?;
        Ok(Self::new(return_url, chs_web_url).with_scope(scope))
    }
}
