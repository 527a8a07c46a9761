//! Scope matcher: does a user's granted permission set satisfy a request?
//!
//! Values are comma separated sub-permissions. Both sides are normalised
//! (split, trim, drop empties, case-insensitive sort, re-join) and the
//! normalised requested value must appear as a literal substring of the
//! normalised granted value. This is deliberately not set containment:
//! `"create,update"` is not found in `"create,extra,update"`.

use serde::{Deserialize, Serialize};

use crate::session::{GrantedPermissions, TokenPermissions};

/// Scope and permissions a protected route asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestScopeAndPermissions {
    /// Scope URI sent to the sign-in service as `additional_scope`.
    pub scope: String,
    /// Requested permissions keyed by permission name.
    pub token_permissions: TokenPermissions,
}

impl RequestScopeAndPermissions {
    /// Create a request for `scope` with no permissions yet.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            token_permissions: TokenPermissions::new(),
        }
    }

    /// Add a requested permission.
    #[must_use]
    pub fn with_permission(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.token_permissions.insert(key.into(), value.into());
        self
    }
}

/// Normalise a comma separated permission value.
///
/// ```
/// use web_security_core::scope::normalise_permission_value;
///
/// assert_eq!(normalise_permission_value("update , create,,"), "create,update");
/// ```
#[must_use]
pub fn normalise_permission_value(value: &str) -> String {
    let mut items: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect();

    items.sort_by_cached_key(|item| item.to_lowercase());
    items.join(",")
}

/// Whether `granted` satisfies `requested`.
///
/// An absent request is always satisfied; absent grants never satisfy a
/// request. A granted value that is not a string grants nothing.
#[must_use]
pub fn is_satisfied(
    requested: Option<&RequestScopeAndPermissions>,
    granted: Option<&GrantedPermissions>,
) -> bool {
    let Some(requested) = requested else {
        tracing::debug!("no scopes requested");
        return true;
    };

    let Some(granted) = granted else {
        tracing::debug!("user profile has no token permissions");
        return false;
    };

    for (key, requested_value) in &requested.token_permissions {
        let Some(granted_value) = granted.get(key) else {
            tracing::debug!(key = %key, "token permission key missing from user profile");
            return false;
        };
        let Some(granted_value) = granted_value.as_str() else {
            tracing::debug!(key = %key, "token permission value is not a string");
            return false;
        };

        let requested_value = normalise_permission_value(requested_value);
        let granted_value = normalise_permission_value(granted_value);

        if !granted_value.contains(&requested_value) {
            tracing::debug!(
                key = %key,
                requested = %requested_value,
                granted = %granted_value,
                "user profile lacks requested permissions"
            );
            return false;
        }
    }

    true
}
