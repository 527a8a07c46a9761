//! Typed view of the persisted session document.
//!
//! The session is shared with other applications in the same family, so
//! every level keeps the attributes it does not model in a flattened `extra`
//! map. Loading and storing a session never drops data written elsewhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Requested permissions, keyed by permission name.
///
/// Values are comma separated sub-permissions, e.g. `"create,update"`.
pub type TokenPermissions = BTreeMap<String, String>;

/// Permissions granted on a user profile, as stored.
///
/// Values are normally comma separated strings; anything else is kept as
/// written and never grants a permission.
pub type GrantedPermissions = BTreeMap<String, Value>;

/// Session keys used in the persisted document.
pub mod keys {
    /// Sign-in information block.
    pub const SIGN_IN_INFO: &str = "signin_info";

    /// Synchroniser token for CSRF protection.
    pub const CSRF_TOKEN: &str = "csrf_token";

    /// Client fingerprint recorded on first signed-in use.
    pub const CLIENT_SIGNATURE: &str = "client_signature";

    /// Set once a fingerprint mismatch has been detected.
    pub const HIJACKED: &str = "hijacked";
}

/// Integer flag that may have been persisted as a number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericFlag {
    /// Stored as a JSON integer.
    Int(i64),
    /// Stored as a JSON float.
    Float(f64),
    /// Stored as a JSON string.
    Text(String),
    /// Any other JSON value; never a number.
    Other(Value),
}

impl Default for NumericFlag {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl NumericFlag {
    /// Read the flag as an integer.
    ///
    /// Strings are read by their integer prefix (leading whitespace, optional
    /// sign, digits), so `"42abc"` is `42` and `"abc"` is `None`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            #[allow(clippy::cast_possible_truncation)] // Timestamps fit comfortably in i64
            Self::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            Self::Float(_) => None,
            Self::Text(text) => parse_int_prefix(text),
            Self::Other(_) => None,
        }
    }

    /// Whether the flag is the number `1`, stored as a number.
    ///
    /// `"1"`, `true` and `1.5` are not.
    #[must_use]
    pub fn is_one(&self) -> bool {
        match self {
            Self::Int(value) => *value == 1,
            #[allow(clippy::float_cmp)] // Exact match on a stored literal
            Self::Float(value) => *value == 1.0,
            Self::Text(_) | Self::Other(_) => false,
        }
    }
}

impl From<i64> for NumericFlag {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

fn parse_int_prefix(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(rest.len(), |(idx, _)| idx);

    rest.get(..digits_end)
        .filter(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse::<i64>().ok())
        .map(|value| sign * value)
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identity id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Permissions granted to the user's token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_permissions: Option<GrantedPermissions>,

    /// Space separated OAuth scopes granted to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Attributes not modelled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Sign-in block of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignInInfo {
    /// `1` when the user is signed in; any other value means signed out.
    #[serde(default)]
    pub signed_in: NumericFlag,

    /// Profile of the signed-in user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<UserProfile>,

    /// Company the user has authorised against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_number: Option<String>,

    /// Expiry (epoch seconds) of an upgraded company authorisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_upgraded_auth_timestamp: Option<NumericFlag>,

    /// Attributes not modelled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignInInfo {
    /// Whether the signed-in flag is set.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.signed_in.is_one()
    }
}

/// The persisted session document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Sign-in state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signin_info: Option<SignInInfo>,

    /// CSRF synchroniser token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Client fingerprint recorded on first signed-in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_signature: Option<String>,

    /// Hijack marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hijacked: Option<NumericFlag>,

    /// Attributes not modelled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionData {
    /// Whether the session belongs to a signed-in user.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.signin_info.as_ref().is_some_and(SignInInfo::is_signed_in)
    }

    /// The user profile, if one is recorded.
    #[must_use]
    pub fn user_profile(&self) -> Option<&UserProfile> {
        self.signin_info.as_ref()?.user_profile.as_ref()
    }

    /// The user id, if one is recorded.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_profile()?.id.as_deref()
    }

    /// Permissions granted to the user.
    #[must_use]
    pub fn token_permissions(&self) -> Option<&GrantedPermissions> {
        self.user_profile()?.token_permissions.as_ref()
    }

    /// Whether a previous request flagged this session as hijacked.
    #[must_use]
    pub fn is_hijacked(&self) -> bool {
        self.hijacked
            .as_ref()
            .and_then(NumericFlag::as_i64)
            .is_some_and(|flag| flag == 1)
    }

    /// The CSRF token, treating an empty string as absent.
    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref().filter(|token| !token.is_empty())
    }

    /// Copy of this session with the CSRF token replaced.
    #[must_use]
    pub fn with_csrf_token(&self, token: impl Into<String>) -> Self {
        Self {
            csrf_token: Some(token.into()),
            ..self.clone()
        }
    }

    /// Apply a patch produced by the signature guard.
    pub fn apply(&mut self, patch: &SessionPatch) {
        if patch.clear {
            *self = Self::default();
        }
        if let Some(signature) = &patch.client_signature {
            self.client_signature = Some(signature.clone());
        }
        if patch.hijacked {
            self.hijacked = Some(NumericFlag::Int(1));
        }
    }
}

/// Changes to record on the session after the signature check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// Signature to store (first signed-in use).
    pub client_signature: Option<String>,
    /// Mark the session as hijacked.
    pub hijacked: bool,
    /// Drop all session data before applying the rest of the patch.
    pub clear: bool,
}

impl SessionPatch {
    /// Patch that records a first-use signature.
    #[must_use]
    pub fn record_signature(signature: impl Into<String>) -> Self {
        Self {
            client_signature: Some(signature.into()),
            ..Self::default()
        }
    }

    /// Patch that flags the session as hijacked.
    #[must_use]
    pub fn hijacked(clear: bool) -> Self {
        Self {
            hijacked: true,
            clear,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_flag_int_prefix() {
        assert_eq!(NumericFlag::Text("42abc".into()).as_i64(), Some(42));
        assert_eq!(NumericFlag::Text("  -7".into()).as_i64(), Some(-7));
        assert_eq!(NumericFlag::Text("abc".into()).as_i64(), None);
        assert_eq!(NumericFlag::Text(String::new()).as_i64(), None);
        assert_eq!(NumericFlag::Float(12.9).as_i64(), Some(12));
        assert_eq!(NumericFlag::Int(1).as_i64(), Some(1));
    }

    #[test]
    fn test_session_deserializes_document() {
        let doc = json!({
            "signin_info": {
                "signed_in": 1,
                "company_number": "12345678",
                "user_profile": {
                    "id": "sA==",
                    "token_permissions": { "acsp_members": "read" },
                    "forename": "Ada"
                },
                "access_token": { "access_token": "abc" }
            },
            "csrf_token": "token",
            "hijacked": "1",
            "last_access": 1_700_000_000
        });

        let session: SessionData = serde_json::from_value(doc).unwrap();

        assert!(session.is_signed_in());
        assert!(session.is_hijacked());
        assert_eq!(session.user_id(), Some("sA=="));
        assert_eq!(session.csrf_token(), Some("token"));
        assert_eq!(
            session.token_permissions().unwrap().get("acsp_members"),
            Some(&json!("read"))
        );
        assert!(session.extra.contains_key("last_access"));
        let info = session.signin_info.as_ref().unwrap();
        assert!(info.extra.contains_key("access_token"));
        assert!(info.user_profile.as_ref().unwrap().extra.contains_key("forename"));
    }

    #[test]
    fn test_unknown_attributes_survive_round_trip() {
        let doc = json!({
            "signin_info": { "signed_in": 0, "admin_permissions": "1" },
            "page_history": ["/a", "/b"]
        });

        let session: SessionData = serde_json::from_value(doc.clone()).unwrap();
        let back = serde_json::to_value(&session).unwrap();

        assert_eq!(back, doc);
    }

    #[test]
    fn test_signed_in_must_be_numeric_one() {
        for flag in [json!(true), json!("1"), json!(1.5), json!(null), json!({ "v": 1 })] {
            let session: SessionData =
                serde_json::from_value(json!({ "signin_info": { "signed_in": flag } })).unwrap();
            assert!(!session.is_signed_in(), "{flag} counted as signed in");
        }

        for flag in [json!(1), json!(1.0)] {
            let session: SessionData =
                serde_json::from_value(json!({ "signin_info": { "signed_in": flag } })).unwrap();
            assert!(session.is_signed_in());
        }
    }

    #[test]
    fn test_odd_values_load_and_round_trip() {
        let doc = json!({
            "signin_info": {
                "signed_in": true,
                "user_upgraded_auth_timestamp": [1],
                "user_profile": { "token_permissions": { "acsp_members": 7 } }
            },
            "hijacked": false
        });

        let session: SessionData = serde_json::from_value(doc.clone()).unwrap();

        assert!(!session.is_signed_in());
        assert!(!session.is_hijacked());
        assert_eq!(serde_json::to_value(&session).unwrap(), doc);
    }

    #[test]
    fn test_null_token_permissions_is_absent() {
        let session: SessionData = serde_json::from_value(json!({
            "signin_info": { "signed_in": 1, "user_profile": { "token_permissions": null } }
        }))
        .unwrap();

        assert!(session.token_permissions().is_none());
    }

    #[test]
    fn test_empty_csrf_token_is_absent() {
        let session = SessionData {
            csrf_token: Some(String::new()),
            ..SessionData::default()
        };
        assert!(session.csrf_token().is_none());
    }

    #[test]
    fn test_apply_patch() {
        let mut session = SessionData {
            csrf_token: Some("t".into()),
            ..SessionData::default()
        };

        session.apply(&SessionPatch::record_signature("abc"));
        assert_eq!(session.client_signature.as_deref(), Some("abc"));
        assert!(!session.is_hijacked());

        session.apply(&SessionPatch::hijacked(false));
        assert!(session.is_hijacked());
        assert_eq!(session.csrf_token(), Some("t"));

        session.apply(&SessionPatch::hijacked(true));
        assert!(session.is_hijacked());
        assert!(session.csrf_token().is_none());
        assert!(session.client_signature.is_none());
    }

    #[test]
    fn test_with_csrf_token_keeps_other_data() {
        let mut session = SessionData::default();
        session.extra.insert("lang".into(), json!("cy"));

        let updated = session.with_csrf_token("new");

        assert_eq!(updated.csrf_token(), Some("new"));
        assert_eq!(updated.extra.get("lang"), Some(&json!("cy")));
        assert!(session.csrf_token().is_none());
    }
}
