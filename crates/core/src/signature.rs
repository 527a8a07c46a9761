//! Request signature guard.
//!
//! A signed-in session is pinned to the client that first used it: the
//! fingerprint is a SHA-1 hex digest of the user agent, the client IP and a
//! server-side secret. The digest format matches what the other applications
//! sharing the session store write, so signatures stay interchangeable.

use secrecy::{ExposeSecret, SecretString};
use sha1::{Digest, Sha1};

use crate::session::{SessionData, SessionPatch};

/// Client attributes the signature is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// `User-Agent` header, if sent.
    pub user_agent: Option<String>,
    /// Resolved client IP, if known.
    pub client_ip: Option<String>,
}

impl ClientFingerprint {
    /// Build a fingerprint, resolving the client IP from the first
    /// `X-Forwarded-For` entry and falling back to the peer address.
    ///
    /// The entry is used as sent, surrounding whitespace included, so the
    /// digest matches the other session consumers byte for byte.
    #[must_use]
    pub fn resolve(
        user_agent: Option<&str>,
        forwarded_for: Option<&str>,
        peer_addr: Option<&str>,
    ) -> Self {
        let client_ip = forwarded_for
            .filter(|value| !value.is_empty())
            .and_then(|value| value.split(',').next())
            .map(String::from)
            .or_else(|| peer_addr.map(String::from));

        Self {
            user_agent: user_agent.map(String::from),
            client_ip,
        }
    }
}

/// Compute the signature for a client.
///
/// Missing attributes hash as the literal text `undefined` so the digest
/// agrees with signatures written by the other session consumers. An empty
/// secret still produces a signature, just a predictable one.
#[must_use]
pub fn compute_signature(fingerprint: &ClientFingerprint, secret: &SecretString) -> String {
    let user_agent = fingerprint.user_agent.as_deref().unwrap_or("undefined");
    let client_ip = fingerprint.client_ip.as_deref().unwrap_or("undefined");

    let mut hasher = Sha1::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(client_ip.as_bytes());
    hasher.update(secret.expose_secret().as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of comparing a fresh signature with the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Stored signature matches.
    Matched,
    /// Nothing stored yet; record the fresh signature.
    FirstUse(SessionPatch),
    /// Stored signature differs; the session must be flagged.
    Hijacked(SessionPatch),
}

/// Compare `computed` against the signature stored on the session.
///
/// `clear_on_hijack` selects the strict policy where all session data is
/// dropped alongside the hijack flag.
#[must_use]
pub fn check_signature(session: &SessionData, computed: &str, clear_on_hijack: bool) -> SignatureCheck {
    match session.client_signature.as_deref() {
        None | Some("") => SignatureCheck::FirstUse(SessionPatch::record_signature(computed)),
        Some(stored) if stored == computed => SignatureCheck::Matched,
        Some(_) => SignatureCheck::Hijacked(SessionPatch::hijacked(clear_on_hijack)),
    }
}
