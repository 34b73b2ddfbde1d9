//! Session types: the data the monitor tracks between auth events.
//!
//! A "session" here is the local record of an authenticated credential:
//! - WHAT credential it is (an opaque [`TokenRef`] handle)
//! - WHEN it stops being valid (`expires_at`, epoch seconds)
//!
//! Sessions are value objects: every update replaces the whole value, no
//! field is ever mutated in place. The monitor owns the current value for
//! the lifetime of the process; everything else sees clones.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TokenRef
// ---------------------------------------------------------------------------

/// An opaque reference to a credential held by the auth provider.
///
/// This is a newtype over `String` so a token handle can't be confused
/// with any other string in a signature. The value is a *handle*, not the
/// secret itself — the provider owns the raw credential and everything
/// that touches the network; nothing in this codebase inspects the
/// contents of a `TokenRef`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenRef(pub String);

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An immutable snapshot of an authenticated session.
///
/// Created when the auth provider reports an authenticated state, replaced
/// wholesale on refresh or re-authentication, destroyed on sign-out.
///
/// `expires_at` is in the **auth provider's clock frame**. The monitor only
/// ever compares it to local wall-clock time, so a skewed device clock is a
/// known, accepted source of imprecision — documented, not compensated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque handle to the credential this session represents.
    pub token_ref: TokenRef,

    /// Absolute expiry timestamp, epoch seconds.
    pub expires_at: i64,
}

impl Session {
    /// Creates a session snapshot.
    pub fn new(token_ref: TokenRef, expires_at: i64) -> Self {
        Self {
            token_ref,
            expires_at,
        }
    }

    /// Whole seconds until expiry at time `now`, saturating at zero.
    pub fn seconds_until_expiry(&self, now: i64) -> u64 {
        (self.expires_at - now).max(0) as u64
    }

    /// Whether the session has expired at time `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// ExpiryState
// ---------------------------------------------------------------------------

/// The derived, read-only view of whether/when a session expires.
///
/// Computed from the current session and the current time at every call
/// site that needs it — never stored, never ticked into place. With no
/// session there is nothing to expire: `is_expired` is `false` and both
/// optional fields are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryState {
    /// `true` when `now >= expires_at`.
    pub is_expired: bool,

    /// The session's expiry timestamp, or `None` with no session.
    pub expires_at: Option<i64>,

    /// `max(0, expires_at - now)`, or `None` with no session.
    pub time_until_expiry: Option<u64>,
}

impl ExpiryState {
    /// Derives the expiry view for `session` at time `now`.
    pub fn derive(session: Option<&Session>, now: i64) -> Self {
        match session {
            None => Self {
                is_expired: false,
                expires_at: None,
                time_until_expiry: None,
            },
            Some(s) => Self {
                is_expired: s.is_expired(now),
                expires_at: Some(s.expires_at),
                time_until_expiry: Some(s.seconds_until_expiry(now)),
            },
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
