//! Error types for the session boundary.
//!
//! One type per boundary operation, so call sites can't conflate "the
//! initial load failed" with "a refresh failed" — the recovery policies
//! differ (see each type's docs). All variants are recoverable; nothing in
//! this layer is allowed to take the process down.

/// Initial session load from the auth provider failed.
///
/// The monitor fails open on this: it starts with no session, logs the
/// error, and subscribers simply observe "no session" rather than a
/// distinguishable error state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFetchError {
    /// The provider could not produce the current session.
    #[error("auth provider failed to load the current session: {0}")]
    Provider(String),
}

/// A refresh attempt failed or could not be issued.
///
/// `Clone` because a single in-flight refresh outcome fans out to every
/// caller attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The auth provider rejected or failed the refresh call.
    /// The pre-existing session is kept until it naturally expires.
    #[error("auth provider refresh failed: {0}")]
    Provider(String),

    /// There is no session to refresh.
    #[error("no session to refresh")]
    NoSession,

    /// A sign-out superseded this refresh while it was in flight.
    /// The eventual provider response is discarded.
    #[error("session was signed out before the refresh resolved")]
    SignedOut,

    /// The session monitor has shut down.
    #[error("session monitor is unavailable")]
    Unavailable,
}

/// Remote sign-out failed.
///
/// Local session state is always cleared before the provider call
/// resolves, so this error is informational for the caller — logout is
/// never blocked on the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignOutError {
    /// The auth provider failed to invalidate the session remotely.
    #[error("auth provider sign-out failed: {0}")]
    Provider(String),

    /// The session monitor has shut down.
    #[error("session monitor is unavailable")]
    Unavailable,
}
