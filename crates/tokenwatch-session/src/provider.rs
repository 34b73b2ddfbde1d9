//! The auth provider boundary: the contract the monitor consumes.
//!
//! Tokenwatch performs no network authentication itself — login, token
//! refresh, and sign-out belong to an external provider (a hosted auth
//! backend, an OAuth client, a secure-storage wrapper). The monitor talks
//! to it exclusively through the [`AuthProvider`] trait: fetch the current
//! session once at startup, subscribe to change events, request refreshes,
//! request sign-out.
//!
//! Implementations validate in production and script in tests — the
//! monitor's test suite drives a fully scripted in-process provider.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{RefreshError, Session, SessionFetchError, SignOutError};

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// The kind of session change an auth provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    /// The provider's first report after subscribing.
    Initial,
    /// A user signed in.
    SignedIn,
    /// The session ended (user action or provider-side invalidation).
    SignedOut,
    /// The provider rotated the credential; a replacement session follows.
    TokenRefreshed,
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::SignedIn => write!(f, "signed_in"),
            Self::SignedOut => write!(f, "signed_out"),
            Self::TokenRefreshed => write!(f, "token_refreshed"),
        }
    }
}

/// One session-change notification from the provider.
///
/// Authenticated events ([`AuthEvent::Initial`], [`AuthEvent::SignedIn`],
/// [`AuthEvent::TokenRefreshed`]) carry the session they establish;
/// [`AuthEvent::SignedOut`] carries `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChange {
    /// What happened.
    pub event: AuthEvent,
    /// The session now in effect, if any.
    pub session: Option<Session>,
}

// ---------------------------------------------------------------------------
// AuthProvider
// ---------------------------------------------------------------------------

/// External collaborator that performs actual authentication operations
/// and emits session-change events.
///
/// # Trait bounds
///
/// - `Send + Sync` → the provider is shared across async tasks (the
///   monitor calls it from spawned refresh/sign-out tasks).
/// - `'static` → it doesn't borrow temporary data; it lives as long as the
///   monitor that owns it.
///
/// # Example
///
/// ```rust
/// use tokio::sync::mpsc;
/// use tokenwatch_session::{
///     AuthChange, AuthProvider, RefreshError, Session, SessionFetchError,
///     SignOutError, TokenRef,
/// };
///
/// /// Serves one fixed session and never emits a change event.
/// /// Only for development — a real provider talks to an auth backend.
/// struct StaticProvider {
///     session: Session,
/// }
///
/// impl AuthProvider for StaticProvider {
///     async fn current_session(&self) -> Result<Option<Session>, SessionFetchError> {
///         Ok(Some(self.session.clone()))
///     }
///
///     fn changes(&self) -> mpsc::UnboundedReceiver<AuthChange> {
///         // Dropping the sender means no event ever arrives.
///         mpsc::unbounded_channel().1
///     }
///
///     async fn refresh(&self) -> Result<Session, RefreshError> {
///         Ok(self.session.clone())
///     }
///
///     async fn sign_out(&self) -> Result<(), SignOutError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuthProvider: Send + Sync + 'static {
    /// Fetches the session currently held by the provider, if any.
    ///
    /// Called once when a monitor starts. A failure here is fail-open:
    /// the monitor begins with no session rather than an error state.
    fn current_session(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Session>, SessionFetchError>> + Send;

    /// Subscribes to session-change events.
    ///
    /// Events must be delivered in the order they occurred; the monitor
    /// processes them in arrival order and never reorders. Dropping the
    /// receiver is the unsubscribe.
    fn changes(&self) -> mpsc::UnboundedReceiver<AuthChange>;

    /// Requests a credential refresh, resolving with the replacement
    /// session.
    ///
    /// The provider bounds this call with its own timeout policy; the
    /// monitor adds none, but stays responsive while the call is in
    /// flight.
    fn refresh(
        &self,
    ) -> impl std::future::Future<Output = Result<Session, RefreshError>> + Send;

    /// Requests a sign-out on the provider side.
    ///
    /// The monitor clears its local state before this resolves; the result
    /// only tells the caller whether the remote invalidation succeeded.
    fn sign_out(
        &self,
    ) -> impl std::future::Future<Output = Result<(), SignOutError>> + Send;
}
