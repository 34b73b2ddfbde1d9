//! Session value objects and the auth provider boundary for Tokenwatch.
//!
//! This crate defines the data the session monitor operates on:
//!
//! 1. **Session entity** — an immutable snapshot of a credential handle and
//!    its expiry ([`Session`], [`TokenRef`])
//! 2. **Derived expiry state** — the recomputed-on-demand read model
//!    ([`ExpiryState`])
//! 3. **Auth provider boundary** — the trait the monitor consumes for all
//!    network authentication work ([`AuthProvider`]), and the change events
//!    it emits ([`AuthChange`], [`AuthEvent`])
//! 4. **Error taxonomy** — one error type per boundary operation
//!    ([`SessionFetchError`], [`RefreshError`], [`SignOutError`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Application / UI (above)      ← observes snapshots, calls refresh/sign-out
//!     ↕
//! Monitor Layer (tokenwatch)    ← owns the current Session, runs the clock
//!     ↕
//! Session Layer (this crate)    ← value objects and the provider contract
//!     ↕
//! Auth Provider (external)      ← performs actual network auth operations
//! ```

mod error;
mod provider;
mod session;

pub use error::{RefreshError, SessionFetchError, SignOutError};
pub use provider::{AuthChange, AuthEvent, AuthProvider};
pub use session::{ExpiryState, Session, TokenRef};
