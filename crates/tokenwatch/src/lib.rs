//! # Tokenwatch
//!
//! Proactive auth session lifecycle management.
//!
//! Tokenwatch owns one thing: the current authentication session. It loads
//! the session from an injected [`AuthProvider`], watches its expiry on a
//! per-second clock, requests a refresh before the renewal threshold is
//! crossed, and publishes read-only snapshots whenever anything changes.
//! It never talks to the network itself — login, refresh, and sign-out
//! belong to the provider behind the boundary trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenwatch::{MonitorConfig, SessionMonitor};
//!
//! // Implement AuthProvider for your auth backend, then:
//! // let monitor = SessionMonitor::spawn(my_provider, MonitorConfig::default()).await;
//! // let mut changes = monitor.subscribe();
//! // while changes.changed().await.is_ok() {
//! //     let snapshot = changes.borrow().clone();
//! //     // react to snapshot.stage / snapshot.session
//! // }
//! ```

mod config;
mod monitor;

pub use config::MonitorConfig;
pub use monitor::{SessionMonitor, SessionSnapshot, Stage};

// Re-export the session and clock layers so applications depend on one
// crate.
pub use tokenwatch_clock::{EpochClock, Tick, Ticker, TickerConfig};
pub use tokenwatch_session::{
    AuthChange, AuthEvent, AuthProvider, ExpiryState, RefreshError, Session, SessionFetchError,
    SignOutError, TokenRef,
};
