//! Dashboard demo: wires a session monitor to a scripted in-process auth
//! provider and prints every snapshot as a JSON line.
//!
//! The provider issues short-lived sessions (8 s) so several renewal
//! cycles play out quickly; the first refresh fails to show the fail-soft
//! path, every later one succeeds. After 20 s the demo signs out and
//! shuts the monitor down.
//!
//! Run with `RUST_LOG=debug` to see the monitor's internal logs alongside
//! the snapshots.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokenwatch::{
    AuthChange, AuthProvider, MonitorConfig, RefreshError, Session, SessionFetchError,
    SessionMonitor, SignOutError, TokenRef,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Issues 8-second sessions. The first refresh fails with a transient
/// error; every later one succeeds with a replacement token.
struct DemoProvider {
    refresh_attempts: AtomicU64,
    session_lifetime_secs: i64,
    /// Kept so the change channel stays open; the demo never emits events.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthChange>>>,
}

impl DemoProvider {
    fn new(session_lifetime_secs: i64) -> Self {
        Self {
            refresh_attempts: AtomicU64::new(0),
            session_lifetime_secs,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn issue(&self, serial: u64) -> Session {
        Session::new(
            TokenRef(format!("demo-token-{serial}")),
            now_epoch() + self.session_lifetime_secs,
        )
    }
}

impl AuthProvider for DemoProvider {
    async fn current_session(&self) -> Result<Option<Session>, SessionFetchError> {
        Ok(Some(self.issue(0)))
    }

    fn changes(&self) -> mpsc::UnboundedReceiver<AuthChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    async fn refresh(&self) -> Result<Session, RefreshError> {
        let attempt = self.refresh_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        // Pretend there's a network on the other side.
        tokio::time::sleep(Duration::from_millis(150)).await;
        if attempt == 1 {
            Err(RefreshError::Provider("transient upstream error".into()))
        } else {
            Ok(self.issue(attempt))
        }
    }

    async fn sign_out(&self) -> Result<(), SignOutError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MonitorConfig {
        renewal_threshold_secs: 5,
        ..MonitorConfig::default()
    };
    let monitor = SessionMonitor::spawn(DemoProvider::new(8), config).await;

    // Print every published snapshot as one JSON line.
    let mut changes = monitor.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let snapshot = changes.borrow_and_update().clone();
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "snapshot serialization failed"),
            }
            if changes.changed().await.is_err() {
                break; // monitor gone
            }
        }
    });

    // Let a few renewal cycles play out, then log out.
    tokio::time::sleep(Duration::from_secs(20)).await;
    if let Err(e) = monitor.sign_out().await {
        tracing::warn!(error = %e, "remote sign-out failed — logged out locally anyway");
    }

    monitor.shutdown().await;
    let _ = printer.await;
}
