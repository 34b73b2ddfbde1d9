//! The session monitor: one actor task that owns the current session.
//!
//! This is the central piece of the lifecycle layer. It's responsible for:
//! - Loading the session from the auth provider at startup
//! - Applying provider change events (login, logout, external refreshes)
//! - Counting down to expiry on a fixed tick while a session exists
//! - Requesting a proactive refresh when the renewal threshold is crossed
//! - Publishing read-only snapshots to subscribers on every state change
//!
//! # Concurrency note
//!
//! All mutable state lives inside a single Tokio task (the actor); the
//! [`SessionMonitor`] handle talks to it through an mpsc channel and reads
//! snapshots from a `watch` channel. There is no locking — correctness
//! hinges on never overlapping asynchronous provider operations, which the
//! actor enforces with an in-flight guard and a sign-out generation
//! counter. Provider calls run in spawned tasks, so a hung provider can
//! never stall the actor loop or deadlock later callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokenwatch_clock::{EpochClock, Tick, Ticker, TickerConfig};
use tokenwatch_session::{
    AuthChange, AuthEvent, AuthProvider, ExpiryState, RefreshError, Session, SignOutError,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::MonitorConfig;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The derived lifecycle stage of the current session.
///
/// Stages are computed from the session, the clock, and the in-flight
/// refresh — never stored as independent flags — and form a clear
/// progression for a single session:
///
/// ```text
/// NoSession ──(sign-in)──→ Active ──(time passes)──→ RenewalDue
///     ↑                      ↑                           │
///     │                      │ (refresh succeeds)        ▼
///     │                      └───────────────────── Refreshing
///     │                                                  │ (refresh fails,
///     │                                                  ▼  time runs out)
///     └──────────(sign-out, from any stage)────────── Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// No session exists: initial state, or after sign-out.
    NoSession,
    /// Session present, comfortably before the renewal threshold.
    Active,
    /// Session present and inside the renewal window, no refresh running.
    RenewalDue,
    /// A refresh request is in flight.
    Refreshing,
    /// The session reached expiry with no successful refresh superseding
    /// it. The stale session is kept; only sign-out destroys it.
    Expired,
}

impl Stage {
    /// Derives the stage for `session` at time `now`.
    ///
    /// `Expired` wins over `Refreshing`: a session past expiry reads as
    /// expired even while a last-ditch refresh is still in flight.
    pub fn derive(
        session: Option<&Session>,
        now: i64,
        renewal_threshold_secs: u64,
        refreshing: bool,
    ) -> Self {
        let Some(session) = session else {
            return Self::NoSession;
        };
        let remaining = session.seconds_until_expiry(now);
        if remaining == 0 {
            Self::Expired
        } else if refreshing {
            Self::Refreshing
        } else if remaining < renewal_threshold_secs {
            Self::RenewalDue
        } else {
            Self::Active
        }
    }

    /// Returns `true` if a session exists in this stage (possibly stale).
    pub fn has_session(&self) -> bool {
        !matches!(self, Self::NoSession)
    }

    /// Returns `true` if the session is inside the renewal window
    /// (whether or not a refresh is currently running).
    pub fn is_renewal_due(&self) -> bool {
        matches!(self, Self::RenewalDue | Self::Refreshing)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "NoSession"),
            Self::Active => write!(f, "Active"),
            Self::RenewalDue => write!(f, "RenewalDue"),
            Self::Refreshing => write!(f, "Refreshing"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// A read-only snapshot published to subscribers on every state change.
///
/// `revision` increases on every publication, so a subscriber can observe
/// that *something* happened even when the visible fields are unchanged
/// (a failed refresh, for example, republishes because derived expiry may
/// have moved without a new session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// The current session value, if any.
    pub session: Option<Session>,
    /// The stage the monitor derived at publication time.
    pub stage: Stage,
    /// Publication counter, starting at 0 for the initial load.
    pub revision: u64,
}

// ---------------------------------------------------------------------------
// Commands and internal messages
// ---------------------------------------------------------------------------

/// Commands sent from handles to the monitor actor.
enum MonitorCommand {
    /// Request a refresh; the caller attaches to the in-flight outcome.
    Refresh {
        reply: oneshot::Sender<Result<Session, RefreshError>>,
    },
    /// Sign out: clear local state now, invalidate remotely in the
    /// background, report the remote outcome to the caller.
    SignOut {
        reply: oneshot::Sender<Result<(), SignOutError>>,
    },
    /// Tear the monitor down.
    Shutdown,
}

/// Resolution of a spawned provider refresh call.
struct RefreshOutcome {
    /// The sign-out generation the refresh started under. A mismatch on
    /// arrival means a sign-out superseded it and the result is discarded.
    generation: u64,
    result: Result<Session, RefreshError>,
}

// ---------------------------------------------------------------------------
// SessionMonitor (handle)
// ---------------------------------------------------------------------------

/// Handle to a running session monitor. The application's view of the
/// session lifecycle.
///
/// Cheap to clone — every clone talks to the same actor. Reads
/// ([`session`](Self::session), [`expiry_state`](Self::expiry_state),
/// [`stage`](Self::stage)) are synchronous snapshots with no side effects;
/// [`refresh`](Self::refresh) and [`sign_out`](Self::sign_out) round-trip
/// through the actor.
///
/// There is no global instance: application wiring creates one monitor at
/// startup and passes clones to consumers, and tests create as many
/// independent monitors as they like.
#[derive(Clone)]
pub struct SessionMonitor {
    commands: mpsc::Sender<MonitorCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    clock: EpochClock,
}

impl SessionMonitor {
    /// Starts a monitor over `provider` with the system wall clock.
    ///
    /// Performs the one-time initial session fetch before returning, so
    /// the first snapshot already reflects the provider's current state.
    /// A fetch failure is fail-open: the monitor starts with no session.
    pub async fn spawn<P: AuthProvider>(provider: P, config: MonitorConfig) -> Self {
        Self::spawn_with_clock(provider, config, EpochClock::system()).await
    }

    /// Starts a monitor with an explicit [`EpochClock`].
    ///
    /// Tests anchor the clock and build session expiries against it.
    pub async fn spawn_with_clock<P: AuthProvider>(
        provider: P,
        config: MonitorConfig,
        clock: EpochClock,
    ) -> Self {
        let config = config.validated();
        let provider = Arc::new(provider);

        // Subscribe before the initial fetch so no change event can fall
        // into the gap between the two. Events that arrive during the
        // fetch are processed, in order, once the actor loop starts.
        let events = provider.changes();

        let session = match provider.current_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "initial session load failed — starting with no session"
                );
                None
            }
        };

        let stage = Stage::derive(
            session.as_ref(),
            clock.now(),
            config.renewal_threshold_secs,
            false,
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            session: session.clone(),
            stage,
            revision: 0,
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (outcome_tx, outcome_rx) = mpsc::channel(4);

        let mut ticker = Ticker::new(TickerConfig {
            interval: Duration::from_secs(config.tick_interval_secs),
            initial_jitter_us: config.initial_jitter_us,
        });
        if session.is_some() {
            ticker.arm();
        }

        tracing::info!(%stage, "session monitor started");

        let actor = MonitorActor {
            provider,
            config,
            clock,
            ticker,
            session,
            refreshing: false,
            waiters: Vec::new(),
            generation: 0,
            revision: 0,
            events,
            events_closed: false,
            commands: cmd_rx,
            outcome_tx,
            outcome_rx,
            snapshots: snapshot_tx,
        };
        tokio::spawn(actor.run());

        Self {
            commands: cmd_tx,
            snapshots: snapshot_rx,
            clock,
        }
    }

    /// The current session value, if any. No side effects.
    pub fn session(&self) -> Option<Session> {
        self.snapshots.borrow().session.clone()
    }

    /// The derived expiry view, recomputed from the current session and
    /// the current time. Does not require a tick to have fired.
    pub fn expiry_state(&self) -> ExpiryState {
        let snapshot = self.snapshots.borrow();
        ExpiryState::derive(snapshot.session.as_ref(), self.clock.now())
    }

    /// The stage the monitor last published.
    pub fn stage(&self) -> Stage {
        self.snapshots.borrow().stage
    }

    /// Subscribes to state-change notifications.
    ///
    /// The receiver is notified after every: initial load, refresh success,
    /// refresh failure, sign-out, and clock-driven stage change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Requests a session refresh.
    ///
    /// Idempotent while a refresh is in flight: concurrent callers attach
    /// to the same provider call and observe the same outcome. On success
    /// the session is replaced wholesale; on failure the existing session
    /// is left untouched and the error is returned for surfacing.
    pub async fn refresh(&self) -> Result<Session, RefreshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(MonitorCommand::Refresh { reply: reply_tx })
            .await
            .map_err(|_| RefreshError::Unavailable)?;
        reply_rx.await.map_err(|_| RefreshError::Unavailable)?
    }

    /// Signs out.
    ///
    /// Local state is cleared and subscribers notified *before* the
    /// provider call resolves; the returned result only reports the remote
    /// outcome. Calling with no session is a no-op that resolves `Ok`.
    pub async fn sign_out(&self) -> Result<(), SignOutError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(MonitorCommand::SignOut { reply: reply_tx })
            .await
            .map_err(|_| SignOutError::Unavailable)?;
        reply_rx.await.map_err(|_| SignOutError::Unavailable)?
    }

    /// Tears the monitor down. The repeating timer and the provider
    /// subscription are released together when the actor exits. Dropping
    /// every handle has the same effect.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(MonitorCommand::Shutdown).await;
    }
}

// ---------------------------------------------------------------------------
// MonitorActor
// ---------------------------------------------------------------------------

/// The internal actor state. Runs inside a single Tokio task.
struct MonitorActor<P: AuthProvider> {
    provider: Arc<P>,
    config: MonitorConfig,
    clock: EpochClock,
    /// Armed while a session exists, disarmed otherwise.
    ticker: Ticker,
    /// The one authoritative session value. Replaced wholesale, never
    /// partially mutated.
    session: Option<Session>,
    /// Whether a provider refresh call is in flight.
    refreshing: bool,
    /// Callers attached to the in-flight refresh. Tick-driven refreshes
    /// leave this empty; explicit `refresh()` calls each add one entry.
    waiters: Vec<oneshot::Sender<Result<Session, RefreshError>>>,
    /// Incremented on every sign-out; refresh outcomes started under an
    /// older generation are discarded on arrival.
    generation: u64,
    revision: u64,
    events: mpsc::UnboundedReceiver<AuthChange>,
    events_closed: bool,
    commands: mpsc::Receiver<MonitorCommand>,
    outcome_tx: mpsc::Sender<RefreshOutcome>,
    outcome_rx: mpsc::Receiver<RefreshOutcome>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<P: AuthProvider> MonitorActor<P> {
    /// Runs the actor loop until shutdown or until every handle is gone.
    async fn run(mut self) {
        tracing::debug!("session monitor actor started");

        loop {
            tokio::select! {
                maybe_cmd = self.commands.recv() => match maybe_cmd {
                    Some(MonitorCommand::Refresh { reply }) => {
                        self.handle_refresh_command(reply);
                    }
                    Some(MonitorCommand::SignOut { reply }) => {
                        self.handle_sign_out(reply);
                    }
                    Some(MonitorCommand::Shutdown) | None => break,
                },
                maybe_change = self.events.recv(), if !self.events_closed => {
                    match maybe_change {
                        Some(change) => self.handle_auth_change(change),
                        None => {
                            tracing::warn!("auth provider change stream closed");
                            self.events_closed = true;
                        }
                    }
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_refresh_outcome(outcome);
                }
                tick = self.ticker.wait() => {
                    self.handle_tick(tick);
                }
            }
        }

        // Dropping the actor releases the ticker and the provider
        // subscription together.
        tracing::debug!("session monitor actor stopped");
    }

    // -- Commands ---------------------------------------------------------

    fn handle_refresh_command(
        &mut self,
        reply: oneshot::Sender<Result<Session, RefreshError>>,
    ) {
        if self.session.is_none() {
            let _ = reply.send(Err(RefreshError::NoSession));
            return;
        }
        self.waiters.push(reply);
        self.start_refresh();
        self.publish_if_stage_changed();
    }

    fn handle_sign_out(&mut self, reply: oneshot::Sender<Result<(), SignOutError>>) {
        if self.session.is_none() && !self.refreshing {
            // Already signed out: resolve without a provider call.
            let _ = reply.send(Ok(()));
            return;
        }

        self.clear_local_session("sign-out requested");

        // The remote invalidation runs in the background; its outcome is
        // reported to the caller but logout is already complete locally.
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            let result = provider.sign_out().await;
            if let Err(e) = &result {
                tracing::warn!(
                    error = %e,
                    "remote sign-out failed — local session already cleared"
                );
            }
            let _ = reply.send(result);
        });
    }

    // -- Provider events --------------------------------------------------

    fn handle_auth_change(&mut self, change: AuthChange) {
        match (change.event, change.session) {
            (AuthEvent::SignedOut, _) => {
                // External sign-out wins over anything in flight.
                self.clear_local_session("provider reported sign-out");
            }
            (event, Some(session)) => {
                tracing::info!(
                    %event,
                    expires_at = session.expires_at,
                    "session adopted from provider event"
                );
                self.session = Some(session);
                self.ticker.arm();
                self.publish();
            }
            (event, None) => {
                // Authenticated events carry a session per the provider
                // contract; treat the absence conservatively as sign-out.
                tracing::warn!(%event, "event carried no session — clearing local state");
                self.clear_local_session("event carried no session");
            }
        }
    }

    // -- Refresh lifecycle ------------------------------------------------

    /// Starts a provider refresh unless one is already in flight.
    ///
    /// The call runs in a spawned task and reports back through the
    /// outcome channel, tagged with the current sign-out generation.
    fn start_refresh(&mut self) {
        if self.refreshing {
            return; // callers attach to the in-flight outcome
        }
        self.refreshing = true;

        let provider = Arc::clone(&self.provider);
        let outcome_tx = self.outcome_tx.clone();
        let generation = self.generation;
        tracing::debug!(generation, "refresh started");
        tokio::spawn(async move {
            let result = provider.refresh().await;
            let _ = outcome_tx.send(RefreshOutcome { generation, result }).await;
        });
    }

    fn handle_refresh_outcome(&mut self, outcome: RefreshOutcome) {
        if outcome.generation != self.generation {
            // A sign-out superseded this refresh. Never resurrect a
            // session after sign-out.
            tracing::debug!(
                generation = outcome.generation,
                current = self.generation,
                "discarding stale refresh result"
            );
            return;
        }

        self.refreshing = false;
        match outcome.result {
            Ok(session) => {
                tracing::info!(expires_at = session.expires_at, "session refreshed");
                self.session = Some(session.clone());
                self.ticker.arm();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(session.clone()));
                }
            }
            Err(e) => {
                // Fail soft: keep the existing session until it naturally
                // expires. Tick-driven attempts have no waiters, so the
                // log line is the only surfacing for them.
                tracing::warn!(error = %e, "refresh failed — keeping current session");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }

        // Derived expiry may have changed either way; subscribers are
        // notified on both success and failure.
        self.publish();
    }

    // -- Clock ------------------------------------------------------------

    fn handle_tick(&mut self, tick: Tick) {
        if tick.ticks_skipped > 0 {
            // Scheduling gap (device sleep, stalled runtime). The expiry
            // math below reads the wall clock fresh, so the jump is
            // absorbed on this tick instead of waiting out the cadence.
            tracing::warn!(
                late_ms = tick.late_by.as_millis() as u64,
                skipped = tick.ticks_skipped,
                "tick fired late — re-deriving expiry now"
            );
        }

        let Some(session) = &self.session else {
            // Nothing to count down; the ticker must not keep firing.
            self.ticker.disarm();
            return;
        };

        let remaining = session.seconds_until_expiry(self.clock.now());
        if remaining == 0 {
            // Expired with no successful refresh superseding it. No
            // automatic attempts past this point — recovery is a new
            // sign-in or an external provider event.
        } else if remaining < self.config.renewal_threshold_secs {
            self.start_refresh();
        }

        self.publish_if_stage_changed();
    }

    // -- State publication ------------------------------------------------

    /// Clears local session state immediately: fails waiting refresh
    /// callers, invalidates any in-flight refresh via the generation
    /// counter, disarms the ticker, and notifies subscribers.
    fn clear_local_session(&mut self, reason: &str) {
        if self.session.is_none() && !self.refreshing && self.waiters.is_empty() {
            return;
        }
        self.generation += 1;
        self.refreshing = false;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(RefreshError::SignedOut));
        }
        self.session = None;
        self.ticker.disarm();
        tracing::info!(reason, "session cleared");
        self.publish();
    }

    fn current_stage(&self) -> Stage {
        Stage::derive(
            self.session.as_ref(),
            self.clock.now(),
            self.config.renewal_threshold_secs,
            self.refreshing,
        )
    }

    /// Publishes a new snapshot unconditionally, bumping the revision.
    fn publish(&mut self) {
        let stage = self.current_stage();
        let previous = self.snapshots.borrow().stage;
        if stage != previous {
            tracing::info!(from = %previous, to = %stage, "session stage changed");
        }
        self.revision += 1;
        self.snapshots.send_replace(SessionSnapshot {
            session: self.session.clone(),
            stage,
            revision: self.revision,
        });
    }

    /// Publishes only when the derived stage moved — the tick path, where
    /// most ticks change nothing and must not wake subscribers.
    fn publish_if_stage_changed(&mut self) {
        if self.current_stage() != self.snapshots.borrow().stage {
            self.publish();
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
