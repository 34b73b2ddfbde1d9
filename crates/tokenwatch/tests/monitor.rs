//! Integration tests for the session monitor.
//!
//! Uses `tokio::time::pause()` (via `start_paused = true`) to control time
//! deterministically, a clock anchored at a known epoch, and a fully
//! scripted in-process auth provider: refresh outcomes are queued or held
//! in flight until the test releases them, change events are injected, and
//! call counts are observable. Jitter is zeroed so tick deadlines are
//! exact.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokenwatch::{
    AuthChange, AuthEvent, AuthProvider, EpochClock, MonitorConfig, RefreshError, Session,
    SessionFetchError, SessionMonitor, SessionSnapshot, SignOutError, Stage, TokenRef,
};
use tokio::sync::{mpsc, oneshot, watch};

const HOUR: i64 = 3_600;

// =========================================================================
// Scripted provider
// =========================================================================

/// One scripted outcome for a `refresh()` call.
enum RefreshScript {
    /// Resolve immediately with this result.
    Ready(Result<Session, RefreshError>),
    /// Stay in flight until the test sends the result.
    Held(oneshot::Receiver<Result<Session, RefreshError>>),
}

struct FakeInner {
    initial: Mutex<Result<Option<Session>, SessionFetchError>>,
    refresh_script: Mutex<VecDeque<RefreshScript>>,
    sign_out_result: Mutex<Result<(), SignOutError>>,
    refresh_calls: AtomicU64,
    sign_out_calls: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthChange>>>,
}

/// A fully scripted auth provider. Cloning shares the script and counters,
/// so the test keeps one clone and hands the other to the monitor.
#[derive(Clone)]
struct FakeProvider {
    inner: Arc<FakeInner>,
}

impl FakeProvider {
    /// A provider with no current session. Unscripted refreshes fail.
    fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                initial: Mutex::new(Ok(None)),
                refresh_script: Mutex::new(VecDeque::new()),
                sign_out_result: Mutex::new(Ok(())),
                refresh_calls: AtomicU64::new(0),
                sign_out_calls: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A provider whose initial fetch returns `session`.
    fn with_session(session: Session) -> Self {
        let provider = Self::new();
        *provider.inner.initial.lock().unwrap() = Ok(Some(session));
        provider
    }

    /// Make the initial fetch fail.
    fn fail_initial(&self, msg: &str) {
        *self.inner.initial.lock().unwrap() = Err(SessionFetchError::Provider(msg.into()));
    }

    /// Queue an immediate outcome for the next refresh call.
    fn script_refresh(&self, result: Result<Session, RefreshError>) {
        self.inner
            .refresh_script
            .lock()
            .unwrap()
            .push_back(RefreshScript::Ready(result));
    }

    /// Hold the next refresh call in flight; the returned sender releases
    /// it with whatever outcome the test chooses.
    fn hold_refresh(&self) -> oneshot::Sender<Result<Session, RefreshError>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .refresh_script
            .lock()
            .unwrap()
            .push_back(RefreshScript::Held(rx));
        tx
    }

    /// Make sign-out calls fail remotely.
    fn fail_sign_out(&self, msg: &str) {
        *self.inner.sign_out_result.lock().unwrap() = Err(SignOutError::Provider(msg.into()));
    }

    /// Inject a session-change event, as the real provider would emit it.
    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        for tx in self.inner.subscribers.lock().unwrap().iter() {
            let _ = tx.send(AuthChange {
                event,
                session: session.clone(),
            });
        }
    }

    fn refresh_calls(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    fn sign_out_calls(&self) -> u64 {
        self.inner.sign_out_calls.load(Ordering::SeqCst)
    }
}

impl AuthProvider for FakeProvider {
    async fn current_session(&self) -> Result<Option<Session>, SessionFetchError> {
        self.inner.initial.lock().unwrap().clone()
    }

    fn changes(&self) -> mpsc::UnboundedReceiver<AuthChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().unwrap().push(tx);
        rx
    }

    async fn refresh(&self) -> Result<Session, RefreshError> {
        self.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.inner.refresh_script.lock().unwrap().pop_front();
        match next {
            Some(RefreshScript::Ready(result)) => result,
            Some(RefreshScript::Held(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(RefreshError::Provider("refresh abandoned".into()))),
            None => Err(RefreshError::Provider("no refresh scripted".into())),
        }
    }

    async fn sign_out(&self) -> Result<(), SignOutError> {
        self.inner.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_out_result.lock().unwrap().clone()
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn config(renewal_threshold_secs: u64) -> MonitorConfig {
    MonitorConfig {
        renewal_threshold_secs,
        tick_interval_secs: 1,
        initial_jitter_us: 0,
    }
}

fn session(token: &str, expires_at: i64) -> Session {
    Session::new(TokenRef::from(token), expires_at)
}

/// Let spawned tasks (provider calls, reply deliveries) run to their next
/// await point without advancing time.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Wait until the monitor publishes a snapshot matching `predicate`.
/// Paused time auto-advances through ticks; the (virtual) timeout turns a
/// never-satisfied predicate into a clean failure instead of a spin.
async fn wait_until(
    rx: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if predicate(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("monitor actor stopped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

async fn wait_for_stage(
    rx: &mut watch::Receiver<SessionSnapshot>,
    want: Stage,
) -> SessionSnapshot {
    wait_until(rx, |snapshot| snapshot.stage == want).await
}

// =========================================================================
// Startup
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_spawn_with_session_starts_active() {
    let clock = EpochClock::anchored_at(1_000);
    let provider = FakeProvider::with_session(session("tok", 1_000 + HOUR));

    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    assert_eq!(monitor.stage(), Stage::Active);
    let state = monitor.expiry_state();
    assert!(!state.is_expired);
    assert_eq!(state.expires_at, Some(1_000 + HOUR));
    assert_eq!(state.time_until_expiry, Some(3_600));
    assert_eq!(
        monitor.session().expect("session should exist").token_ref,
        TokenRef::from("tok")
    );
}

#[tokio::test(start_paused = true)]
async fn test_spawn_without_session_starts_no_session() {
    let clock = EpochClock::anchored_at(1_000);
    let provider = FakeProvider::new();

    let monitor = SessionMonitor::spawn_with_clock(provider, config(300), clock).await;

    assert_eq!(monitor.stage(), Stage::NoSession);
    assert!(monitor.session().is_none());
    let state = monitor.expiry_state();
    assert!(!state.is_expired);
    assert_eq!(state.expires_at, None);
    assert_eq!(state.time_until_expiry, None);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_initial_fetch_error_falls_back_to_no_session() {
    // Fail-open: a broken initial load reads as "logged out", not as an
    // error state.
    let clock = EpochClock::anchored_at(1_000);
    let provider = FakeProvider::new();
    provider.fail_initial("network unreachable");

    let monitor = SessionMonitor::spawn_with_clock(provider, config(300), clock).await;

    assert_eq!(monitor.stage(), Stage::NoSession);
    assert!(monitor.session().is_none());
}

// =========================================================================
// Countdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_is_monotonic_and_reaches_zero() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", 10));
    // Threshold 0: proactive renewal disabled, the session just runs out.
    let monitor = SessionMonitor::spawn_with_clock(provider, config(0), clock).await;

    let mut last = monitor
        .expiry_state()
        .time_until_expiry
        .expect("session should exist");
    assert_eq!(last, 10);

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let remaining = monitor
            .expiry_state()
            .time_until_expiry
            .expect("session should exist");
        assert!(remaining <= last, "countdown must be non-increasing");
        last = remaining;
    }

    assert_eq!(last, 0);
    assert!(monitor.expiry_state().is_expired);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_without_refresh_reaches_expired_stage() {
    // expires_at = now + 2 with no refresh available: within one tick of
    // t = 2 the stage reads Expired.
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", 2));
    let monitor = SessionMonitor::spawn_with_clock(provider, config(0), clock).await;
    let mut changes = monitor.subscribe();

    let snapshot = wait_for_stage(&mut changes, Stage::Expired).await;

    assert!(clock.now() <= 3, "expiry must be detected within one tick");
    // The stale session is retained; only sign-out destroys it.
    assert!(snapshot.session.is_some());
    let state = monitor.expiry_state();
    assert!(state.is_expired);
    assert_eq!(state.time_until_expiry, Some(0));
}

// =========================================================================
// Proactive renewal
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_threshold_crossing_fires_exactly_one_refresh() {
    // expires_at = now + 10 with threshold 5: Active through t = 5, first
    // renewal tick at t = 6, refresh resolves into a fresh hour-long
    // session.
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", 10));
    let release = provider.hold_refresh();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(5), clock).await;
    let mut changes = monitor.subscribe();

    // Ticks t = 1..5 leave the session Active (remaining 9..5).
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    settle().await;
    assert_eq!(monitor.stage(), Stage::Active);
    assert_eq!(provider.refresh_calls(), 0);

    // t = 6: remaining 4 crosses the threshold.
    wait_for_stage(&mut changes, Stage::Refreshing).await;
    settle().await;
    assert_eq!(provider.refresh_calls(), 1);

    // Ticks while the refresh is in flight must not issue a second call.
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(provider.refresh_calls(), 1);

    let renewed = session("tok-2", clock.now() + HOUR);
    release.send(Ok(renewed.clone())).expect("actor listening");

    let snapshot = wait_for_stage(&mut changes, Stage::Active).await;
    assert_eq!(snapshot.session, Some(renewed));
    let remaining = monitor
        .expiry_state()
        .time_until_expiry
        .expect("session should exist");
    assert!(remaining > 3_590 && remaining <= 3_600);
}

#[tokio::test(start_paused = true)]
async fn test_tick_driven_refresh_failure_keeps_stale_session() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", 10));
    // Nothing scripted: every refresh attempt fails.
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(5), clock).await;
    let mut changes = monitor.subscribe();

    // The failed attempt leaves the renewal window visible and the
    // original session untouched.
    let snapshot = wait_for_stage(&mut changes, Stage::RenewalDue).await;
    assert_eq!(snapshot.session.as_ref().map(|s| s.expires_at), Some(10));
    assert!(provider.refresh_calls() >= 1);

    // Natural expiry at t = 10, stale session still present.
    let snapshot = wait_for_stage(&mut changes, Stage::Expired).await;
    assert_eq!(snapshot.session.as_ref().map(|s| s.expires_at), Some(10));

    // No automatic attempts once expired.
    settle().await;
    let calls_at_expiry = provider.refresh_calls();
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(provider.refresh_calls(), calls_at_expiry);
}

// =========================================================================
// Explicit refresh
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_concurrent_callers_share_one_provider_call() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let release = provider.hold_refresh();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    let first = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.refresh().await }
    });
    let second = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.refresh().await }
    });
    settle().await;
    assert_eq!(provider.refresh_calls(), 1, "second caller must attach");

    let renewed = session("tok-2", 2 * HOUR);
    release.send(Ok(renewed.clone())).expect("actor listening");

    let r1 = first.await.expect("task").expect("refresh should succeed");
    let r2 = second.await.expect("task").expect("refresh should succeed");
    assert_eq!(r1, renewed);
    assert_eq!(r2, renewed);
    assert_eq!(provider.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_without_session_returns_no_session() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::new();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    assert_eq!(monitor.refresh().await, Err(RefreshError::NoSession));
    assert_eq!(provider.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_propagates_and_keeps_session() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    provider.script_refresh(Err(RefreshError::Provider("boom".into())));
    let monitor = SessionMonitor::spawn_with_clock(provider, config(300), clock).await;

    let before = monitor.session().expect("session should exist");
    let result = monitor.refresh().await;

    assert_eq!(result, Err(RefreshError::Provider("boom".into())));
    assert_eq!(monitor.session(), Some(before), "fail-soft: session intact");
    assert_eq!(monitor.stage(), Stage::Active);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_still_notifies_subscribers() {
    // A failed refresh changes no visible field, but derived expiry may
    // have moved — subscribers get a publication either way.
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    provider.script_refresh(Err(RefreshError::Provider("boom".into())));
    let monitor = SessionMonitor::spawn_with_clock(provider, config(300), clock).await;

    let changes = monitor.subscribe();
    let revision_before = changes.borrow().revision;

    let _ = monitor.refresh().await;

    assert!(changes.borrow().revision > revision_before);
}

// =========================================================================
// Sign-out
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_out_clears_locally_even_when_remote_fails() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    provider.fail_sign_out("backend down");
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    let result = monitor.sign_out().await;

    // The remote failure is reported, but logout already happened locally.
    assert_eq!(result, Err(SignOutError::Provider("backend down".into())));
    assert_eq!(monitor.stage(), Stage::NoSession);
    assert!(monitor.session().is_none());
    assert_eq!(provider.sign_out_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_with_no_session_is_a_noop() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::new();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    assert!(monitor.sign_out().await.is_ok());
    assert_eq!(provider.sign_out_calls(), 0, "no provider call without a session");
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_discards_in_flight_refresh() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let release = provider.hold_refresh();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;

    let caller = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.refresh().await }
    });
    settle().await;
    assert_eq!(provider.refresh_calls(), 1);

    monitor.sign_out().await.expect("sign-out should succeed");
    assert_eq!(
        caller.await.expect("task"),
        Err(RefreshError::SignedOut),
        "waiting callers fail when sign-out wins"
    );
    assert_eq!(monitor.stage(), Stage::NoSession);

    // The late provider response must not resurrect the session.
    release
        .send(Ok(session("tok-2", 2 * HOUR)))
        .expect("refresh task still waiting");
    settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(monitor.session().is_none());
    assert_eq!(monitor.stage(), Stage::NoSession);
}

// =========================================================================
// Provider events
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_external_sign_out_event_clears_session() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;
    let mut changes = monitor.subscribe();

    provider.emit(AuthEvent::SignedOut, None);

    let snapshot = wait_for_stage(&mut changes, Stage::NoSession).await;
    assert!(snapshot.session.is_none());
    // Provider initiated it; the monitor must not call sign_out back.
    assert_eq!(provider.sign_out_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_external_token_refreshed_event_replaces_session() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;
    let mut changes = monitor.subscribe();

    let replacement = session("tok-2", 2 * HOUR);
    provider.emit(AuthEvent::TokenRefreshed, Some(replacement.clone()));

    let snapshot = wait_until(&mut changes, |s| {
        s.session.as_ref().map(|s| s.expires_at) == Some(2 * HOUR)
    })
    .await;
    assert_eq!(snapshot.session, Some(replacement));
    assert_eq!(snapshot.stage, Stage::Active);
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_event_starts_the_clock() {
    // NoSession → Active on a login event, then natural expiry proves the
    // ticker was armed by the event.
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::new();
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(0), clock).await;
    let mut changes = monitor.subscribe();
    assert_eq!(monitor.stage(), Stage::NoSession);

    provider.emit(AuthEvent::SignedIn, Some(session("tok", 2)));

    wait_for_stage(&mut changes, Stage::Active).await;
    wait_for_stage(&mut changes, Stage::Expired).await;
    assert!(clock.now() <= 3, "expiry must be detected within one tick");
}

#[tokio::test(start_paused = true)]
async fn test_authenticated_event_without_session_clears_state() {
    // The provider contract says authenticated events carry a session;
    // a missing one is treated conservatively as a sign-out.
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let monitor = SessionMonitor::spawn_with_clock(provider.clone(), config(300), clock).await;
    let mut changes = monitor.subscribe();

    provider.emit(AuthEvent::SignedIn, None);

    let snapshot = wait_for_stage(&mut changes, Stage::NoSession).await;
    assert!(snapshot.session.is_none());
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_calls_after_shutdown_return_unavailable() {
    let clock = EpochClock::anchored_at(0);
    let provider = FakeProvider::with_session(session("tok", HOUR));
    let monitor = SessionMonitor::spawn_with_clock(provider, config(300), clock).await;

    monitor.shutdown().await;
    settle().await;

    assert_eq!(monitor.refresh().await, Err(RefreshError::Unavailable));
    assert_eq!(monitor.sign_out().await, Err(SignOutError::Unavailable));
}
