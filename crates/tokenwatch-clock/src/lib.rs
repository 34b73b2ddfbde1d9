//! Fixed-cadence tick source and testable wall clock for Tokenwatch.
//!
//! Provides the two time primitives the session monitor runs on:
//!
//! - [`Ticker`] — a repeating timer that fires once per configured interval
//!   while **armed**, and pends forever while **disarmed**. Disarmed is the
//!   correct resting state when no session exists: the monitor's `select!`
//!   loop keeps processing commands and auth events without a single idle
//!   wakeup.
//! - [`EpochClock`] — a wall-clock source in epoch seconds, anchored to
//!   `tokio::time::Instant` at construction so that expiry arithmetic
//!   follows the mocked clock under `#[tokio::test(start_paused = true)]`.
//!
//! # Integration
//!
//! The ticker is designed to sit inside an actor's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         tick = ticker.wait() => {
//!             // re-derive expiry state for this tick
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`Ticker`].
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Time between ticks while armed.
    pub interval: Duration,

    /// Random jitter (0–max µs) added to the *first* tick after arming, so
    /// many tickers armed at the same instant don't fire in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            initial_jitter_us: 2_000, // 0–2 ms default jitter
        }
    }
}

impl TickerConfig {
    /// Create a config for a specific interval with default jitter.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Ticker::new`]. A zero interval would spin
    /// the actor loop, so it is raised to one second.
    pub fn validated(mut self) -> Self {
        if self.interval.is_zero() {
            warn!("ticker interval of zero is not supported — clamping to 1s");
            self.interval = Duration::from_secs(1);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick (returned to the caller on each firing)
// ---------------------------------------------------------------------------

/// Information about a single tick, returned by [`Ticker::wait`].
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Monotonically increasing tick number (starts at 1, survives
    /// disarm/re-arm cycles).
    pub seq: u64,

    /// How far past the scheduled deadline the ticker actually woke.
    /// Large values indicate a scheduling gap — process suspend, device
    /// sleep, or a stalled runtime — and callers should re-derive any
    /// time-based state immediately rather than trusting the cadence.
    pub late_by: Duration,

    /// How many whole intervals were missed when the wakeup was late
    /// (0 in normal operation). The missed ticks are skipped, not replayed.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// A repeating timer that only runs while armed.
///
/// Starts disarmed. [`arm`](Self::arm) schedules the first tick one
/// interval (plus jitter) from now; [`disarm`](Self::disarm) clears the
/// deadline so [`wait`](Self::wait) pends forever. Both are idempotent.
///
/// Missed deadlines are skipped: if the ticker wakes late it reschedules
/// from *now*, reporting the lateness on the returned [`Tick`] instead of
/// firing a burst of catch-up ticks.
pub struct Ticker {
    config: TickerConfig,
    /// Deadline of the next tick. `None` means disarmed.
    next: Option<TokioInstant>,
    seq: u64,
}

impl Ticker {
    /// Create a new, disarmed ticker.
    pub fn new(config: TickerConfig) -> Self {
        let config = config.validated();
        debug!(interval = ?config.interval, "ticker created (disarmed)");
        Self {
            config,
            next: None,
            seq: 0,
        }
    }

    /// Create a disarmed ticker for a specific interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(TickerConfig::with_interval(interval))
    }

    /// Arm the ticker: the first tick fires one interval from now, plus
    /// jitter. No-op if already armed (the existing schedule is kept).
    pub fn arm(&mut self) {
        if self.next.is_some() {
            return;
        }
        let jitter = if self.config.initial_jitter_us > 0 {
            let us = rand::rng().random_range(0..self.config.initial_jitter_us);
            Duration::from_micros(us)
        } else {
            Duration::ZERO
        };
        self.next = Some(TokioInstant::now() + self.config.interval + jitter);
        debug!(interval = ?self.config.interval, "ticker armed");
    }

    /// Disarm the ticker: [`wait`](Self::wait) pends forever until the next
    /// [`arm`](Self::arm). No-op if already disarmed.
    pub fn disarm(&mut self) {
        if self.next.take().is_some() {
            debug!(seq = self.seq, "ticker disarmed");
        }
    }

    /// Whether the ticker currently has a scheduled deadline.
    pub fn is_armed(&self) -> bool {
        self.next.is_some()
    }

    /// Total ticks fired over the ticker's lifetime.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The configured interval between ticks.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Wait until the next tick is due. Returns the fired [`Tick`].
    ///
    /// While disarmed this future never resolves on its own — a
    /// `tokio::select!` around it still processes its other branches.
    pub async fn wait(&mut self) -> Tick {
        let Some(deadline) = self.next else {
            // Disarmed: pend forever. select! handles other branches.
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        self.seq += 1;

        let interval = self.config.interval;
        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > interval / 10; // >10% late = scheduling gap
        let mut ticks_skipped = 0u64;

        self.next = Some(if overrun {
            ticks_skipped = late_by.as_nanos() as u64 / interval.as_nanos() as u64;
            if ticks_skipped > 0 {
                warn!(
                    seq = self.seq,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick fired late — skipping ahead"
                );
            }
            // Reschedule from now, not from the missed deadline.
            now + interval
        } else {
            deadline + interval
        });

        trace!(seq = self.seq, "tick fired");

        Tick {
            seq: self.seq,
            late_by,
            ticks_skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// EpochClock
// ---------------------------------------------------------------------------

/// A wall clock in epoch seconds that advances with the Tokio clock.
///
/// Session expiries are absolute epoch timestamps in the auth provider's
/// clock frame; the monitor only ever compares them to local time. Reading
/// `SystemTime::now()` on every comparison would make that arithmetic
/// untestable, so the clock samples the system time **once** at
/// construction and derives "now" from the elapsed time on a
/// `tokio::time::Instant` anchor. Under paused-time tests, `now()` follows
/// `tokio::time::advance` exactly.
///
/// Known imprecision: the anchor is monotonic, so wall-clock adjustments
/// after construction (NTP steps, suspend/resume drift) are not observed.
/// Provider/device clock skew is already an accepted error source for
/// expiry comparison.
#[derive(Debug, Clone, Copy)]
pub struct EpochClock {
    base_epoch: i64,
    anchor: TokioInstant,
}

impl EpochClock {
    /// Anchor a clock to the current system time.
    pub fn system() -> Self {
        let base_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Self::anchored_at(base_epoch)
    }

    /// Anchor a clock to an explicit epoch timestamp. `now()` starts at
    /// `epoch` and advances with the Tokio clock from here — the
    /// constructor tests build sessions against.
    pub fn anchored_at(epoch: i64) -> Self {
        Self {
            base_epoch: epoch,
            anchor: TokioInstant::now(),
        }
    }

    /// The current time in epoch seconds.
    pub fn now(&self) -> i64 {
        self.base_epoch + self.anchor.elapsed().as_secs() as i64
    }
}
