//! Monitor configuration.

use tracing::warn;

/// Configuration for a [`SessionMonitor`](crate::SessionMonitor).
///
/// Sensible defaults are provided; application wiring usually only touches
/// `renewal_threshold_secs`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How many seconds before expiry a proactive refresh is requested.
    ///
    /// Default: 300. Set to 0 to disable proactive renewal entirely — the
    /// monitor then only tracks expiry and leaves refreshing to explicit
    /// [`refresh()`](crate::SessionMonitor::refresh) calls.
    pub renewal_threshold_secs: u64,

    /// How often, in seconds, expiry is re-evaluated while a session
    /// exists. Default: 1.
    pub tick_interval_secs: u64,

    /// Random jitter (0–max µs) added to the first tick after a session
    /// appears, so many monitors started at the same instant don't tick in
    /// lockstep. Default: 2000 (0–2 ms).
    pub initial_jitter_us: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            renewal_threshold_secs: 300,
            tick_interval_secs: 1,
            initial_jitter_us: 2_000,
        }
    }
}

impl MonitorConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically when the monitor starts. A zero tick interval
    /// would spin the actor loop, so it is raised to one second.
    pub fn validated(mut self) -> Self {
        if self.tick_interval_secs == 0 {
            warn!("tick_interval_secs of 0 is not supported — clamping to 1");
            self.tick_interval_secs = 1;
        }
        self
    }
}
