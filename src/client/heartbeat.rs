//! Heartbeat Keep-Alive
//!
//! Periodically pings the gateway so an idle session does not expire. The
//! heartbeat runs as a tokio task that exists only while the interval is
//! positive and the host application is in the foreground. Any change
//! (interval, foreground state, endpoint) cancels the running task and arms
//! a new one.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Longest period between beats; longer intervals are clamped to this
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Something that can send one heartbeat
#[async_trait]
pub trait Pulse: Send + Sync + 'static {
    async fn beat(&self) -> Result<()>;
}

struct HeartbeatState {
    interval_secs: i64,
    foreground: bool,
    armed: Option<CancellationToken>,
}

/// Heartbeat controller
pub struct Heartbeat {
    state: Mutex<HeartbeatState>,
    last_beat: Arc<Mutex<Option<DateTime<Utc>>>>,
    beats: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Create a stopped heartbeat; the application starts in the foreground
    pub fn new(interval_secs: i64) -> Self {
        Self {
            state: Mutex::new(HeartbeatState {
                interval_secs,
                foreground: true,
                armed: None,
            }),
            last_beat: Arc::new(Mutex::new(None)),
            beats: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configured interval in seconds
    pub fn interval_secs(&self) -> i64 {
        self.state.lock().interval_secs
    }

    /// Whether the host application is in the foreground
    pub fn is_foreground(&self) -> bool {
        self.state.lock().foreground
    }

    /// Whether a heartbeat task is currently running
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    /// Time of the last successful beat
    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        *self.last_beat.lock()
    }

    /// Number of successful beats since creation
    pub fn beat_count(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// Change the interval; zero or negative disables the heartbeat
    pub fn set_interval<P: Pulse>(&self, interval_secs: i64, pulse: Weak<P>) {
        let mut state = self.state.lock();
        state.interval_secs = interval_secs;
        tracing::info!(interval_secs, "heartbeat interval set");
        self.arm(&mut state, pulse);
    }

    /// Record a foreground/background transition
    pub fn set_foreground<P: Pulse>(&self, foreground: bool, pulse: Weak<P>) {
        let mut state = self.state.lock();
        state.foreground = foreground;
        self.arm(&mut state, pulse);
    }

    /// Restart the heartbeat with the current settings
    pub fn rearm<P: Pulse>(&self, pulse: Weak<P>) {
        let mut state = self.state.lock();
        self.arm(&mut state, pulse);
    }

    /// Stop the running task, if any
    pub fn stop(&self) {
        if let Some(token) = self.state.lock().armed.take() {
            token.cancel();
        }
    }

    fn arm<P: Pulse>(&self, state: &mut HeartbeatState, pulse: Weak<P>) {
        if let Some(token) = state.armed.take() {
            token.cancel();
        }

        if state.interval_secs <= 0 || !state.foreground {
            tracing::debug!(
                interval_secs = state.interval_secs,
                foreground = state.foreground,
                "heartbeat disarmed"
            );
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available, heartbeat will start on the next transition");
            return;
        };

        let period = beat_period(state.interval_secs);
        let token = CancellationToken::new();
        handle.spawn(run(
            period,
            token.clone(),
            pulse,
            self.last_beat.clone(),
            self.beats.clone(),
        ));
        state.armed = Some(token);
        tracing::debug!(interval_secs = state.interval_secs, "heartbeat armed");
    }
}

/// Period for a positive interval, clamped so deadlines stay representable
fn beat_period(interval_secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(interval_secs).unwrap_or(0)).min(MAX_PERIOD)
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Beat loop. Each beat is awaited before the next tick, so at most one is
/// outstanding; ticks missed meanwhile are skipped.
async fn run<P: Pulse>(
    period: Duration,
    token: CancellationToken,
    pulse: Weak<P>,
    last_beat: Arc<Mutex<Option<DateTime<Utc>>>>,
    beats: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(pulse) = pulse.upgrade() else {
            break;
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = pulse.beat() => match result {
                Ok(()) => {
                    *last_beat.lock() = Some(Utc::now());
                    beats.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
            }
        }
    }

    tracing::debug!("heartbeat task stopped");
}
