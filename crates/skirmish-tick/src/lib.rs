//! Periodic tick scheduler for Skirmish.
//!
//! Two loops in the server run on a fixed period: the coordinator's timer
//! (liveness sweep, lobby scan, battle expiry; 1 s by default) and each
//! datagram relay peer's send loop (16 ms). Both sit in a `tokio::select!`
//! next to their cancellation signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = cancel.cancelled() => break,
//!         info = scheduler.wait_for_tick() => {
//!             do_periodic_work(info.tick);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! A scheduler without a period never fires, which lets tests drive the
//! coordinator by hand.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`TickScheduler`].
///
/// A late tick never fires back to back with the next one: the schedule
/// restarts one period after it and the missed ticks count as skipped.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick period. `None` disables ticking.
    pub period: Option<Duration>,
    /// Upper bound of the random delay added to the first tick, so peers
    /// created together do not all send in the same instant.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: None,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// A config ticking every `period`.
    pub fn every(period: Duration) -> Self {
        Self {
            period: (!period.is_zero()).then_some(period),
            ..Default::default()
        }
    }

    pub fn with_initial_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// `true` if the tick fired more than a tenth of a period late.
    pub overrun: bool,
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fires at a fixed period on the Tokio clock.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: Option<Instant>,
    tick_start: Option<Instant>,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let next_tick = config.period.map(|period| {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_micros() as u64;
                Duration::from_micros(rand::rng().random_range(0..max.max(1)))
            };
            Instant::now() + period + jitter
        });

        match config.period {
            Some(period) => debug!(?period, "tick scheduler created"),
            None => debug!("tick scheduler created without a period"),
        }

        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
        }
    }

    /// Shorthand for `TickScheduler::new(TickConfig::every(period))`.
    pub fn every(period: Duration) -> Self {
        Self::new(TickConfig::every(period))
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever without a period; `select!` still polls other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (Some(next), Some(period)) = (self.next_tick, self.config.period) else {
            return std::future::pending().await;
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0;

        if overrun {
            ticks_skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_millis() as u64,
                    "tick overrun, skipping ahead"
                );
            }
        }
        self.next_tick = Some(now + period);

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the work done for the current tick. Work longer
    /// than one period is logged.
    pub fn record_tick_end(&mut self) {
        let (Some(start), Some(period)) = (self.tick_start.take(), self.config.period) else {
            return;
        };
        let elapsed = start.elapsed();
        if elapsed >= period {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                period_ms = period.as_millis() as u64,
                "tick work exceeded its period"
            );
        }
    }
}
