//! # Tick Loop
//!
//! Fixed-timestep scheduling for the relay's polling side.
//!
//! ```text
//! loop {
//!     while should_tick() {        // accumulator >= tick_duration
//!         let t = begin_tick();
//!         relay.process();         // drain + forward
//!         end_tick(t);             // stats
//!     }
//!     wait_for_next_tick();        // sleep, then spin the last bit
//! }
//! ```
//!
//! [`TickLoop::run`] wraps that shape around a callback until a shared flag
//! clears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default tick rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Sleep only when more than this much time remains; spin the rest.
const SPIN_THRESHOLD: Duration = Duration::from_micros(1000);

/// Wake this early before spinning.
const SPIN_MARGIN: Duration = Duration::from_micros(500);

/// Fixed-timestep tick loop controller.
///
/// Ensures consistent tick rate regardless of processing time.
#[derive(Debug)]
pub struct TickLoop {
    /// Target tick duration.
    tick_duration: Duration,
    /// Time of last accumulator update.
    last_tick: Instant,
    /// Accumulated time not yet consumed by ticks.
    accumulator: Duration,
    /// Total ticks executed.
    tick_count: u64,
    /// Tick time statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick observed, in microseconds.
    pub min_tick_us: u64,
    /// Longest tick observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average tick duration, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks that took longer than the budget.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(tick_duration: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(tick_duration),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

impl TickLoop {
    /// Creates a tick loop running at `tick_rate` Hz.
    ///
    /// A rate of 0 is treated as 1.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));

        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true if a tick is due.
    ///
    /// Call this in a loop until it returns false; several ticks may be due
    /// after a stall.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;

        self.accumulator >= self.tick_duration
    }

    /// Marks the start of a tick.
    ///
    /// Returns the tick start time for [`TickLoop::end_tick`].
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let us = duration_us(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Blocks until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_tick.elapsed() + self.accumulator;
        if elapsed >= self.tick_duration {
            return;
        }

        let remaining = self.tick_duration - elapsed;
        if remaining > SPIN_THRESHOLD {
            std::thread::sleep(remaining - SPIN_MARGIN);
        }
        let deadline = Instant::now() + remaining.min(SPIN_MARGIN);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    /// Calls `on_tick` once per time step until `running` is cleared.
    ///
    /// The callback receives the tick number, starting at 1. `running` is
    /// checked before every tick, so clearing it from the callback stops the
    /// loop after the current tick.
    ///
    /// # Returns
    ///
    /// Number of ticks executed.
    pub fn run<F>(&mut self, running: &AtomicBool, mut on_tick: F) -> u64
    where
        F: FnMut(u64),
    {
        let first = self.tick_count;
        self.last_tick = Instant::now();
        self.accumulator = Duration::ZERO;

        while running.load(Ordering::Acquire) {
            while running.load(Ordering::Acquire) && self.should_tick() {
                let start = self.begin_tick();
                on_tick(self.tick_count);
                self.end_tick(start);
            }
            if running.load(Ordering::Acquire) {
                self.wait_for_next_tick();
            }
        }

        self.tick_count - first
    }

    /// Returns the number of ticks executed so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Returns the target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_loop_creation() {
        let tick_loop = TickLoop::default();
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.tick_duration(), Duration::from_micros(16666));
        assert_eq!(TickLoop::new(0).tick_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_tick_execution() {
        let mut tick_loop = TickLoop::new(1000);

        std::thread::sleep(Duration::from_millis(5));
        assert!(tick_loop.should_tick());

        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);

        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
    }

    #[test]
    fn test_stats_tracking_and_reset() {
        let mut tick_loop = TickLoop::new(1000);

        for _ in 0..10 {
            std::thread::sleep(Duration::from_micros(100));
            while tick_loop.should_tick() {
                let start = tick_loop.begin_tick();
                std::thread::sleep(Duration::from_micros(50));
                tick_loop.end_tick(start);
            }
        }

        let stats = *tick_loop.stats();
        assert!(stats.total_ticks > 0);
        assert!(stats.min_tick_us > 0);
        assert!(stats.min_tick_us <= stats.max_tick_us);

        tick_loop.reset_stats();
        assert_eq!(tick_loop.stats().total_ticks, 0);
        assert_eq!(tick_loop.stats().avg_tick_us, 1000);
    }

    #[test]
    fn test_run_stops_when_flag_clears() {
        let running = AtomicBool::new(true);
        let mut tick_loop = TickLoop::new(1000);
        let mut seen = Vec::new();

        let ticks = tick_loop.run(&running, |tick| {
            seen.push(tick);
            if tick == 5 {
                running.store(false, Ordering::Release);
            }
        });

        assert_eq!(ticks, 5);
        assert_eq!(seen, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_run_with_cleared_flag_does_nothing() {
        let running = AtomicBool::new(false);
        let mut tick_loop = TickLoop::new(60);
        assert_eq!(tick_loop.run(&running, |_| unreachable!()), 0);
    }
}
