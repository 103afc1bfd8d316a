//! # Fixed-Rate Tick Loop
//!
//! Paces the real-time thread. Each tick has a deadline on a fixed grid;
//! the loop sleeps until shortly before it and spin-waits the rest.
//! When the thread falls more than one period behind, missed ticks are
//! dropped instead of being replayed in a burst.

use std::time::{Duration, Instant};

/// Deadline-based tick pacing with timing statistics.
#[derive(Debug)]
pub struct TickLoop {
    /// Target tick duration.
    period: Duration,
    /// Final part of each wait spent spinning.
    spin_threshold: Duration,
    /// When the current tick is due to end.
    deadline: Instant,
    /// Total ticks begun.
    tick_count: u64,
    /// Tick duration statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Number of late ticks (took longer than the period).
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(period: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(period),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a tick loop running at `rate_hz` (clamped to at least 1).
    #[must_use]
    pub fn new(rate_hz: u32, spin_threshold: Duration) -> Self {
        let period = Duration::from_nanos(1_000_000_000 / u64::from(rate_hz.max(1)));
        Self {
            period,
            spin_threshold,
            deadline: Instant::now() + period,
            tick_count: 0,
            stats: TickStats::new(period),
        }
    }

    /// Marks the start of a tick and returns its start time.
    pub fn begin_tick(&mut self) -> Instant {
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration_us(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.period {
            self.stats.late_ticks += 1;
        }
    }

    /// Waits until the current tick's deadline, then moves it one period.
    pub fn wait_for_next_tick(&mut self) {
        let now = Instant::now();
        if now < self.deadline {
            let remaining = self.deadline - now;
            if remaining > self.spin_threshold {
                std::thread::sleep(remaining - self.spin_threshold);
            }
            while Instant::now() < self.deadline {
                std::hint::spin_loop();
            }
        }

        self.deadline += self.period;
        let now = Instant::now();
        if now > self.deadline + self.period {
            self.deadline = now + self.period;
        }
    }

    /// Returns the number of ticks begun.
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
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::new(self.period);
    }
}
