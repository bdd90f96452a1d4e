//! Shared simulation clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic simulation time, advanced by the tick loop and readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    micros: Arc<AtomicU64>,
}

impl SimClock {
    /// Creates a clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation time.
    #[must_use]
    pub fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Acquire))
    }

    /// Advances the clock by `dt` seconds and returns the new time.
    pub fn advance(&self, dt: f32) -> Duration {
        let step = (f64::from(dt.max(0.0)) * 1_000_000.0) as u64;
        let micros = self.micros.fetch_add(step, Ordering::AcqRel) + step;
        Duration::from_micros(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_shared_between_clones() {
        let clock = SimClock::new();
        let other = clock.clone();
        clock.advance(1.5);
        assert_eq!(other.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_negative_dt_ignored() {
        let clock = SimClock::new();
        clock.advance(-3.0);
        assert_eq!(clock.now(), Duration::ZERO);
    }
}
