//! Tick pacing for the forwarding algorithm: run on explicit triggers
//! (path controller writable, enqueue raised a weight) or on a periodic
//! fallback (spec.md §4.6 "Tick pacing").

use std::time::{Duration, Instant};

pub const DEFAULT_FALLBACK_TICK: Duration = Duration::from_millis(1);

/// Decides when the forwarding tick should run: immediately on an explicit
/// trigger, or when the fallback interval has elapsed since the last run.
pub struct TickPacer {
    fallback_interval: Duration,
    last_run: Option<Instant>,
}

impl TickPacer {
    pub fn new(fallback_interval: Duration) -> Self {
        TickPacer {
            fallback_interval,
            last_run: None,
        }
    }

    /// Time until the fallback tick is next due, for use as a
    /// `tokio::time::sleep_until` deadline by the caller's event loop.
    pub fn next_fallback_deadline(&self, now: Instant) -> Instant {
        match self.last_run {
            Some(last) => last + self.fallback_interval,
            None => now,
        }
    }

    /// Whether the fallback interval has elapsed, independent of any
    /// explicit trigger.
    pub fn fallback_due(&self, now: Instant) -> bool {
        match self.last_run {
            Some(last) => now.duration_since(last) >= self.fallback_interval,
            None => true,
        }
    }

    /// Record that the tick ran at `now`, whether triggered explicitly or
    /// by fallback.
    pub fn record_run(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}

impl Default for TickPacer {
    fn default() -> Self {
        TickPacer::new(DEFAULT_FALLBACK_TICK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_due_on_first_check_and_after_interval() {
        let mut pacer = TickPacer::new(Duration::from_millis(1));
        let t0 = Instant::now();
        assert!(pacer.fallback_due(t0));
        pacer.record_run(t0);
        assert!(!pacer.fallback_due(t0));
        assert!(pacer.fallback_due(t0 + Duration::from_millis(2)));
    }
}
