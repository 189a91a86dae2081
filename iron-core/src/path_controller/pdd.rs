//! Packet Delivery Delay (PDD) reporter: a running mean/variance of
//! observed low-latency PDD, reporting on a threshold-or-timeout cadence
//! (spec.md §4.7).

use std::time::{Duration, Instant};

/// Emits a report when `|new_mean - last_reported| > threshold *
/// last_reported`, or when `max_period` has elapsed since the last
/// report, whichever comes first — but never more often than
/// `min_period`.
pub struct PddReporter {
    threshold_fraction: f64,
    min_period: Duration,
    max_period: Duration,
    mean_usec: f64,
    m2: f64,
    count: u64,
    last_reported_mean: Option<f64>,
    last_report_at: Option<Instant>,
}

impl PddReporter {
    pub fn new(threshold_fraction: f64, min_period: Duration, max_period: Duration) -> Self {
        PddReporter {
            threshold_fraction,
            min_period,
            max_period,
            mean_usec: 0.0,
            m2: 0.0,
            count: 0,
            last_reported_mean: None,
            last_report_at: None,
        }
    }

    /// Fold in one observed PDD sample via Welford's algorithm.
    pub fn observe(&mut self, pdd_usec: f64) {
        self.count += 1;
        let delta = pdd_usec - self.mean_usec;
        self.mean_usec += delta / self.count as f64;
        let delta2 = pdd_usec - self.mean_usec;
        self.m2 += delta * delta2;
    }

    pub fn mean_usec(&self) -> f64 {
        self.mean_usec
    }

    pub fn variance_usec(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Check whether a report is due at `now`, and if so, mark one as sent
    /// and return the current mean.
    pub fn maybe_report(&mut self, now: Instant) -> Option<f64> {
        if let Some(last) = self.last_report_at {
            if now.duration_since(last) < self.min_period {
                return None;
            }
        }
        let timed_out = self
            .last_report_at
            .map(|last| now.duration_since(last) >= self.max_period)
            .unwrap_or(true);
        let threshold_crossed = match self.last_reported_mean {
            None => true,
            Some(last_mean) => {
                (self.mean_usec - last_mean).abs() > self.threshold_fraction * last_mean.abs()
            }
        };
        if timed_out || threshold_crossed {
            self.last_report_at = Some(now);
            self.last_reported_mean = Some(self.mean_usec);
            Some(self.mean_usec)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_always_reports() {
        let mut pdd = PddReporter::new(0.1, Duration::from_millis(0), Duration::from_secs(1));
        pdd.observe(100.0);
        let t0 = Instant::now();
        assert_eq!(pdd.maybe_report(t0), Some(100.0));
    }

    #[test]
    fn min_period_blocks_rapid_reports() {
        let mut pdd = PddReporter::new(0.0, Duration::from_secs(1), Duration::from_secs(60));
        pdd.observe(100.0);
        let t0 = Instant::now();
        assert!(pdd.maybe_report(t0).is_some());
        pdd.observe(500.0);
        assert!(pdd.maybe_report(t0 + Duration::from_millis(10)).is_none());
    }

    #[test]
    fn max_period_forces_report_even_without_change() {
        let mut pdd = PddReporter::new(1.0, Duration::from_millis(0), Duration::from_millis(50));
        pdd.observe(100.0);
        let t0 = Instant::now();
        pdd.maybe_report(t0);
        assert!(pdd.maybe_report(t0 + Duration::from_millis(60)).is_some());
    }
}
