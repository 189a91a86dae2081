//! Release controllers for decoded FEC originals: an unthrottled
//! pass-through and a token-bucket-throttled variant, plus Receiver Report
//! Messages and an optional NORM-style flow controller (spec.md §4.8).

use std::time::{Duration, Instant};

/// Hands every released original straight through with no pacing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnthrottledRelease;

impl UnthrottledRelease {
    pub fn admit(&mut self, _now: Instant, _len: usize) -> bool {
        true
    }
}

/// Paces release to a token-bucket rate limit, so a burst of
/// reconstructed originals doesn't overwhelm the downstream application
/// faster than the flow's negotiated rate.
pub struct ThrottledRelease {
    rate_bps: u64,
    burst_bytes: u64,
    tokens: f64,
    last_refill: Instant,
}

impl ThrottledRelease {
    pub fn new(rate_bps: u64, burst_bytes: u64, now: Instant) -> Self {
        ThrottledRelease {
            rate_bps,
            burst_bytes,
            tokens: burst_bytes as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let added = elapsed * (self.rate_bps as f64 / 8.0);
        self.tokens = (self.tokens + added).min(self.burst_bytes as f64);
        self.last_refill = now;
    }

    /// Attempt to admit `len` bytes for release at `now`. Returns `true`
    /// and debits tokens if there was enough budget, `false` otherwise
    /// (caller should hold the packet and retry later).
    pub fn admit(&mut self, now: Instant, len: usize) -> bool {
        self.refill(now);
        if self.tokens >= len as f64 {
            self.tokens -= len as f64;
            true
        } else {
            false
        }
    }
}

/// A Receiver Report Message: feedback from a decoder back towards the
/// encoder about loss and reconstruction outcomes for a window of blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverReportMessage {
    pub blocks_seen: u32,
    pub blocks_reconstructed: u32,
    pub blocks_partial: u32,
    pub blocks_dropped: u32,
}

impl ReceiverReportMessage {
    pub fn record_reconstructed(&mut self) {
        self.blocks_seen += 1;
        self.blocks_reconstructed += 1;
    }

    pub fn record_partial(&mut self) {
        self.blocks_seen += 1;
        self.blocks_partial += 1;
    }

    pub fn record_dropped(&mut self) {
        self.blocks_seen += 1;
        self.blocks_dropped += 1;
    }

    pub fn loss_fraction(&self) -> f64 {
        if self.blocks_seen == 0 {
            0.0
        } else {
            (self.blocks_partial + self.blocks_dropped) as f64 / self.blocks_seen as f64
        }
    }
}

/// A simplified NORM-style flow controller: advertises a receive window
/// that grows on clean delivery and backs off exponentially (capped at a
/// maximum shift) when reports show loss, falling back to the congestion
/// window update cadence NORM uses.
pub struct NormFlowController {
    window_bytes: u64,
    min_window_bytes: u64,
    max_window_bytes: u64,
    backoff_shift: u32,
    max_backoff_shift: u32,
    last_update: Instant,
    update_interval: Duration,
}

impl NormFlowController {
    pub fn new(
        initial_window_bytes: u64,
        min_window_bytes: u64,
        max_window_bytes: u64,
        update_interval: Duration,
        now: Instant,
    ) -> Self {
        NormFlowController {
            window_bytes: initial_window_bytes,
            min_window_bytes,
            max_window_bytes,
            backoff_shift: 0,
            max_backoff_shift: 5,
            last_update: now,
            update_interval,
        }
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    /// Fold in a receiver report if the update cadence allows it.
    pub fn on_report(&mut self, now: Instant, report: &ReceiverReportMessage) {
        if now.duration_since(self.last_update) < self.update_interval {
            return;
        }
        self.last_update = now;
        if report.loss_fraction() > 0.0 {
            self.backoff_shift = (self.backoff_shift + 1).min(self.max_backoff_shift);
            let shrink = self.window_bytes >> self.backoff_shift;
            self.window_bytes = self.window_bytes.saturating_sub(shrink).max(self.min_window_bytes);
        } else {
            self.backoff_shift = 0;
            self.window_bytes = (self.window_bytes * 2).min(self.max_window_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_release_respects_burst_then_refills() {
        let t0 = Instant::now();
        let mut release = ThrottledRelease::new(8_000, 100, t0);
        assert!(release.admit(t0, 100));
        assert!(!release.admit(t0, 50));
        assert!(release.admit(t0 + Duration::from_secs(1), 50));
    }

    #[test]
    fn rrm_loss_fraction_counts_non_clean_blocks() {
        let mut rrm = ReceiverReportMessage::default();
        rrm.record_reconstructed();
        rrm.record_partial();
        rrm.record_dropped();
        assert!((rrm.loss_fraction() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn norm_backs_off_on_loss_and_caps_shift() {
        let t0 = Instant::now();
        let mut norm =
            NormFlowController::new(1000, 100, 100_000, Duration::from_millis(0), t0);
        let mut lossy = ReceiverReportMessage::default();
        lossy.record_partial();
        for i in 0..8 {
            norm.on_report(t0 + Duration::from_millis(i), &lossy);
        }
        assert!(norm.window_bytes() >= 100);
    }

    #[test]
    fn norm_grows_window_on_clean_reports() {
        let t0 = Instant::now();
        let mut norm = NormFlowController::new(1000, 100, 100_000, Duration::from_millis(0), t0);
        let mut clean = ReceiverReportMessage::default();
        clean.record_reconstructed();
        norm.on_report(t0, &clean);
        assert_eq!(norm.window_bytes(), 2000);
    }
}
