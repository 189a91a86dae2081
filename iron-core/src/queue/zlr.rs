//! Zombie Latency Reduction (ZLR): converts a fraction of the trailing
//! queue-depth floor into virtual zombie bytes, so downstream gradient
//! computation sees a queue that never looks fully drained, without
//! holding real packets longer than necessary (spec.md §4.4).

use std::time::{Duration, Instant};

/// Tunables for a [`ZlrController`].
#[derive(Debug, Clone, Copy)]
pub struct ZlrConfig {
    /// Fraction of the trailing-window floor depth converted to zombie
    /// bytes.
    pub floor_fraction: f64,
    /// Window over which the running floor (minimum real depth seen) is
    /// tracked.
    pub trailing_window: Duration,
    /// An increase in the zombie-byte target may happen at most this
    /// often.
    pub min_increase_interval: Duration,
    /// A decrease may happen at most this often.
    pub min_decrease_interval: Duration,
    /// A decrease is only allowed after this much time has passed with no
    /// increase, so the controller doesn't chase noise down.
    pub quiet_period_before_decrease: Duration,
}

impl Default for ZlrConfig {
    fn default() -> Self {
        ZlrConfig {
            floor_fraction: 0.1,
            trailing_window: Duration::from_secs(2),
            min_increase_interval: Duration::from_millis(50),
            min_decrease_interval: Duration::from_millis(300),
            quiet_period_before_decrease: Duration::from_secs(2),
        }
    }
}

/// Running minimum of real queue depth over a trailing window, used as the
/// "floor" ZLR derives its zombie-byte target from.
struct TrailingFloor {
    window: Duration,
    samples: Vec<(Instant, u32)>,
}

impl TrailingFloor {
    fn new(window: Duration) -> Self {
        TrailingFloor {
            window,
            samples: Vec::new(),
        }
    }

    fn push(&mut self, now: Instant, depth: u32) {
        self.samples.push((now, depth));
        let window = self.window;
        self.samples.retain(|&(t, _)| now.duration_since(t) <= window);
    }

    fn floor(&self) -> u32 {
        self.samples.iter().map(|&(_, d)| d).min().unwrap_or(0)
    }
}

/// Tracks real queue depth and derives a rate-limited target for virtual
/// zombie bytes: a fraction of the trailing floor, nudged up quickly when
/// the floor rises but only eased down slowly and after a quiet period, to
/// avoid oscillating real packet admission.
pub struct ZlrController {
    config: ZlrConfig,
    floor: TrailingFloor,
    target_zombie_bytes: u32,
    last_increase_at: Option<Instant>,
    last_decrease_at: Option<Instant>,
}

impl ZlrController {
    pub fn new(config: ZlrConfig) -> Self {
        ZlrController {
            floor: TrailingFloor::new(config.trailing_window),
            target_zombie_bytes: 0,
            last_increase_at: None,
            last_decrease_at: None,
            config,
        }
    }

    pub fn target_zombie_bytes(&self) -> u32 {
        self.target_zombie_bytes
    }

    /// Record an observed real (non-zombie) queue depth and recompute the
    /// zombie-byte target, respecting the rate limits. Returns the (new)
    /// target.
    pub fn update(&mut self, now: Instant, real_depth: u32) -> u32 {
        self.floor.push(now, real_depth);
        let desired = (self.floor.floor() as f64 * self.config.floor_fraction) as u32;

        if desired > self.target_zombie_bytes {
            let allowed = self
                .last_increase_at
                .map(|t| now.duration_since(t) >= self.config.min_increase_interval)
                .unwrap_or(true);
            if allowed {
                self.target_zombie_bytes = desired;
                self.last_increase_at = Some(now);
            }
        } else if desired < self.target_zombie_bytes {
            let quiet_enough = self
                .last_increase_at
                .map(|t| now.duration_since(t) >= self.config.quiet_period_before_decrease)
                .unwrap_or(true);
            let rate_ok = self
                .last_decrease_at
                .map(|t| now.duration_since(t) >= self.config.min_decrease_interval)
                .unwrap_or(true);
            if quiet_enough && rate_ok {
                self.target_zombie_bytes = desired;
                self.last_decrease_at = Some(now);
            }
        }
        self.target_zombie_bytes
    }
}
