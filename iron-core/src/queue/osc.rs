//! Queue-depth oscillation estimator: a circular sample buffer, periodic
//! FFT, and a dominant-period selection and reset policy used to retune
//! EWMA smoothing time constants (spec.md §4.5).
//!
//! Constants below mirror `original_source/iron/bpf/src/queue_depth_osc.h`.

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use std::time::{Duration, Instant};

pub const DEFAULT_SAMPLE_SIZE: usize = 2048;
pub const DEFAULT_SAMPLE_TIME_SECS: f64 = 0.0025;
pub const DEFAULT_FFT_COMPUTE_TIME_SECS: f64 = 1.0;
pub const DEFAULT_MAX_CONSIDERED_PERIOD_SECS: f64 = 1.0;
pub const DEFAULT_MIN_TIME_BETWEEN_RESETS_SECS: f64 = 6.0;
pub const DEFAULT_RESET_TRIGGER_FRACTION: f64 = 0.25;
pub const DEFAULT_RESET_TRIGGER_TIME_SECS: f64 = 0.375;
pub const DEFAULT_ENERGY_THRESHOLD: f64 = 10_000.0;
pub const DEFAULT_ENERGY_FRACTION: f64 = 0.5;

/// Tunables for a [`QueueDepthOsc`] instance.
#[derive(Debug, Clone, Copy)]
pub struct OscConfig {
    pub sample_size: usize,
    pub sample_time: Duration,
    pub fft_compute_time: Duration,
    pub max_considered_period: Duration,
    pub min_time_between_resets: Duration,
    pub reset_trigger_fraction: f64,
    pub reset_trigger_time: Duration,
    pub energy_threshold: f64,
    pub energy_fraction: f64,
}

impl Default for OscConfig {
    fn default() -> Self {
        OscConfig {
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_time: Duration::from_secs_f64(DEFAULT_SAMPLE_TIME_SECS),
            fft_compute_time: Duration::from_secs_f64(DEFAULT_FFT_COMPUTE_TIME_SECS),
            max_considered_period: Duration::from_secs_f64(DEFAULT_MAX_CONSIDERED_PERIOD_SECS),
            min_time_between_resets: Duration::from_secs_f64(
                DEFAULT_MIN_TIME_BETWEEN_RESETS_SECS,
            ),
            reset_trigger_fraction: DEFAULT_RESET_TRIGGER_FRACTION,
            reset_trigger_time: Duration::from_secs_f64(DEFAULT_RESET_TRIGGER_TIME_SECS),
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
            energy_fraction: DEFAULT_ENERGY_FRACTION,
        }
    }
}

/// Outcome of a period re-estimate: either a new dominant period was found,
/// or the signal looked flat enough that the caller should fall back to a
/// default smoothing time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeriodEstimate {
    Period(Duration),
    NoDominantPeriod,
}

/// Tracks queue-depth samples over time and periodically estimates the
/// dominant oscillation period via FFT, used to retune an EWMA smoothing
/// constant so it tracks real congestion cycles rather than being a fixed
/// guess.
pub struct QueueDepthOsc {
    config: OscConfig,
    samples: Vec<f32>,
    write_pos: usize,
    filled: bool,
    last_sample_at: Option<Instant>,
    last_fft_at: Option<Instant>,
    last_reset_at: Option<Instant>,
    current_period: Option<Duration>,
    planner: FftPlanner<f32>,
    /// Fraction of ticks, within the trigger window, whose depth deviated
    /// from the running mean by more than `reset_trigger_fraction` of it;
    /// used to decide whether a hard reset is warranted.
    trigger_deviations: u32,
    trigger_ticks: u32,
    trigger_window_start: Option<Instant>,
}

impl QueueDepthOsc {
    pub fn new(config: OscConfig) -> Self {
        QueueDepthOsc {
            samples: vec![0.0; config.sample_size],
            write_pos: 0,
            filled: false,
            last_sample_at: None,
            last_fft_at: None,
            last_reset_at: None,
            current_period: None,
            planner: FftPlanner::new(),
            trigger_deviations: 0,
            trigger_ticks: 0,
            trigger_window_start: None,
            config,
        }
    }

    /// Record a new queue-depth sample, respecting `sample_time` pacing:
    /// samples arriving faster than that are coalesced into the most
    /// recent slot rather than dropped.
    pub fn record_sample(&mut self, now: Instant, depth: u32) {
        let due = self
            .last_sample_at
            .map(|t| now.duration_since(t) >= self.config.sample_time)
            .unwrap_or(true);
        if due {
            self.samples[self.write_pos] = depth as f32;
            self.write_pos = (self.write_pos + 1) % self.samples.len();
            if self.write_pos == 0 {
                self.filled = true;
            }
            self.last_sample_at = Some(now);
        } else if let Some(last_idx) = self.write_pos.checked_sub(1) {
            self.samples[last_idx] = depth as f32;
        }
        self.track_trigger_window(now, depth);
    }

    fn track_trigger_window(&mut self, now: Instant, depth: u32) {
        let window_start = *self.trigger_window_start.get_or_insert(now);
        if now.duration_since(window_start) > self.config.reset_trigger_time {
            self.trigger_deviations = 0;
            self.trigger_ticks = 0;
            self.trigger_window_start = Some(now);
        }
        let mean = self.mean();
        self.trigger_ticks += 1;
        if mean > 0.0 && (depth as f64 - mean).abs() / mean > self.config.reset_trigger_fraction {
            self.trigger_deviations += 1;
        }
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|&s| s as f64).sum::<f64>() / self.samples.len() as f64
    }

    /// Should a hard reset fire: a burst of large deviations within the
    /// trigger window, no sooner than `min_time_between_resets` since the
    /// last one.
    fn should_hard_reset(&self, now: Instant) -> bool {
        if let Some(last) = self.last_reset_at {
            if now.duration_since(last) < self.config.min_time_between_resets {
                return false;
            }
        }
        self.trigger_ticks > 0
            && self.trigger_deviations as f64 / self.trigger_ticks as f64 > self.config.energy_fraction
    }

    /// Perform (or skip, if not yet due) a periodic FFT-based re-estimate
    /// of the dominant oscillation period.
    pub fn maybe_recompute(&mut self, now: Instant) -> Option<PeriodEstimate> {
        let due = self
            .last_fft_at
            .map(|t| now.duration_since(t) >= self.config.fft_compute_time)
            .unwrap_or(self.filled);
        if !due || !self.filled {
            return None;
        }
        self.last_fft_at = Some(now);

        if self.should_hard_reset(now) {
            self.last_reset_at = Some(now);
            self.current_period = None;
            self.trigger_deviations = 0;
            self.trigger_ticks = 0;
            return Some(PeriodEstimate::NoDominantPeriod);
        }

        let n = self.samples.len();
        let fft = self.planner.plan_fft_forward(n);
        let mean = self.mean() as f32;
        let mut buf: Vec<Complex32> = self
            .samples
            .iter()
            .map(|&s| Complex32::new(s - mean, 0.0))
            .collect();
        fft.process(&mut buf);

        let sample_time_secs = self.config.sample_time.as_secs_f64();
        let max_considered_secs = self.config.max_considered_period.as_secs_f64();
        let energy_threshold = self.config.energy_threshold;
        let energy_fraction = self.config.energy_fraction;
        let period_secs_for_bin = |bin: usize| (n as f64 * sample_time_secs) / bin as f64;

        // Bin `b`'s period shrinks as `b` grows, so the global maximum can
        // land anywhere in [1, n/2). Find it over the whole spectrum first.
        let Some((global_bin, global_energy)) = buf
            .iter()
            .enumerate()
            .take(n / 2)
            .skip(1)
            .map(|(bin, c)| (bin, c.norm_sqr() as f64))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            self.current_period = None;
            return Some(PeriodEstimate::NoDominantPeriod);
        };

        let global_period_secs = period_secs_for_bin(global_bin);

        if global_period_secs <= max_considered_secs {
            if global_energy < energy_threshold {
                self.current_period = None;
                return Some(PeriodEstimate::NoDominantPeriod);
            }
            let period = Duration::from_secs_f64(global_period_secs);
            self.current_period = Some(period);
            return Some(PeriodEstimate::Period(period));
        }

        // The global winner's period is too long to smooth against.
        // Restrict the search to bins whose period is within the
        // considered range (period <= max_considered, i.e. bin >=
        // min_bin) and require that restricted winner to still carry
        // meaningful energy relative to the global maximum.
        let min_bin = ((n as f64 * sample_time_secs / max_considered_secs) as usize).max(1);
        let restricted = buf
            .iter()
            .enumerate()
            .take(n / 2)
            .skip(1)
            .filter(|&(bin, _)| bin >= min_bin)
            .map(|(bin, c)| (bin, c.norm_sqr() as f64))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((restricted_bin, restricted_energy)) = restricted else {
            self.current_period = None;
            return Some(PeriodEstimate::NoDominantPeriod);
        };

        let required = energy_threshold.max(energy_fraction * global_energy);
        if restricted_energy < required {
            self.current_period = None;
            return Some(PeriodEstimate::NoDominantPeriod);
        }

        let period = Duration::from_secs_f64(period_secs_for_bin(restricted_bin));
        self.current_period = Some(period);
        Some(PeriodEstimate::Period(period))
    }

    pub fn current_period(&self) -> Option<Duration> {
        self.current_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_strong_sinusoid_period() {
        let mut cfg = OscConfig {
            sample_size: 256,
            sample_time: Duration::from_millis(1),
            fft_compute_time: Duration::from_millis(0),
            energy_threshold: 1.0,
            energy_fraction: 0.01,
            ..OscConfig::default()
        };
        cfg.max_considered_period = Duration::from_secs(1);
        let mut osc = QueueDepthOsc::new(cfg);
        let period_samples = 16.0;
        let start = Instant::now();
        for i in 0..256 {
            let t = start + Duration::from_millis(i as u64);
            let depth = 1000.0 + 500.0 * (2.0 * std::f64::consts::PI * i as f64 / period_samples).sin();
            osc.record_sample(t, depth.max(0.0) as u32);
        }
        let result = osc.maybe_recompute(start + Duration::from_millis(300));
        assert!(matches!(result, Some(PeriodEstimate::Period(_))));
    }

    #[test]
    fn flat_signal_yields_no_dominant_period() {
        let cfg = OscConfig {
            sample_size: 64,
            sample_time: Duration::from_millis(1),
            fft_compute_time: Duration::from_millis(0),
            ..OscConfig::default()
        };
        let mut osc = QueueDepthOsc::new(cfg);
        let start = Instant::now();
        for i in 0..64 {
            osc.record_sample(start + Duration::from_millis(i), 500);
        }
        let result = osc.maybe_recompute(start + Duration::from_millis(100));
        assert!(matches!(result, Some(PeriodEstimate::NoDominantPeriod)));
    }
}
