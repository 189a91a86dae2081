//! EWMA smoothing of queue depth samples, in the two variants the original
//! bin queue manager supports (`original_source/iron/bpf/src/ewma_bin_queue_mgr.h`).

use std::time::{Duration, Instant};

/// Which weighting formula [`EwmaSmoother::update`] uses to turn an
/// elapsed-time delta into a blend weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EwmaVariant {
    /// `weight = 1 - exp(-dt / tau)`, the classical continuous-time EWMA.
    Exponential,
    /// `weight = min(dt / tau, 1)`, a cheaper linear ramp to the same
    /// steady-state behavior for `dt << tau`.
    LinearInterpolation,
}

/// An exponentially (or linearly) weighted moving average of queue depth,
/// with its own time constant so latency-sensitive and non-LS sub-queues
/// can be tuned independently (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct EwmaSmoother {
    tau: Duration,
    variant: EwmaVariant,
    value: f64,
    last_update: Option<Instant>,
}

impl EwmaSmoother {
    pub fn new(tau: Duration, variant: EwmaVariant) -> Self {
        EwmaSmoother {
            tau,
            variant,
            value: 0.0,
            last_update: None,
        }
    }

    pub fn set_tau(&mut self, tau: Duration) {
        self.tau = tau;
    }

    pub fn tau(&self) -> Duration {
        self.tau
    }

    fn compute_weight(&self, dt: Duration) -> f64 {
        if self.tau.is_zero() {
            return 1.0;
        }
        let ratio = dt.as_secs_f64() / self.tau.as_secs_f64();
        match self.variant {
            EwmaVariant::Exponential => 1.0 - (-ratio).exp(),
            EwmaVariant::LinearInterpolation => ratio.min(1.0),
        }
    }

    /// Blend in a new `sample` observed at `now`. The first sample simply
    /// initializes the average.
    pub fn update(&mut self, now: Instant, sample: f64) -> f64 {
        match self.last_update {
            None => {
                self.value = sample;
            }
            Some(last) => {
                let dt = now.duration_since(last);
                let w = self.compute_weight(dt);
                self.value = w * sample + (1.0 - w) * self.value;
            }
        }
        self.last_update = Some(now);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_value() {
        let mut ewma = EwmaSmoother::new(Duration::from_millis(100), EwmaVariant::Exponential);
        let now = Instant::now();
        assert_eq!(ewma.update(now, 42.0), 42.0);
    }

    #[test]
    fn large_dt_converges_to_new_sample() {
        let mut ewma = EwmaSmoother::new(Duration::from_millis(10), EwmaVariant::Exponential);
        let t0 = Instant::now();
        ewma.update(t0, 0.0);
        let v = ewma.update(t0 + Duration::from_secs(10), 100.0);
        assert!((v - 100.0).abs() < 1e-3);
    }

    #[test]
    fn linear_variant_caps_weight_at_one() {
        let mut ewma =
            EwmaSmoother::new(Duration::from_millis(10), EwmaVariant::LinearInterpolation);
        let t0 = Instant::now();
        ewma.update(t0, 10.0);
        let v = ewma.update(t0 + Duration::from_secs(1), 200.0);
        assert_eq!(v, 200.0);
    }
}
