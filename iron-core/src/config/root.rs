//! Typed, validated configuration structs parsed from the flat
//! configuration map (spec.md §6), in the teacher's
//! "one `default_x()` function per field, `Default` mirrors it" shape.

use super::map::ConfigMap;
use crate::error::Result;
use std::collections::BTreeMap;
use std::time::Duration;

fn default_pool_capacity() -> u32 {
    65_536
}

fn default_tau_usec() -> u64 {
    100_000
}

fn default_ls_tau_usec() -> u64 {
    20_000
}

/// Top-level BPF tunables (spec.md §4 general parameters).
#[derive(Debug, Clone)]
pub struct BpfConfig {
    pub pool_capacity: u32,
    pub tau_usec: u64,
    pub ls_tau_usec: u64,
    pub fallback_tick: Duration,
}

impl Default for BpfConfig {
    fn default() -> Self {
        BpfConfig {
            pool_capacity: default_pool_capacity(),
            tau_usec: default_tau_usec(),
            ls_tau_usec: default_ls_tau_usec(),
            fallback_tick: Duration::from_millis(1),
        }
    }
}

impl BpfConfig {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let cfg = ConfigMap::new(map);
        Ok(BpfConfig {
            pool_capacity: cfg.get_or("bpf.pool_capacity", default_pool_capacity())?,
            tau_usec: cfg.get_or("bpf.tau_usec", default_tau_usec())?,
            ls_tau_usec: cfg.get_or("bpf.ls_tau_usec", default_ls_tau_usec())?,
            fallback_tick: cfg.get_duration_secs_or("bpf.fallback_tick_secs", Duration::from_millis(1))?,
        })
    }
}

fn default_sample_size() -> u32 {
    2048
}

/// Oscillation-estimator tunables, exposed through the configuration map
/// (the underlying algorithm lives in `crate::queue::OscConfig`).
#[derive(Debug, Clone)]
pub struct OscMapConfig {
    pub sample_size: u32,
    pub sample_time_secs: f64,
    pub fft_compute_time_secs: f64,
    pub max_considered_period_secs: f64,
    pub min_time_between_resets_secs: f64,
    pub reset_trigger_fraction: f64,
    pub reset_trigger_time_secs: f64,
    pub energy_threshold: f64,
    pub energy_fraction: f64,
}

impl Default for OscMapConfig {
    fn default() -> Self {
        OscMapConfig {
            sample_size: default_sample_size(),
            sample_time_secs: crate::queue::OscConfig::default().sample_time.as_secs_f64(),
            fft_compute_time_secs: crate::queue::OscConfig::default()
                .fft_compute_time
                .as_secs_f64(),
            max_considered_period_secs: crate::queue::OscConfig::default()
                .max_considered_period
                .as_secs_f64(),
            min_time_between_resets_secs: crate::queue::OscConfig::default()
                .min_time_between_resets
                .as_secs_f64(),
            reset_trigger_fraction: crate::queue::OscConfig::default().reset_trigger_fraction,
            reset_trigger_time_secs: crate::queue::OscConfig::default()
                .reset_trigger_time
                .as_secs_f64(),
            energy_threshold: crate::queue::OscConfig::default().energy_threshold,
            energy_fraction: crate::queue::OscConfig::default().energy_fraction,
        }
    }
}

impl OscMapConfig {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let cfg = ConfigMap::new(map);
        let defaults = OscMapConfig::default();
        Ok(OscMapConfig {
            sample_size: cfg.get_or("osc.sample_size", defaults.sample_size)?,
            sample_time_secs: cfg.get_or("osc.sample_time_secs", defaults.sample_time_secs)?,
            fft_compute_time_secs: cfg
                .get_or("osc.fft_compute_time_secs", defaults.fft_compute_time_secs)?,
            max_considered_period_secs: cfg.get_or(
                "osc.max_considered_period_secs",
                defaults.max_considered_period_secs,
            )?,
            min_time_between_resets_secs: cfg.get_or(
                "osc.min_time_between_resets_secs",
                defaults.min_time_between_resets_secs,
            )?,
            reset_trigger_fraction: cfg
                .get_or("osc.reset_trigger_fraction", defaults.reset_trigger_fraction)?,
            reset_trigger_time_secs: cfg
                .get_or("osc.reset_trigger_time_secs", defaults.reset_trigger_time_secs)?,
            energy_threshold: cfg.get_or("osc.energy_threshold", defaults.energy_threshold)?,
            energy_fraction: cfg.get_or("osc.energy_fraction", defaults.energy_fraction)?,
        })
    }

    pub fn to_osc_config(&self) -> crate::queue::OscConfig {
        crate::queue::OscConfig {
            sample_size: self.sample_size as usize,
            sample_time: Duration::from_secs_f64(self.sample_time_secs),
            fft_compute_time: Duration::from_secs_f64(self.fft_compute_time_secs),
            max_considered_period: Duration::from_secs_f64(self.max_considered_period_secs),
            min_time_between_resets: Duration::from_secs_f64(self.min_time_between_resets_secs),
            reset_trigger_fraction: self.reset_trigger_fraction,
            reset_trigger_time: Duration::from_secs_f64(self.reset_trigger_time_secs),
            energy_threshold: self.energy_threshold,
            energy_fraction: self.energy_fraction,
        }
    }
}

fn default_floor_fraction() -> f64 {
    0.1
}

fn default_mtu_bytes() -> u32 {
    1500
}

fn default_alpha() -> f64 {
    1.0
}

/// Forwarding-score and ZLR weighting tunables.
#[derive(Debug, Clone)]
pub struct WeightConfig {
    pub zlr_floor_fraction: f64,
    pub mtu_bytes: u32,
    pub alpha: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        WeightConfig {
            zlr_floor_fraction: default_floor_fraction(),
            mtu_bytes: default_mtu_bytes(),
            alpha: default_alpha(),
        }
    }
}

impl WeightConfig {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let cfg = ConfigMap::new(map);
        Ok(WeightConfig {
            zlr_floor_fraction: cfg.get_or("weight.zlr_floor_fraction", default_floor_fraction())?,
            mtu_bytes: cfg.get_or("weight.mtu_bytes", default_mtu_bytes())?,
            alpha: cfg.get_or("weight.alpha", default_alpha())?,
        })
    }
}

fn default_max_line_rate_bps() -> u64 {
    10_000_000
}

fn default_transmit_threshold_bytes() -> u32 {
    2800
}

/// Per-path-controller tunables (SOND queue sizing, line rate, PDD
/// reporting cadence).
#[derive(Debug, Clone)]
pub struct PathControllerConfig {
    pub max_line_rate_bps: u64,
    pub bpf_transmit_threshold_bytes: u32,
    pub pdd_threshold_fraction: f64,
    pub pdd_min_period_secs: f64,
    pub pdd_max_period_secs: f64,
}

impl Default for PathControllerConfig {
    fn default() -> Self {
        PathControllerConfig {
            max_line_rate_bps: default_max_line_rate_bps(),
            bpf_transmit_threshold_bytes: default_transmit_threshold_bytes(),
            pdd_threshold_fraction: 0.1,
            pdd_min_period_secs: 0.1,
            pdd_max_period_secs: 5.0,
        }
    }
}

impl PathControllerConfig {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let cfg = ConfigMap::new(map);
        let defaults = PathControllerConfig::default();
        Ok(PathControllerConfig {
            max_line_rate_bps: cfg
                .get_or("path_controller.max_line_rate_bps", defaults.max_line_rate_bps)?,
            bpf_transmit_threshold_bytes: cfg.get_or(
                "path_controller.bpf_transmit_threshold_bytes",
                defaults.bpf_transmit_threshold_bytes,
            )?,
            pdd_threshold_fraction: cfg.get_or(
                "path_controller.pdd_threshold_fraction",
                defaults.pdd_threshold_fraction,
            )?,
            pdd_min_period_secs: cfg
                .get_or("path_controller.pdd_min_period_secs", defaults.pdd_min_period_secs)?,
            pdd_max_period_secs: cfg
                .get_or("path_controller.pdd_max_period_secs", defaults.pdd_max_period_secs)?,
        })
    }
}

fn default_base_rate_k() -> u32 {
    4
}

fn default_total_rate_n() -> u32 {
    6
}

fn default_max_chunk_sz() -> u32 {
    1400
}

/// Per-flow FEC context tunables (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct FecContextConfig {
    pub lo_port: u16,
    pub hi_port: u16,
    pub base_rate_k: u32,
    pub total_rate_n: u32,
    pub max_chunk_sz: u32,
    pub max_hold_time: Duration,
    pub in_order: bool,
    pub timeout: Duration,
    pub time_to_go_usec: u32,
    pub reorder_time: Duration,
    pub dscp: u8,
}

impl Default for FecContextConfig {
    fn default() -> Self {
        FecContextConfig {
            lo_port: 0,
            hi_port: 65535,
            base_rate_k: default_base_rate_k(),
            total_rate_n: default_total_rate_n(),
            max_chunk_sz: default_max_chunk_sz(),
            max_hold_time: Duration::from_millis(50),
            in_order: false,
            timeout: Duration::from_secs(60),
            time_to_go_usec: 100_000,
            reorder_time: Duration::from_millis(20),
            dscp: 0,
        }
    }
}

impl FecContextConfig {
    pub fn from_map_with_prefix(map: &BTreeMap<String, String>, prefix: &str) -> Result<Self> {
        let cfg = ConfigMap::new(map);
        let defaults = FecContextConfig::default();
        Ok(FecContextConfig {
            lo_port: cfg.get_or(&format!("{prefix}.lo_port"), defaults.lo_port)?,
            hi_port: cfg.get_or(&format!("{prefix}.hi_port"), defaults.hi_port)?,
            base_rate_k: cfg.get_or(&format!("{prefix}.base_rate_k"), defaults.base_rate_k)?,
            total_rate_n: cfg.get_or(&format!("{prefix}.total_rate_n"), defaults.total_rate_n)?,
            max_chunk_sz: cfg.get_or(&format!("{prefix}.max_chunk_sz"), defaults.max_chunk_sz)?,
            max_hold_time: cfg.get_duration_secs_or(
                &format!("{prefix}.max_hold_time_secs"),
                defaults.max_hold_time,
            )?,
            in_order: cfg.get_or(&format!("{prefix}.in_order"), defaults.in_order)?,
            timeout: cfg
                .get_duration_secs_or(&format!("{prefix}.timeout_secs"), defaults.timeout)?,
            time_to_go_usec: cfg
                .get_or(&format!("{prefix}.time_to_go_usec"), defaults.time_to_go_usec)?,
            reorder_time: cfg.get_duration_secs_or(
                &format!("{prefix}.reorder_time_secs"),
                defaults.reorder_time,
            )?,
            dscp: cfg.get_or(&format!("{prefix}.dscp"), defaults.dscp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpf_config_defaults_when_map_empty() {
        let map = BTreeMap::new();
        let cfg = BpfConfig::from_map(&map).unwrap();
        assert_eq!(cfg.pool_capacity, default_pool_capacity());
    }

    #[test]
    fn fec_context_config_reads_prefixed_keys() {
        let mut map = BTreeMap::new();
        map.insert("fec.voice.base_rate_k".to_string(), "10".to_string());
        let cfg = FecContextConfig::from_map_with_prefix(&map, "fec.voice").unwrap();
        assert_eq!(cfg.base_rate_k, 10);
        assert_eq!(cfg.total_rate_n, default_total_rate_n());
    }
}
