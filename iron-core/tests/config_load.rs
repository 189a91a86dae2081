use iron_core::config::{load_from_path, validate_config, BpfConfig, PathControllerConfig, WeightConfig};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    std::env::temp_dir().join(format!("iron-core-{nanos}-{name}.toml"))
}

#[test]
fn loads_and_validates_a_full_config_file() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("full");
    fs::write(
        &path,
        r#"
[bpf]
pool_capacity = 2048
tau_usec = 50000
ls_tau_usec = 10000

[weight]
mtu_bytes = 1400
alpha = 2.0

[path_controller]
max_line_rate_bps = 5000000
bpf_transmit_threshold_bytes = 1400
"#,
    )?;

    let map = load_from_path(&path)?;
    validate_config(&map)?;

    let bpf_cfg = BpfConfig::from_map(&map)?;
    assert_eq!(bpf_cfg.pool_capacity, 2048);
    assert_eq!(bpf_cfg.tau_usec, 50_000);
    assert_eq!(bpf_cfg.ls_tau_usec, 10_000);

    let weight_cfg = WeightConfig::from_map(&map)?;
    assert_eq!(weight_cfg.mtu_bytes, 1400);
    assert!((weight_cfg.alpha - 2.0).abs() < 1e-9);

    let path_cfg = PathControllerConfig::from_map(&map)?;
    assert_eq!(path_cfg.max_line_rate_bps, 5_000_000);
    assert_eq!(path_cfg.bpf_transmit_threshold_bytes, 1400);

    fs::remove_file(&path).ok();
    Ok(())
}

#[test]
fn missing_sections_fall_back_to_defaults() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("sparse");
    fs::write(&path, "[bpf]\npool_capacity = 4096\n")?;

    let map = load_from_path(&path)?;
    validate_config(&map)?;

    let bpf_cfg = BpfConfig::from_map(&map)?;
    assert_eq!(bpf_cfg.pool_capacity, 4096);
    let weight_cfg = WeightConfig::from_map(&map)?;
    assert_eq!(weight_cfg.mtu_bytes, 1500);

    fs::remove_file(&path).ok();
    Ok(())
}

#[test]
fn rejects_a_file_with_no_tables() {
    let path = tmp_path("empty");
    fs::write(&path, "").unwrap();
    let map = load_from_path(&path).unwrap();
    assert!(validate_config(&map).is_err());
    fs::remove_file(&path).ok();
}
