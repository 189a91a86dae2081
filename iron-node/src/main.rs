#![forbid(unsafe_code)]

use clap::Parser;
use iron_core::bpf::{Bpf, BpfRuntimeConfig};
use iron_core::config::{
    load_from_path, validate_config, BpfConfig, ConfigMap, PathControllerConfig, WeightConfig,
};
use iron_core::forwarding::{NeighborId, NeighborSnapshot, PerBinAdvert, ScoreParams};
use iron_core::packet::{BinId, PacketOwner};
use iron_core::path_controller::{PathControllerKind, RemoteBin, Sond, SondConfig};
use iron_core::pool::PacketRecvTimeMode;
use iron_core::queue::BinQueueManagerConfig;
use iron_core::telemetry::init_metrics;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant as TokioInstant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const NEIGHBOR: NeighborId = NeighborId(1);

#[derive(Parser, Debug)]
#[command(author, version, about = "IRON node (demo backpressure forwarder over loopback UDP)")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/demo.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(&cli.config).await {
        error!(%err, "iron-node exited with error");
        std::process::exit(1);
    }
}

async fn run(config_path: &PathBuf) -> iron_core::Result<()> {
    let map = load_from_path(config_path)?;
    validate_config(&map)?;
    let cfg = ConfigMap::new(&map);

    let bpf_cfg = BpfConfig::from_map(&map)?;
    let weight_cfg = WeightConfig::from_map(&map)?;
    let path_cfg = PathControllerConfig::from_map(&map)?;

    let listen_addr: SocketAddr = cfg
        .get_or("node.listen_addr", "127.0.0.1:29170".to_string())?
        .parse()
        .map_err(|e| iron_core::IronError::Config(format!("node.listen_addr: {e}")))?;
    let neighbor_addr: SocketAddr = cfg
        .get_or("node.neighbor_addr", "127.0.0.1:29171".to_string())?
        .parse()
        .map_err(|e| iron_core::IronError::Config(format!("node.neighbor_addr: {e}")))?;
    let local_bin_id: u8 = cfg.get_or("node.local_bin_id", 1u8)?;
    let remote_bin_id: u8 = cfg.get_or("node.remote_bin_id", 2u8)?;

    info!(%listen_addr, %neighbor_addr, "configuration loaded");

    let (metrics, registry) = init_metrics().map_err(|e| iron_core::IronError::Config(e.to_string()))?;
    let _ = &registry; // scraped by a future HTTP endpoint; not wired in this demo.

    let mut bpf = Bpf::new(
        bpf_cfg.pool_capacity as usize,
        BpfRuntimeConfig {
            score: ScoreParams {
                mtu_bytes: weight_cfg.mtu_bytes,
                alpha: weight_cfg.alpha,
            },
        },
    );
    bpf.set_metrics(metrics);
    bpf.set_local_bin_id(local_bin_id);

    let remote_bin_index = bpf.bins.add_unicast(BinId(remote_bin_id));
    bpf.add_bin_queue(
        remote_bin_index,
        BinQueueManagerConfig {
            tau: Duration::from_micros(bpf_cfg.tau_usec),
            ls_tau: Duration::from_micros(bpf_cfg.ls_tau_usec),
            ..BinQueueManagerConfig::default()
        },
    );

    let sond = Sond::new(SondConfig {
        kind: PathControllerKind::UdpTunnel,
        max_line_rate_bps: path_cfg.max_line_rate_bps,
        bpf_transmit_threshold_bytes: path_cfg.bpf_transmit_threshold_bytes,
        pdd_threshold_fraction: path_cfg.pdd_threshold_fraction,
        pdd_min_period: Duration::from_secs_f64(path_cfg.pdd_min_period_secs),
        pdd_max_period: Duration::from_secs_f64(path_cfg.pdd_max_period_secs),
    });
    bpf.add_path_controller(
        NEIGHBOR,
        sond,
        RemoteBin {
            bin_id: remote_bin_id,
            bin_index: remote_bin_index.0,
        },
    );

    // Seed a single static neighbor advert: this neighbor carries nothing
    // yet for the remote bin, so the gradient against any locally queued
    // traffic is always positive and the demo traffic keeps moving.
    let neighbor_state = bpf.neighbors.get(NEIGHBOR).expect("just registered");
    let mut adverts = ahash::AHashMap::default();
    adverts.insert(
        remote_bin_index.0,
        PerBinAdvert {
            weight_bytes: 0,
            ls_weight_bytes: 0,
            latency_usec: 1_000,
        },
    );
    neighbor_state.apply_if_newer(NeighborSnapshot { sequence: 1, adverts });
    neighbor_state.set_capacity_bps(path_cfg.max_line_rate_bps);

    let listen_sock = UdpSocket::bind(listen_addr).await?;
    let tunnel_sock = UdpSocket::bind("127.0.0.1:0").await?;
    info!(local = %listen_sock.local_addr()?, tunnel = %tunnel_sock.local_addr()?, "sockets bound");

    tokio::spawn(echo_neighbor(neighbor_addr));

    let mut ticker = interval(bpf_cfg.fallback_tick);
    let mut recv_buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            result = listen_sock.recv_from(&mut recv_buf) => {
                match result {
                    Ok((n, peer)) => {
                        let now = std::time::Instant::now();
                        let idx = bpf.pool.get(&recv_buf[..n], BinId(local_bin_id), PacketRecvTimeMode::NowTimestamp);
                        let (class, virtual_len, mgen) = bpf.pool.with_packet_mut(idx, |p| {
                            p.set_owner(PacketOwner::UdpProxy);
                            (p.latency_class(), p.virtual_len(), p.mgen_info())
                        });
                        bpf.enqueue(remote_bin_index, idx, class, virtual_len, now);
                        info!(%peer, bytes = n, ?mgen, "admitted datagram into bin queue");
                    }
                    Err(err) => warn!(%err, "recv_from failed"),
                }
            }
            _ = ticker.tick() => {
                let now = std::time::Instant::now();
                bpf.tick_queues(now);
                let forwarded = bpf.tick_forward(now);
                if forwarded > 0 {
                    info!(forwarded, "forwarding tick moved packets onto path controller");
                }
                while let Some((bytes, when)) = bpf.schedule_next(NEIGHBOR, now) {
                    let deadline = TokioInstant::from_std(when);
                    tokio::time::sleep_until(deadline).await;
                    if let Err(err) = tunnel_sock.send_to(&bytes, neighbor_addr).await {
                        warn!(%err, "failed to transmit scheduled packet");
                    }
                }
            }
        }
    }
}

/// Stand-in "remote enclave": logs whatever lands on the neighbor address so
/// a single process can demonstrate the path controller's wire output
/// without a second full node.
async fn echo_neighbor(addr: SocketAddr) {
    let sock = match UdpSocket::bind(addr).await {
        Ok(sock) => sock,
        Err(err) => {
            error!(%err, %addr, "failed to bind neighbor echo socket");
            return;
        }
    };
    let mut buf = vec![0u8; 65536];
    loop {
        match sock.recv_from(&mut buf).await {
            Ok((n, peer)) => info!(%peer, bytes = n, "neighbor received forwarded packet"),
            Err(err) => {
                warn!(%err, "neighbor echo recv failed");
                break;
            }
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
