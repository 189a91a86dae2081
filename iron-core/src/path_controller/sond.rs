//! SOND: the default UDP-tunneled path controller, with four priority
//! queues and line-rate-paced emission (spec.md §4.7).

use super::pdd::PddReporter;
use super::{PathController, RemoteBin, SendOutcome};
use crate::packet::{CatHeaderType, LatencyClass, Packet, PacketType};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Which framing a path controller uses, determining its per-QLAM
/// overhead (`original_source/iron/bpf/src/path_controller.h`, `sond.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathControllerKind {
    /// A SOND: Ethernet + IPv4 + UDP framing around each tunneled packet.
    UdpTunnel,
    /// A raw-IP path controller: Ethernet + IPv4 framing, no UDP header.
    RawIp,
}

const ETHERNET_OVERHEAD: usize = 14;
const IPV4_OVERHEAD: usize = 20;
const UDP_OVERHEAD: usize = 8;

impl PathControllerKind {
    pub fn per_qlam_overhead(self) -> usize {
        match self {
            PathControllerKind::UdpTunnel => ETHERNET_OVERHEAD + IPV4_OVERHEAD + UDP_OVERHEAD,
            PathControllerKind::RawIp => ETHERNET_OVERHEAD + IPV4_OVERHEAD,
        }
    }
}

/// SOND's four priority queues, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SondQueue {
    Qlam = 0,
    EfData = 1,
    SystemControl = 2,
    Other = 3,
}

const NUM_QUEUES: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct SondConfig {
    pub kind: PathControllerKind,
    pub max_line_rate_bps: u64,
    /// The BPF's transmit threshold in bytes; the EF-data and other-data
    /// queues are sized to roughly `threshold / 28` packets, per spec.md.
    pub bpf_transmit_threshold_bytes: u32,
    pub pdd_threshold_fraction: f64,
    pub pdd_min_period: Duration,
    pub pdd_max_period: Duration,
}

impl Default for SondConfig {
    fn default() -> Self {
        SondConfig {
            kind: PathControllerKind::UdpTunnel,
            max_line_rate_bps: 10_000_000,
            bpf_transmit_threshold_bytes: 28 * 100,
            pdd_threshold_fraction: 0.1,
            pdd_min_period: Duration::from_millis(100),
            pdd_max_period: Duration::from_secs(5),
        }
    }
}

fn queue_for(packet: &Packet) -> SondQueue {
    match packet.packet_type() {
        PacketType::Qlam => SondQueue::Qlam,
        PacketType::Lsa => SondQueue::SystemControl,
        _ => {
            if packet.latency_class() == LatencyClass::LowLatency {
                SondQueue::EfData
            } else {
                SondQueue::Other
            }
        }
    }
}

/// A SOND path controller: a UDP-tunneled link with four priority
/// queues, paced emission, and a PDD reporter.
pub struct Sond {
    config: SondConfig,
    queues: [VecDeque<Packet>; NUM_QUEUES],
    capacities: [usize; NUM_QUEUES],
    remote_bin: Option<RemoteBin>,
    xmit_start_time: Option<Instant>,
    delta_time: Duration,
    pub pdd: PddReporter,
}

impl Sond {
    pub fn new(config: SondConfig) -> Self {
        let data_cap = (config.bpf_transmit_threshold_bytes / 28).max(1) as usize;
        Sond {
            capacities: [1, data_cap, 100, data_cap],
            queues: Default::default(),
            remote_bin: None,
            xmit_start_time: None,
            delta_time: Duration::ZERO,
            pdd: PddReporter::new(
                config.pdd_threshold_fraction,
                config.pdd_min_period,
                config.pdd_max_period,
            ),
            config,
        }
    }

    fn queue_mut(&mut self, q: SondQueue) -> &mut VecDeque<Packet> {
        &mut self.queues[q as usize]
    }

    /// Prepend CAT metadata headers in the order the wire expects. Each
    /// `prepend_cat_header` call inserts immediately before the current
    /// start of the buffer, so to produce the on-wire order
    /// destination-vector, history, latency, packet-id (destination-vector
    /// tag first, stripped first by the receiver) the calls below happen in
    /// the reverse order: packet-id, latency, history, destination-vector.
    fn prepend_cat_headers(packet: &mut Packet) {
        let mut id_payload = [0u8; 3];
        let id = packet.packet_id().to_be_bytes();
        id_payload.copy_from_slice(&id[1..]);
        packet.prepend_cat_header(CatHeaderType::PacketId, &id_payload);

        let ttg = packet.ttg_usec().unwrap_or(0).to_be_bytes();
        let mut latency_payload = [0u8; 7];
        latency_payload[..4].copy_from_slice(&ttg);
        packet.prepend_cat_header(CatHeaderType::PacketLatency, &latency_payload);

        // `history()` is newest-first, which is already the wire order this
        // header expects (most recent hop first).
        let mut history_payload = [0u8; 11];
        for (i, entry) in packet.history().iter().take(11).enumerate() {
            history_payload[i] = entry.bin_id;
        }
        packet.prepend_cat_header(CatHeaderType::PacketHistory, &history_payload);

        let dst_bits_full = packet.dst_vec().bits().to_be_bytes();
        packet.prepend_cat_header(CatHeaderType::DstVec, &dst_bits_full[1..]);
    }

    /// Pop the next packet ready to emit, if the SOND has anything queued,
    /// along with the wall-clock instant at which it should actually be
    /// sent given line-rate pacing. Picks the highest-priority nonempty
    /// queue. Does not block; returns `None` if every queue is empty.
    pub fn schedule_next(&mut self, now: Instant) -> Option<(Packet, Instant)> {
        let slot = (0..NUM_QUEUES).find(|&i| !self.queues[i].is_empty())?;
        let mut packet = self.queues[slot].pop_front()?;
        Self::prepend_cat_headers(&mut packet);

        let start = *self.xmit_start_time.get_or_insert(now);
        let size_bits = (packet.len() as u64) * 8;
        let rate = self.config.max_line_rate_bps.max(1);
        let scheduled = start + self.delta_time;
        self.delta_time += Duration::from_secs_f64(size_bits as f64 / rate as f64);
        Some((packet, scheduled))
    }

    /// Change the line rate. Per spec.md, this never affects a packet
    /// already scheduled and waiting on its timer — only future
    /// `size_bits / rate_bps` increments use the new rate.
    pub fn set_max_line_rate_bps(&mut self, bps: u64) {
        self.config.max_line_rate_bps = bps;
    }
}

impl PathController for Sond {
    fn send(&mut self, packet: Packet) -> (SendOutcome, Option<Packet>) {
        let queue = queue_for(&packet);
        let cap = self.capacities[queue as usize];
        if queue == SondQueue::Qlam {
            // Head-drop: a new QLAM always replaces any queued one.
            self.queue_mut(SondQueue::Qlam).clear();
            self.queue_mut(SondQueue::Qlam).push_back(packet);
            return (SendOutcome::Accepted, None);
        }
        if self.queues[queue as usize].len() >= cap {
            return (SendOutcome::Rejected, Some(packet));
        }
        self.queue_mut(queue).push_back(packet);
        (SendOutcome::Accepted, None)
    }

    fn queued_bytes(&self) -> usize {
        self.queues.iter().flatten().map(Packet::len).sum()
    }

    fn per_qlam_overhead(&self) -> usize {
        self.config.kind.per_qlam_overhead()
    }

    fn set_remote_bin(&mut self, remote: RemoteBin) {
        self.remote_bin = Some(remote);
    }

    fn remote_bin(&self) -> Option<RemoteBin> {
        self.remote_bin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::BinId;

    fn qlam_packet() -> Packet {
        Packet::new(&[0x10, 1, 0, 0, 0, 1], BinId(1))
    }

    fn data_packet() -> Packet {
        let mut buf = vec![0x45u8, 0, 0, 28];
        buf.resize(28, 0);
        buf[9] = 17;
        Packet::new(&buf, BinId(1))
    }

    #[test]
    fn qlam_queue_head_drops_old_entry() {
        let mut sond = Sond::new(SondConfig::default());
        sond.send(qlam_packet());
        sond.send(qlam_packet());
        assert_eq!(sond.queues[SondQueue::Qlam as usize].len(), 1);
    }

    #[test]
    fn data_queue_rejects_once_full() {
        let mut sond = Sond::new(SondConfig {
            bpf_transmit_threshold_bytes: 28,
            ..SondConfig::default()
        });
        let (first, _) = sond.send(data_packet());
        assert_eq!(first, SendOutcome::Accepted);
        let (second, returned) = sond.send(data_packet());
        assert_eq!(second, SendOutcome::Rejected);
        assert!(returned.is_some());
    }

    #[test]
    fn schedule_next_paces_by_line_rate() {
        let mut sond = Sond::new(SondConfig {
            max_line_rate_bps: 8_000,
            ..SondConfig::default()
        });
        sond.send(data_packet());
        sond.send(data_packet());
        let now = Instant::now();
        let (_, t1) = sond.schedule_next(now).unwrap();
        let (_, t2) = sond.schedule_next(now).unwrap();
        assert!(t2 > t1);
    }

    #[test]
    fn not_ready_until_remote_bin_set() {
        let sond = Sond::new(SondConfig::default());
        assert!(!sond.is_ready());
    }
}
