//! The backpressure forwarder (BPF): the top-level object that ties the
//! packet pool, bin map, per-bin queue managers, neighbor QLAM state, and
//! path controllers together into the per-tick forwarding loop of
//! spec.md §4.6. This is the "one BPF instance" `iron-node` drives.

use crate::forwarding::{
    gradient, multicast_split, score, select_unicast, ttg_feasible, Candidate, ForwardedIdSet,
    NeighborId, NeighborTable, ScoreParams, TickPacer,
};
use crate::packet::{BinIndex, BinKind, BinMap, HistoryEntry, LatencyClass};
use crate::path_controller::{PathController, RemoteBin, SendOutcome, Sond};
use crate::pool::{PacketPool, PktMemIndex};
use crate::queue::{BinQueueManager, BinQueueManagerConfig};
use crate::telemetry::Metrics;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::Instant;

/// Runtime tunables for a single [`Bpf`] instance's forwarding decisions.
/// Distinct from [`crate::config::BpfConfig`], which holds the
/// configuration-file-facing tunables `iron-node` parses before building
/// one of these.
#[derive(Debug, Clone, Copy, Default)]
pub struct BpfRuntimeConfig {
    pub score: ScoreParams,
}

/// A backpressure forwarder instance: owns the packet pool, the bin map,
/// one [`BinQueueManager`] per destination bin, the neighbor table, and
/// the path controllers it forwards over.
pub struct Bpf {
    pub pool: PacketPool,
    pub bins: BinMap,
    pub neighbors: NeighborTable,
    queues: AHashMap<usize, BinQueueManager>,
    controllers: AHashMap<NeighborId, Sond>,
    forwarded: ForwardedIdSet,
    pacer: TickPacer,
    config: BpfRuntimeConfig,
    metrics: Option<Arc<Metrics>>,
    /// This node's own bin id, pushed into a packet's history on every
    /// forward (spec.md's loop-prevention property: `history[0] == b` after
    /// forwarding through node `b`).
    local_bin_id: u8,
}

impl Bpf {
    pub fn new(pool_capacity: usize, config: BpfRuntimeConfig) -> Self {
        Bpf {
            pool: PacketPool::new(pool_capacity),
            bins: BinMap::new(),
            neighbors: NeighborTable::new(),
            queues: AHashMap::default(),
            controllers: AHashMap::default(),
            forwarded: ForwardedIdSet::new(),
            pacer: TickPacer::default(),
            config,
            metrics: None,
            local_bin_id: 0,
        }
    }

    pub fn set_metrics(&mut self, metrics: Arc<Metrics>) {
        self.metrics = Some(metrics);
    }

    pub fn set_local_bin_id(&mut self, bin_id: u8) {
        self.local_bin_id = bin_id;
    }

    pub fn add_bin_queue(&mut self, bin: BinIndex, queue_config: BinQueueManagerConfig) {
        self.queues.insert(bin.0, BinQueueManager::new(queue_config));
    }

    pub fn add_path_controller(&mut self, neighbor: NeighborId, controller: Sond, remote: RemoteBin) {
        let mut controller = controller;
        controller.set_remote_bin(remote);
        self.controllers.insert(neighbor, controller);
        self.neighbors.add(neighbor);
    }

    /// Pop the next packet a path controller is ready to emit, paced by its
    /// line rate, as wire bytes plus the instant it should actually be sent.
    /// The caller (`iron-node`) owns the socket and does the actual I/O.
    pub fn schedule_next(&mut self, neighbor: NeighborId, now: Instant) -> Option<(Vec<u8>, Instant)> {
        let controller = self.controllers.get_mut(&neighbor)?;
        let (packet, when) = controller.schedule_next(now)?;
        Some((packet.as_bytes().to_vec(), when))
    }

    /// Enqueue a received packet, already resolved to `bin`, of `class`
    /// and `byte_len` (virtual length).
    pub fn enqueue(&mut self, bin: BinIndex, idx: PktMemIndex, class: LatencyClass, byte_len: u32, now: Instant) {
        if let Some(mgr) = self.queues.get_mut(&bin.0) {
            mgr.enqueue(idx, class, byte_len, now);
            if let Some(m) = &self.metrics {
                m.packets_enqueued_total.add(1, &[]);
            }
        }
    }

    /// Advance all queue managers' EWMA/oscillation/ZLR state.
    pub fn tick_queues(&mut self, now: Instant) {
        for mgr in self.queues.values_mut() {
            mgr.tick(&self.pool, now);
        }
    }

    /// Run one forwarding decision: for each bin with a queued head-of-line
    /// packet, compute gradients against every ready neighbor, reject
    /// candidates that can't meet the packet's remaining time-to-go, and
    /// forward the best-scoring feasible candidate (splitting across
    /// neighbors for a multicast-bin queue). Returns the number of packets
    /// forwarded this tick.
    pub fn tick_forward(&mut self, now: Instant) -> usize {
        if !self.pacer.fallback_due(now) {
            return 0;
        }
        self.pacer.record_run(now);
        let mut forwarded = 0;

        let bin_ids: Vec<usize> = self.queues.keys().copied().collect();
        for bin_id in bin_ids {
            let Some((class, idx)) = self.queues.get(&bin_id).and_then(BinQueueManager::peek)
            else {
                continue;
            };
            let w_local = self
                .queues
                .get(&bin_id)
                .map(|m| {
                    if class.is_latency_sensitive() {
                        m.smoothed_ls_depth() as u32
                    } else {
                        m.smoothed_depth() as u32
                    }
                })
                .unwrap_or(0);
            let remaining_ttg = self.pool.with_packet(idx, |p| p.remaining_ttg_usec(now));

            let is_multicast = matches!(self.bins.kind(BinIndex(bin_id)), Some(BinKind::Multicast { .. }));

            if is_multicast {
                forwarded += self.forward_multicast_head(bin_id, class, idx, w_local, remaining_ttg, now);
            } else {
                forwarded += self.forward_unicast_head(bin_id, class, idx, w_local, remaining_ttg, now);
            }
        }
        forwarded
    }

    fn forward_unicast_head(
        &mut self,
        bin_id: usize,
        class: LatencyClass,
        idx: PktMemIndex,
        w_local: u32,
        remaining_ttg: Option<u32>,
        now: Instant,
    ) -> usize {
        let pool = &self.pool;
        let candidates = candidates_for_dest(
            &self.neighbors,
            &self.controllers,
            BinIndex(bin_id),
            class,
            w_local,
            remaining_ttg,
            |remote_bin_id| pool.with_packet(idx, |p| p.history_contains_bin(remote_bin_id)),
            self.config.score,
        );
        let Some(winner) = select_unicast(&candidates) else {
            return 0;
        };
        let packet_id = self.pool.with_packet(idx, |p| (p.src_bin_id().0, p.packet_id()));
        if !self.forwarded.mark_forwarded(packet_id.0, packet_id.1) {
            return 0;
        }
        let Some(mgr) = self.queues.get_mut(&bin_id) else {
            return 0;
        };
        let pool = &self.pool;
        let Some((_, idx)) = mgr.dequeue(pool, now, |head_idx, now| {
            pool.with_packet(*head_idx, |p| p.has_expired(now).then(|| p.virtual_len()))
        }) else {
            return 0;
        };
        let Some(controller) = self.controllers.get_mut(&winner.neighbor) else {
            self.pool.recycle(idx);
            return 0;
        };
        let mut packet = self.pool.with_packet(idx, |p| p.clone());
        packet.push_history(HistoryEntry {
            bin_id: self.local_bin_id,
            path_controller_id: 0,
        });
        let (outcome, returned) = controller.send(packet);
        let sent = match outcome {
            SendOutcome::Accepted => {
                if let Some(m) = &self.metrics {
                    m.packets_dequeued_total.add(1, &[]);
                }
                1
            }
            SendOutcome::Rejected => {
                drop(returned);
                if let Some(m) = &self.metrics {
                    m.path_controller_rejects_total.add(1, &[]);
                }
                0
            }
        };
        self.pool.recycle(idx);
        sent
    }

    /// Split the head packet of a multicast-bin queue across whichever
    /// ready neighbor is best for each live destination member, per
    /// spec.md's multicast forwarding rule. Members with no feasible
    /// neighbor this tick are dropped from the copy sent out (no neighbor
    /// covers them yet); this is logged, not retried.
    fn forward_multicast_head(
        &mut self,
        bin_id: usize,
        class: LatencyClass,
        idx: PktMemIndex,
        w_local: u32,
        remaining_ttg: Option<u32>,
        now: Instant,
    ) -> usize {
        let dst = self.pool.with_packet(idx, |p| p.dst_vec());
        let pool = &self.pool;
        let neighbors = &self.neighbors;
        let controllers = &self.controllers;
        let score_params = self.config.score;
        let (groups, residual) = multicast_split(dst, |member| {
            let candidates = candidates_for_dest(
                neighbors,
                controllers,
                member,
                class,
                w_local,
                remaining_ttg,
                |remote_bin_id| pool.with_packet(idx, |p| p.history_contains_bin(remote_bin_id)),
                score_params,
            );
            select_unicast(&candidates).map(|c| c.neighbor)
        });
        if groups.is_empty() {
            return 0;
        }
        if !residual.is_empty() {
            tracing::debug!(bin_id, dropped = residual.len(), "multicast residual has no ready neighbor this tick");
        }

        let packet_id = self.pool.with_packet(idx, |p| (p.src_bin_id().0, p.packet_id()));
        if !self.forwarded.mark_forwarded(packet_id.0, packet_id.1) {
            return 0;
        }
        let Some(mgr) = self.queues.get_mut(&bin_id) else {
            return 0;
        };
        let pool = &self.pool;
        let Some((_, idx)) = mgr.dequeue(pool, now, |head_idx, now| {
            pool.with_packet(*head_idx, |p| p.has_expired(now).then(|| p.virtual_len()))
        }) else {
            return 0;
        };

        let mut forwarded = 0;
        for (neighbor, group_dst) in &groups {
            let Some(controller) = self.controllers.get_mut(neighbor) else {
                continue;
            };
            let mut packet = self.pool.with_packet(idx, |p| p.clone());
            packet.set_dst_vec(*group_dst);
            packet.push_history(HistoryEntry {
                bin_id: self.local_bin_id,
                path_controller_id: 0,
            });
            let (outcome, returned) = controller.send(packet);
            match outcome {
                SendOutcome::Accepted => {
                    forwarded += 1;
                    if let Some(m) = &self.metrics {
                        m.packets_dequeued_total.add(1, &[]);
                    }
                }
                SendOutcome::Rejected => {
                    drop(returned);
                    if let Some(m) = &self.metrics {
                        m.path_controller_rejects_total.add(1, &[]);
                    }
                }
            }
        }
        self.pool.recycle(idx);
        forwarded
    }
}

/// Gather every ready neighbor's candidate for forwarding `dest`: a
/// positive, TTG-feasible gradient, excluding any neighbor whose remote bin
/// already appears in the packet's history (loop prevention).
fn candidates_for_dest(
    neighbors: &NeighborTable,
    controllers: &AHashMap<NeighborId, Sond>,
    dest: BinIndex,
    class: LatencyClass,
    w_local: u32,
    remaining_ttg: Option<u32>,
    history_contains: impl Fn(u8) -> bool,
    score_params: ScoreParams,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for neighbor_state in neighbors.iter() {
        let neighbor_id = neighbor_state.id();
        let Some(controller) = controllers.get(&neighbor_id) else {
            continue;
        };
        if !controller.is_ready() {
            continue;
        }
        let remote_bin_id = controller.remote_bin().map(|r| r.bin_id).unwrap_or(0);
        if history_contains(remote_bin_id) {
            continue;
        }
        let snapshot = neighbor_state.load();
        let advert = snapshot.get(dest);
        if !ttg_feasible(remaining_ttg, advert.latency_usec) {
            continue;
        }
        let w_neighbor = if class.is_latency_sensitive() {
            advert.ls_weight_bytes
        } else {
            advert.weight_bytes
        };
        let grad = gradient(w_local, w_neighbor);
        if grad == 0 {
            continue;
        }
        let s = score(grad, neighbor_state.capacity_bps(), advert.latency_usec, score_params);
        candidates.push(Candidate {
            neighbor: neighbor_id,
            dest,
            gradient: grad,
            score: s,
            is_latency_sensitive: class.is_latency_sensitive(),
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::{NeighborSnapshot, PerBinAdvert};
    use crate::packet::BinId;
    use crate::path_controller::SondConfig;
    use crate::pool::PacketRecvTimeMode;
    use ahash::AHashMap as Map;

    #[test]
    fn forwards_when_neighbor_offers_positive_gradient() {
        let mut bpf = Bpf::new(16, BpfRuntimeConfig::default());
        let unicast_bin = bpf.bins.add_unicast(BinId(2));
        bpf.add_bin_queue(unicast_bin, BinQueueManagerConfig::default());

        let neighbor = NeighborId(1);
        bpf.add_path_controller(
            neighbor,
            Sond::new(SondConfig::default()),
            RemoteBin { bin_id: 2, bin_index: unicast_bin.0 },
        );
        let state = bpf.neighbors.get(neighbor).unwrap();
        let mut adverts = Map::default();
        adverts.insert(
            unicast_bin.0,
            PerBinAdvert {
                weight_bytes: 0,
                ls_weight_bytes: 0,
                latency_usec: 100,
            },
        );
        state.apply_if_newer(NeighborSnapshot { sequence: 1, adverts });
        state.set_capacity_bps(1_000_000);

        let now = Instant::now();
        let idx = bpf.pool.get(b"hello-world", BinId(1), PacketRecvTimeMode::NoTimestamp);
        bpf.enqueue(unicast_bin, idx, LatencyClass::Normal, 1000, now);
        bpf.tick_queues(now);
        let forwarded = bpf.tick_forward(now + std::time::Duration::from_millis(2));
        assert_eq!(forwarded, 1);

        // The packet must carry this node's bin id as the newest history
        // hop once it lands on the path controller's queue.
        let (sent, _) = bpf.controllers.get_mut(&neighbor).unwrap().schedule_next(now).unwrap();
        assert_eq!(sent.history()[0].bin_id, 0);
    }

    #[test]
    fn forwarding_stamps_configured_local_bin_id_into_history() {
        let mut bpf = Bpf::new(16, BpfRuntimeConfig::default());
        bpf.set_local_bin_id(7);
        let unicast_bin = bpf.bins.add_unicast(BinId(2));
        bpf.add_bin_queue(unicast_bin, BinQueueManagerConfig::default());
        let neighbor = NeighborId(1);
        bpf.add_path_controller(
            neighbor,
            Sond::new(SondConfig::default()),
            RemoteBin { bin_id: 2, bin_index: unicast_bin.0 },
        );
        let state = bpf.neighbors.get(neighbor).unwrap();
        let mut adverts = Map::default();
        adverts.insert(unicast_bin.0, PerBinAdvert { weight_bytes: 0, ls_weight_bytes: 0, latency_usec: 100 });
        state.apply_if_newer(NeighborSnapshot { sequence: 1, adverts });
        state.set_capacity_bps(1_000_000);

        let now = Instant::now();
        let idx = bpf.pool.get(b"hello-world", BinId(1), PacketRecvTimeMode::NoTimestamp);
        bpf.enqueue(unicast_bin, idx, LatencyClass::Normal, 1000, now);
        bpf.tick_queues(now);
        bpf.tick_forward(now + std::time::Duration::from_millis(2));
        let (sent, _) = bpf.controllers.get_mut(&neighbor).unwrap().schedule_next(now).unwrap();
        assert_eq!(sent.history()[0].bin_id, 7);
    }

    #[test]
    fn infeasible_ttg_blocks_forwarding_over_a_too_slow_neighbor() {
        let mut bpf = Bpf::new(16, BpfRuntimeConfig::default());
        let unicast_bin = bpf.bins.add_unicast(BinId(2));
        bpf.add_bin_queue(unicast_bin, BinQueueManagerConfig::default());
        let neighbor = NeighborId(1);
        bpf.add_path_controller(
            neighbor,
            Sond::new(SondConfig::default()),
            RemoteBin { bin_id: 2, bin_index: unicast_bin.0 },
        );
        let state = bpf.neighbors.get(neighbor).unwrap();
        let mut adverts = Map::default();
        // Neighbor's path latency (10ms) exceeds the packet's remaining TTG.
        adverts.insert(unicast_bin.0, PerBinAdvert { weight_bytes: 0, ls_weight_bytes: 0, latency_usec: 10_000 });
        state.apply_if_newer(NeighborSnapshot { sequence: 1, adverts });
        state.set_capacity_bps(1_000_000);

        let now = Instant::now();
        let idx = bpf.pool.get(b"hello-world", BinId(1), PacketRecvTimeMode::NoTimestamp);
        bpf.pool.with_packet_mut(idx, |p| {
            p.set_recv_time(now);
            p.set_ttg_usec(1_000);
        });
        bpf.enqueue(unicast_bin, idx, LatencyClass::Normal, 1000, now);
        bpf.tick_queues(now);
        let forwarded = bpf.tick_forward(now + std::time::Duration::from_millis(2));
        assert_eq!(forwarded, 0);
    }

    #[test]
    fn multicast_split_forwards_a_copy_per_neighbor_group() {
        use crate::packet::GroupId;

        let mut bpf = Bpf::new(16, BpfRuntimeConfig::default());
        let member_b = bpf.bins.add_unicast(BinId(2));
        let member_c = bpf.bins.add_unicast(BinId(3));
        let mut members = crate::packet::DstVec::empty();
        members.insert(member_b);
        members.insert(member_c);
        let group_bin = bpf.bins.add_group(GroupId(0xE000_0001), members);
        bpf.add_bin_queue(group_bin, BinQueueManagerConfig::default());

        let n1 = NeighborId(1);
        let n2 = NeighborId(2);
        bpf.add_path_controller(n1, Sond::new(SondConfig::default()), RemoteBin { bin_id: 2, bin_index: member_b.0 });
        bpf.add_path_controller(n2, Sond::new(SondConfig::default()), RemoteBin { bin_id: 3, bin_index: member_c.0 });

        let state1 = bpf.neighbors.get(n1).unwrap();
        let mut adverts1 = Map::default();
        adverts1.insert(member_b.0, PerBinAdvert { weight_bytes: 0, ls_weight_bytes: 0, latency_usec: 100 });
        state1.apply_if_newer(NeighborSnapshot { sequence: 1, adverts: adverts1 });
        state1.set_capacity_bps(1_000_000);

        let state2 = bpf.neighbors.get(n2).unwrap();
        let mut adverts2 = Map::default();
        adverts2.insert(member_c.0, PerBinAdvert { weight_bytes: 0, ls_weight_bytes: 0, latency_usec: 100 });
        state2.apply_if_newer(NeighborSnapshot { sequence: 1, adverts: adverts2 });
        state2.set_capacity_bps(1_000_000);

        let now = Instant::now();
        let idx = bpf.pool.get(b"multicast-data", BinId(1), PacketRecvTimeMode::NoTimestamp);
        bpf.pool.with_packet_mut(idx, |p| p.set_dst_vec(members));
        bpf.enqueue(group_bin, idx, LatencyClass::Normal, 1000, now);
        bpf.tick_queues(now);
        let forwarded = bpf.tick_forward(now + std::time::Duration::from_millis(2));
        assert_eq!(forwarded, 2);

        let (p1, _) = bpf.controllers.get_mut(&n1).unwrap().schedule_next(now).unwrap();
        assert!(p1.dst_vec().contains(member_b) && !p1.dst_vec().contains(member_c));
        let (p2, _) = bpf.controllers.get_mut(&n2).unwrap().schedule_next(now).unwrap();
        assert!(p2.dst_vec().contains(member_c) && !p2.dst_vec().contains(member_b));
    }
}
