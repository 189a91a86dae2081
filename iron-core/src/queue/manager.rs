//! Per-bin queue manager: latency-class FIFOs, TTG expiration, EWMA
//! smoothing, and Zombie Latency Reduction, tuned independently for the
//! latency-sensitive and non-LS halves of a bin's traffic (spec.md §4.4).

use super::ewma::{EwmaSmoother, EwmaVariant};
use super::osc::{OscConfig, PeriodEstimate, QueueDepthOsc};
use super::zlr::{ZlrConfig, ZlrController};
use crate::packet::{LatencyClass, Packet, LATENCY_CLASS_ORDER};
use crate::pool::{PacketPool, PktMemIndex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// What happens to a packet whose time-to-go has elapsed while queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Drop the packet outright and recycle its pool slot.
    Drop,
    /// Demote it to a zombie in place, keeping its queue-depth weight.
    Demote,
}

#[derive(Debug, Clone, Copy)]
pub struct BinQueueManagerConfig {
    pub tau: Duration,
    pub ls_tau: Duration,
    pub ewma_variant: EwmaVariant,
    pub zlr: ZlrConfig,
    pub ls_zlr: ZlrConfig,
    pub osc: OscConfig,
    pub ls_osc: OscConfig,
    pub expiry_policy: ExpiryPolicy,
}

impl Default for BinQueueManagerConfig {
    fn default() -> Self {
        BinQueueManagerConfig {
            tau: Duration::from_millis(100),
            ls_tau: Duration::from_millis(20),
            ewma_variant: EwmaVariant::Exponential,
            zlr: ZlrConfig::default(),
            ls_zlr: ZlrConfig::default(),
            osc: OscConfig::default(),
            ls_osc: OscConfig::default(),
            expiry_policy: ExpiryPolicy::Demote,
        }
    }
}

struct QueuedEntry {
    idx: PktMemIndex,
    enqueued_at: Instant,
}

/// Manages one bin's queued packets across all latency classes: FIFO order
/// within a class, strict priority across classes per
/// [`crate::packet::LATENCY_CLASS_ORDER`], EWMA-smoothed depth tracking
/// split between the latency-sensitive and non-LS halves, and ZLR.
pub struct BinQueueManager {
    classes: [VecDeque<QueuedEntry>; 10],
    real_bytes: u32,
    ls_real_bytes: u32,
    ewma: EwmaSmoother,
    ls_ewma: EwmaSmoother,
    osc: QueueDepthOsc,
    ls_osc: QueueDepthOsc,
    zlr: ZlrController,
    ls_zlr: ZlrController,
    config: BinQueueManagerConfig,
}

impl BinQueueManager {
    pub fn new(config: BinQueueManagerConfig) -> Self {
        BinQueueManager {
            classes: Default::default(),
            real_bytes: 0,
            ls_real_bytes: 0,
            ewma: EwmaSmoother::new(config.tau, config.ewma_variant),
            ls_ewma: EwmaSmoother::new(config.ls_tau, config.ewma_variant),
            osc: QueueDepthOsc::new(config.osc),
            ls_osc: QueueDepthOsc::new(config.ls_osc),
            zlr: ZlrController::new(config.zlr),
            ls_zlr: ZlrController::new(config.ls_zlr),
            config,
        }
    }

    fn class_slot(class: LatencyClass) -> usize {
        LATENCY_CLASS_ORDER
            .iter()
            .position(|&c| c == class)
            .expect("LatencyClass must appear in LATENCY_CLASS_ORDER")
    }

    /// Enqueue a packet already classified with `class`, of `byte_len`
    /// bytes (virtual length for zombies).
    pub fn enqueue(&mut self, idx: PktMemIndex, class: LatencyClass, byte_len: u32, now: Instant) {
        self.classes[Self::class_slot(class)].push_back(QueuedEntry {
            idx,
            enqueued_at: now,
        });
        if class.is_latency_sensitive() {
            self.ls_real_bytes += byte_len;
        } else {
            self.real_bytes += byte_len;
        }
    }

    /// Inspect the head of the highest-priority non-empty class without
    /// removing it.
    pub fn peek(&self) -> Option<(LatencyClass, PktMemIndex)> {
        for (slot, class) in LATENCY_CLASS_ORDER.iter().enumerate() {
            if let Some(entry) = self.classes[slot].front() {
                return Some((*class, entry.idx));
            }
        }
        None
    }

    /// Pop the head of the highest-priority non-empty class, expiring
    /// (per `expiry_policy`) any head-of-line packets whose TTG has
    /// elapsed along the way. `byte_len` is the caller-supplied size to
    /// debit from the running depth counters (the packet's virtual
    /// length).
    pub fn dequeue(
        &mut self,
        pool: &PacketPool,
        now: Instant,
        ttg_check: impl Fn(&PktMemIndex, Instant) -> Option<u32>,
    ) -> Option<(LatencyClass, PktMemIndex)> {
        for (slot, class) in LATENCY_CLASS_ORDER.iter().enumerate() {
            while let Some(entry) = self.classes[slot].pop_front() {
                if let Some(expired_len) = ttg_check(&entry.idx, now) {
                    self.debit(*class, expired_len);
                    match self.config.expiry_policy {
                        ExpiryPolicy::Drop => {
                            pool.recycle(entry.idx);
                            continue;
                        }
                        ExpiryPolicy::Demote => {
                            pool.with_packet_mut(entry.idx, |p| {
                                p.make_zombie(expired_len, LatencyClass::HighLatencyExp)
                            });
                            self.enqueue(entry.idx, LatencyClass::HighLatencyExp, expired_len, now);
                            continue;
                        }
                    }
                }
                let byte_len = pool.with_packet(entry.idx, |p| p.virtual_len());
                self.debit(*class, byte_len);
                return Some((*class, entry.idx));
            }
        }
        None
    }

    fn debit(&mut self, class: LatencyClass, byte_len: u32) {
        if class.is_latency_sensitive() {
            self.ls_real_bytes = self.ls_real_bytes.saturating_sub(byte_len);
        } else {
            self.real_bytes = self.real_bytes.saturating_sub(byte_len);
        }
    }

    /// Advance EWMA/oscillation/ZLR state with the current observed real
    /// depths, and convert real packets into zombie bytes when ZLR's target
    /// grows. Called on the forwarding tick, not per-packet.
    pub fn tick(&mut self, pool: &PacketPool, now: Instant) {
        self.ewma.update(now, self.real_bytes as f64);
        self.ls_ewma.update(now, self.ls_real_bytes as f64);
        self.osc.record_sample(now, self.real_bytes);
        self.ls_osc.record_sample(now, self.ls_real_bytes);
        if let Some(PeriodEstimate::Period(period)) = self.osc.maybe_recompute(now) {
            self.ewma.set_tau(period);
        }
        if let Some(PeriodEstimate::Period(period)) = self.ls_osc.maybe_recompute(now) {
            self.ls_ewma.set_tau(period);
        }

        let before = self.zlr.target_zombie_bytes();
        let after = self.zlr.update(now, self.real_bytes);
        if after > before {
            self.zombify_tail(
                pool,
                LatencyClass::Normal,
                LatencyClass::HighLatencyZlr,
                after - before,
                now,
            );
        }

        let ls_before = self.ls_zlr.target_zombie_bytes();
        let ls_after = self.ls_zlr.update(now, self.ls_real_bytes);
        if ls_after > ls_before {
            self.zombify_tail(
                pool,
                LatencyClass::LowLatency,
                LatencyClass::HighLatencyZlrLs,
                ls_after - ls_before,
                now,
            );
        }
    }

    /// Convert real packets from the tail of `source_class` into zombie
    /// packets enqueued at the tail of `zombie_class`, recycling the
    /// originals, until at least `bytes_needed` virtual bytes have moved
    /// across (or `source_class` runs dry). This is how ZLR's target grows
    /// into an actual queue-depth weight rather than a bare number added on
    /// top of the real depth.
    fn zombify_tail(
        &mut self,
        pool: &PacketPool,
        source_class: LatencyClass,
        zombie_class: LatencyClass,
        mut bytes_needed: u32,
        now: Instant,
    ) {
        let slot = Self::class_slot(source_class);
        while bytes_needed > 0 {
            let Some(entry) = self.classes[slot].pop_back() else {
                break;
            };
            let (virtual_len, src_bin_id) =
                pool.with_packet(entry.idx, |p| (p.virtual_len(), p.src_bin_id()));
            self.debit(source_class, virtual_len);
            pool.recycle(entry.idx);
            let zombie_len = virtual_len.max(1);
            let zombie_idx = pool.insert(Packet::new_zombie(zombie_len, src_bin_id, zombie_class));
            self.enqueue(zombie_idx, zombie_class, zombie_len, now);
            bytes_needed = bytes_needed.saturating_sub(zombie_len);
        }
    }

    /// Smoothed (EWMA) non-LS queue depth in bytes.
    pub fn smoothed_depth(&self) -> f64 {
        self.ewma.value()
    }

    pub fn smoothed_ls_depth(&self) -> f64 {
        self.ls_ewma.value()
    }

    /// Depth as advertised to neighbors: the real smoothed depth, which by
    /// now already includes any zombie bytes ZLR converted into the queue.
    pub fn advertised_depth(&self) -> u32 {
        self.smoothed_depth() as u32
    }

    pub fn advertised_ls_depth(&self) -> u32 {
        self.smoothed_ls_depth() as u32
    }

    pub fn real_bytes(&self) -> u32 {
        self.real_bytes
    }

    pub fn ls_real_bytes(&self) -> u32 {
        self.ls_real_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(VecDeque::is_empty)
    }
}
