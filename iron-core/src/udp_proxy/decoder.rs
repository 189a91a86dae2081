//! FEC decoding and reassembly: per-block reconstruction once `k` of `n`
//! slots are present, partial release on reorder-time expiry, and
//! stale-block dropping (spec.md §4.8).

use super::encoder::{FecTrailer, TRAILER_LEN};
use ahash::AHashMap;
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How far behind the newest seen group id a block may lag before it is
/// dropped outright rather than partially released.
const STALE_GROUP_MARGIN: u32 = 64;

/// `true` if `candidate` is strictly older than `reference` under wrapping
/// sequence comparison (mirrors `queue::is_newer_sequence`, inverted).
fn is_older(candidate: u32, reference: u32) -> bool {
    reference.wrapping_sub(candidate) as i32 > 0
}

struct BlockState {
    slots: Vec<Option<Vec<u8>>>,
    present: usize,
    first_seen: Instant,
}

impl BlockState {
    fn new(n: usize, now: Instant) -> Self {
        BlockState {
            slots: vec![None; n],
            present: 0,
            first_seen: now,
        }
    }
}

/// Decodes FEC blocks for one flow: buffers arriving shards, reconstructs
/// as soon as `k` of `n` are present, and releases originals either in
/// full (reconstructed) or partially (on `reorder_time` expiry).
pub struct FecDecoder {
    k: usize,
    n: usize,
    newest_group_id: Option<u32>,
    blocks: AHashMap<u32, BlockState>,
    reorder_time: Duration,
    codec: ReedSolomon,
    /// Enforce release in ascending group-id order (`FecContextConfig::in_order`),
    /// holding a completed block back until every earlier group has released.
    in_order: bool,
    next_release_group: Option<u32>,
    pending_release: BTreeMap<u32, Vec<ReleasedOriginal>>,
    /// When the head of `pending_release` has been waiting on a missing
    /// earlier group, the instant that wait started; used to bound how
    /// long in-order release will stall on a gap.
    gap_since: Option<Instant>,
}

/// A decoded original packet, with its block and slot for diagnostics.
#[derive(Debug, Clone)]
pub struct ReleasedOriginal {
    pub group_id: u32,
    pub slot_id: u8,
    pub payload: Vec<u8>,
}

impl FecDecoder {
    pub fn new(k: usize, n: usize, reorder_time: Duration, in_order: bool) -> Self {
        FecDecoder {
            k,
            n,
            newest_group_id: None,
            blocks: AHashMap::default(),
            reorder_time,
            codec: ReedSolomon::new(k, n - k).expect("valid Reed-Solomon shard counts"),
            in_order,
            // FecEncoder always numbers its first block 0 for a flow, so
            // in-order mode can start expecting release from group 0 rather
            // than discovering a baseline from whatever completes first.
            next_release_group: in_order.then_some(0),
            pending_release: BTreeMap::new(),
            gap_since: None,
        }
    }

    /// Route a just-completed group's originals through in-order release
    /// bookkeeping. When `in_order` is disabled this is a no-op pass-through.
    fn release_in_order(
        &mut self,
        group_id: u32,
        originals: Vec<ReleasedOriginal>,
        now: Instant,
    ) -> Vec<ReleasedOriginal> {
        if !self.in_order {
            return originals;
        }
        let next = *self.next_release_group.get_or_insert(group_id);
        if is_older(group_id, next) {
            // Already past this point in the release order; hand it over
            // rather than hold it back forever.
            return originals;
        }
        self.pending_release.insert(group_id, originals);

        let mut cursor = next;
        let mut released = Vec::new();
        while let Some(block) = self.pending_release.remove(&cursor) {
            released.extend(block);
            cursor = cursor.wrapping_add(1);
        }
        self.next_release_group = Some(cursor);
        self.gap_since = if self.pending_release.is_empty() {
            None
        } else {
            Some(self.gap_since.unwrap_or(now))
        };
        released
    }

    fn is_too_stale(&self, group_id: u32) -> bool {
        match self.newest_group_id {
            Some(newest) => newest.wrapping_sub(group_id) > STALE_GROUP_MARGIN,
            None => false,
        }
    }

    /// Feed one received (possibly trailer-still-attached) packet in.
    /// Returns the reconstructed originals if this shard completed the
    /// block.
    pub fn receive(&mut self, buf: &[u8], now: Instant) -> Vec<ReleasedOriginal> {
        let Some((trailer, payload)) = FecTrailer::decode(buf) else {
            return Vec::new();
        };
        if self.is_too_stale(trailer.group_id) {
            return Vec::new();
        }
        self.newest_group_id = Some(match self.newest_group_id {
            Some(newest) if newest.wrapping_sub(trailer.group_id) as i32 <= 0 => trailer.group_id,
            Some(newest) => newest,
            None => trailer.group_id,
        });

        let n = self.n;
        let block = self
            .blocks
            .entry(trailer.group_id)
            .or_insert_with(|| BlockState::new(n, now));
        let slot = trailer.slot_id as usize;
        if slot < n && block.slots[slot].is_none() {
            block.slots[slot] = Some(payload.to_vec());
            block.present += 1;
        }

        if block.present >= self.k {
            let group_id = trailer.group_id;
            let released = self.reconstruct(group_id);
            self.blocks.remove(&group_id);
            self.release_in_order(group_id, released, now)
        } else {
            Vec::new()
        }
    }

    fn reconstruct(&mut self, group_id: u32) -> Vec<ReleasedOriginal> {
        let block = self.blocks.get(&group_id).expect("block present");
        let mut shards: Vec<Option<Vec<u8>>> = block.slots.clone();
        if self
            .codec
            .reconstruct(&mut shards)
            .is_err()
        {
            return Vec::new();
        }
        (0..self.k)
            .filter_map(|slot_id| {
                shards[slot_id].clone().map(|payload| ReleasedOriginal {
                    group_id,
                    slot_id: slot_id as u8,
                    payload,
                })
            })
            .collect()
    }

    /// Release whatever originals are present (without reconstruction)
    /// for blocks that have sat past `reorder_time`, and drop blocks that
    /// have fallen too far behind the newest group id. Call periodically.
    pub fn reap(&mut self, now: Instant) -> Vec<ReleasedOriginal> {
        let reorder_time = self.reorder_time;
        let k = self.k;
        let mut released = Vec::new();
        let stale_ids: Vec<u32> = self
            .blocks
            .iter()
            .filter(|(_, b)| now.duration_since(b.first_seen) >= reorder_time)
            .map(|(&id, _)| id)
            .collect();
        for group_id in stale_ids {
            if let Some(block) = self.blocks.remove(&group_id) {
                let mut group_originals = Vec::new();
                for slot_id in 0..k {
                    if let Some(payload) = &block.slots[slot_id] {
                        group_originals.push(ReleasedOriginal {
                            group_id,
                            slot_id: slot_id as u8,
                            payload: payload.clone(),
                        });
                    }
                }
                released.extend(self.release_in_order(group_id, group_originals, now));
            }
        }
        self.blocks
            .retain(|&id, _| !self.is_too_stale_after(id));

        // A gap that has outlasted `reorder_time` means the missing group is
        // never coming; stop waiting on it and release what queued up behind it.
        if self.in_order {
            if let Some(since) = self.gap_since {
                if now.duration_since(since) >= self.reorder_time {
                    if let Some(&lowest) = self.pending_release.keys().next() {
                        let mut cursor = lowest;
                        while let Some(block) = self.pending_release.remove(&cursor) {
                            released.extend(block);
                            cursor = cursor.wrapping_add(1);
                        }
                        self.next_release_group = Some(cursor);
                    }
                    self.gap_since = if self.pending_release.is_empty() {
                        None
                    } else {
                        Some(now)
                    };
                }
            }
        }
        released
    }

    fn is_too_stale_after(&self, group_id: u32) -> bool {
        self.is_too_stale(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udp_proxy::encoder::FecEncoder;

    #[test]
    fn reconstructs_from_k_of_n_shards() {
        let mut enc = FecEncoder::new(3, 5, 8, Duration::from_millis(50));
        let now = Instant::now();
        enc.push(b"aaaaaaaa", now);
        enc.push(b"bbbbbbbb", now);
        let block = enc.push(b"cccccccc", now).unwrap();

        let mut dec = FecDecoder::new(3, 5, Duration::from_millis(100), false);
        // Drop the first original; keep the rest (two originals + both repairs).
        let mut released = Vec::new();
        for pkt in block.iter().skip(1) {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert_eq!(released.len(), 3);
    }

    #[test]
    fn partial_release_on_reorder_timeout() {
        let mut enc = FecEncoder::new(3, 5, 8, Duration::from_millis(50));
        let now = Instant::now();
        enc.push(b"aaaaaaaa", now);
        enc.push(b"bbbbbbbb", now);
        let block = enc.push(b"cccccccc", now).unwrap();

        let mut dec = FecDecoder::new(3, 5, Duration::from_millis(10), false);
        // Only one shard arrives; not enough to reconstruct.
        let first = &block[0];
        assert!(dec.receive(&first.bytes, now).is_empty());
        let released = dec.reap(now + Duration::from_millis(20));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].slot_id, first.trailer.slot_id);
    }

    #[test]
    fn in_order_release_holds_a_later_block_until_the_earlier_one_completes() {
        let mut enc = FecEncoder::new(3, 5, 8, Duration::from_millis(50));
        let now = Instant::now();

        enc.push(b"a0000000", now);
        enc.push(b"a1111111", now);
        let block0 = enc.push(b"a2222222", now).unwrap();

        enc.push(b"b0000000", now);
        enc.push(b"b1111111", now);
        let block1 = enc.push(b"b2222222", now).unwrap();

        let mut dec = FecDecoder::new(3, 5, Duration::from_millis(100), true);

        // Block 1 (group_id 1) completes first; with in_order it must not
        // release until block 0 (group_id 0) has also completed.
        let mut released = Vec::new();
        for pkt in &block1 {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert!(released.is_empty(), "group 1 must not release before group 0");

        // Now complete block 0; both groups should release, in order.
        let mut released = Vec::new();
        for pkt in &block0 {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert_eq!(released.len(), 6, "both groups release once the gap fills");
        let group_ids: Vec<u32> = released.iter().map(|r| r.group_id).collect();
        assert!(group_ids.windows(2).all(|w| w[0] <= w[1]), "groups released in ascending order");
    }

    #[test]
    fn in_order_release_skips_a_gap_after_reorder_time() {
        let mut enc = FecEncoder::new(3, 5, 8, Duration::from_millis(50));
        let now = Instant::now();

        enc.push(b"a0000000", now);
        enc.push(b"a1111111", now);
        enc.push(b"a2222222", now); // group 0, never delivered

        enc.push(b"b0000000", now);
        enc.push(b"b1111111", now);
        let block1 = enc.push(b"b2222222", now).unwrap();

        let mut dec = FecDecoder::new(3, 5, Duration::from_millis(10), true);
        let mut released = Vec::new();
        for pkt in &block1 {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert!(released.is_empty(), "group 1 is held behind the still-missing group 0");

        let released = dec.reap(now + Duration::from_millis(50));
        assert_eq!(released.len(), 3, "the gap ages out and group 1 releases on its own");
    }
}
