//! FEC block formation: group `k` originals, compute `n-k` systematic
//! Reed-Solomon repair shards over GF(2^8) (spec.md §4.8).

use reed_solomon_erasure::galois_8::ReedSolomon;
use std::time::{Duration, Instant};

/// Trailer appended to every FEC-encoded packet: which block it belongs
/// to, its slot within the block, and a per-packet sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecTrailer {
    pub group_id: u32,
    pub slot_id: u8,
    pub fec_seq_num: u32,
}

pub const TRAILER_LEN: usize = 4 + 1 + 4;

impl FecTrailer {
    pub fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.group_id.to_be_bytes());
        out.push(self.slot_id);
        out.extend_from_slice(&self.fec_seq_num.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<(FecTrailer, &[u8])> {
        if buf.len() < TRAILER_LEN {
            return None;
        }
        let split = buf.len() - TRAILER_LEN;
        let (payload, trailer) = buf.split_at(split);
        Some((
            FecTrailer {
                group_id: u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]),
                slot_id: trailer[4],
                fec_seq_num: u32::from_be_bytes([trailer[5], trailer[6], trailer[7], trailer[8]]),
            },
            payload,
        ))
    }
}

/// A packet ready to hand to the BPF: its FEC trailer and the wire bytes
/// (including the trailer) to send.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub trailer: FecTrailer,
    pub bytes: Vec<u8>,
}

/// Accumulates original packets into blocks of `k`, forcing emission
/// after `max_hold_time` even if the block is incomplete, and computes
/// `n-k` repair shards for each full block.
pub struct FecEncoder {
    k: usize,
    n: usize,
    max_chunk_sz: usize,
    max_hold_time: Duration,
    group_id: u32,
    seq_num: u32,
    pending: Vec<Vec<u8>>,
    block_opened_at: Option<Instant>,
    codec: ReedSolomon,
}

impl FecEncoder {
    pub fn new(k: usize, n: usize, max_chunk_sz: usize, max_hold_time: Duration) -> Self {
        assert!(n > k && k > 0, "FEC block needs 0 < k < n");
        FecEncoder {
            k,
            n,
            max_chunk_sz,
            max_hold_time,
            group_id: 0,
            seq_num: 0,
            pending: Vec::with_capacity(k),
            block_opened_at: None,
            codec: ReedSolomon::new(k, n - k).expect("valid Reed-Solomon shard counts"),
        }
    }

    /// Add an original packet payload to the current block. Returns the
    /// encoded block if this completed it.
    pub fn push(&mut self, payload: &[u8], now: Instant) -> Option<Vec<EncodedPacket>> {
        self.block_opened_at.get_or_insert(now);
        self.pending.push(payload.to_vec());
        if self.pending.len() >= self.k {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Force emission of the current (possibly incomplete) block if
    /// `max_hold_time` has elapsed since it was opened.
    pub fn tick(&mut self, now: Instant) -> Option<Vec<EncodedPacket>> {
        let due = self
            .block_opened_at
            .map(|opened| now.duration_since(opened) >= self.max_hold_time)
            .unwrap_or(false);
        if due && !self.pending.is_empty() {
            Some(self.flush())
        } else {
            None
        }
    }

    fn flush(&mut self) -> Vec<EncodedPacket> {
        let group_id = self.group_id;
        self.group_id = self.group_id.wrapping_add(1);
        self.block_opened_at = None;

        let originals_present = self.pending.len();
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.n);
        for payload in self.pending.drain(..) {
            let mut padded = payload;
            padded.resize(self.max_chunk_sz, 0);
            shards.push(padded);
        }
        // Pad a short (timed-out) block with zero originals so the codec
        // always sees exactly k data shards; these slots are never
        // emitted, only used to compute valid repair shards.
        for _ in originals_present..self.k {
            shards.push(vec![0u8; self.max_chunk_sz]);
        }
        for _ in 0..(self.n - self.k) {
            shards.push(vec![0u8; self.max_chunk_sz]);
        }
        self.codec.encode(&mut shards).expect("encode with correct shard shape");

        let mut out = Vec::with_capacity(originals_present + (self.n - self.k));
        for (slot_id, shard) in shards.iter().enumerate() {
            // Only emit real originals (not the zero-padding used to keep
            // the codec happy for a short block) plus all repair shards.
            if slot_id < self.k && slot_id >= originals_present {
                continue;
            }
            let trailer = FecTrailer {
                group_id,
                slot_id: slot_id as u8,
                fec_seq_num: self.seq_num,
            };
            self.seq_num = self.seq_num.wrapping_add(1);
            let mut bytes = shard.clone();
            trailer.encode(&mut bytes);
            out.push(EncodedPacket { trailer, bytes });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_block_emits_k_originals_plus_repairs() {
        let mut enc = FecEncoder::new(3, 5, 16, Duration::from_millis(50));
        let now = Instant::now();
        assert!(enc.push(b"aaa", now).is_none());
        assert!(enc.push(b"bbb", now).is_none());
        let block = enc.push(b"ccc", now).expect("third original completes block");
        assert_eq!(block.len(), 5);
        assert_eq!(block.iter().filter(|p| p.trailer.slot_id < 3).count(), 3);
        assert_eq!(block.iter().filter(|p| p.trailer.slot_id >= 3).count(), 2);
    }

    #[test]
    fn trailer_roundtrips() {
        let trailer = FecTrailer {
            group_id: 7,
            slot_id: 2,
            fec_seq_num: 99,
        };
        let mut buf = b"payload".to_vec();
        trailer.encode(&mut buf);
        let (decoded, payload) = FecTrailer::decode(&buf).unwrap();
        assert_eq!(decoded, trailer);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn max_hold_time_forces_incomplete_block() {
        let mut enc = FecEncoder::new(4, 6, 16, Duration::from_millis(10));
        let t0 = Instant::now();
        enc.push(b"only-one", t0);
        assert!(enc.tick(t0).is_none());
        let block = enc.tick(t0 + Duration::from_millis(20));
        assert!(block.is_some());
        assert_eq!(block.unwrap().iter().filter(|p| p.trailer.slot_id < 4).count(), 1);
    }
}
