//! Neighbor QLAM state: single-writer / many-reader snapshots of what each
//! neighbor has most recently advertised, keyed by dense bin index
//! (spec.md §4.6, §5).

use crate::packet::BinIndex;
use ahash::AHashMap;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a path controller / neighbor for forwarding decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighborId(pub u32);

/// What a neighbor has told us, for one destination bin: its smoothed
/// weight and (for latency-sensitive traffic) its LS weight, plus our own
/// estimate of the latency to reach that bin via this neighbor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerBinAdvert {
    pub weight_bytes: u32,
    pub ls_weight_bytes: u32,
    pub latency_usec: u32,
}

/// An immutable snapshot of everything one neighbor has advertised, as of
/// `sequence`. Replaced wholesale on each accepted QLAM, never mutated in
/// place.
#[derive(Debug, Clone, Default)]
pub struct NeighborSnapshot {
    pub sequence: u32,
    pub adverts: AHashMap<usize, PerBinAdvert>,
}

impl NeighborSnapshot {
    pub fn get(&self, bin: BinIndex) -> PerBinAdvert {
        self.adverts.get(&bin.0).copied().unwrap_or_default()
    }
}

/// Per-neighbor state: a generation-counter-style snapshot of advertised
/// weights (swapped atomically by the QLAM-processing writer, read
/// lock-free by the forwarding tick) plus a capacity estimate updated by
/// the path controller's PDD/throughput reports.
pub struct NeighborState {
    id: NeighborId,
    snapshot: ArcSwap<NeighborSnapshot>,
    capacity_bps: AtomicU64,
}

impl NeighborState {
    pub fn new(id: NeighborId) -> Self {
        NeighborState {
            id,
            snapshot: ArcSwap::from_pointee(NeighborSnapshot::default()),
            capacity_bps: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> NeighborId {
        self.id
    }

    /// Replace the snapshot if `new_snapshot.sequence` is newer than the
    /// current one. Returns `true` if the swap happened.
    pub fn apply_if_newer(&self, new_snapshot: NeighborSnapshot) -> bool {
        let current = self.snapshot.load();
        if crate::queue::is_newer_sequence(current.sequence, new_snapshot.sequence) {
            self.snapshot.store(Arc::new(new_snapshot));
            true
        } else {
            false
        }
    }

    pub fn load(&self) -> Arc<NeighborSnapshot> {
        self.snapshot.load_full()
    }

    pub fn set_capacity_bps(&self, bps: u64) {
        self.capacity_bps.store(bps, Ordering::Relaxed);
    }

    pub fn capacity_bps(&self) -> u64 {
        self.capacity_bps.load(Ordering::Relaxed)
    }
}

/// The full set of neighbors a node forwards towards.
#[derive(Default)]
pub struct NeighborTable {
    neighbors: AHashMap<NeighborId, Arc<NeighborState>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: NeighborId) -> Arc<NeighborState> {
        self.neighbors
            .entry(id)
            .or_insert_with(|| Arc::new(NeighborState::new(id)))
            .clone()
    }

    pub fn get(&self, id: NeighborId) -> Option<Arc<NeighborState>> {
        self.neighbors.get(&id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NeighborState>> {
        self.neighbors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_sequence_is_rejected() {
        let state = NeighborState::new(NeighborId(1));
        let mut snap = NeighborSnapshot {
            sequence: 5,
            adverts: AHashMap::default(),
        };
        assert!(state.apply_if_newer(snap.clone()));
        snap.sequence = 3;
        assert!(!state.apply_if_newer(snap));
        assert_eq!(state.load().sequence, 5);
    }

    #[test]
    fn readers_see_whole_snapshots_never_torn() {
        let state = NeighborState::new(NeighborId(1));
        let mut adverts = AHashMap::default();
        adverts.insert(
            0,
            PerBinAdvert {
                weight_bytes: 100,
                ls_weight_bytes: 10,
                latency_usec: 500,
            },
        );
        state.apply_if_newer(NeighborSnapshot {
            sequence: 1,
            adverts,
        });
        let snap = state.load();
        let advert = snap.get(BinIndex(0));
        assert_eq!(advert.weight_bytes, 100);
        assert_eq!(advert.latency_usec, 500);
    }
}
