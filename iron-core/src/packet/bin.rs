//! Bin identifier space: wire-level `BinId`, dense internal `BinIndex`, the
//! `BinMap` that relates them, and the `DstVec` destination bit set used for
//! multicast (spec.md §3).

use ahash::AHashMap;
use std::fmt;

/// One-byte wire identifier of an edge enclave or multicast group.
///
/// Unicast bin ids live in `[1, 255]`; group bin id 0 is reserved to mean
/// "all unicast bins" and is never itself a configured multicast bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinId(pub u8);

impl fmt::Display for BinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A multicast group bin id: the IPv4 multicast address for the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Synthetic group id used on the wire to mean "the unicast aggregate".
pub const UNICAST_GROUP_ID: u32 = 0;

/// Dense internal index, valid for array indexing, produced by a `BinMap`.
/// Distinct from `BinId`: stable only for the lifetime of the `BinMap` that
/// produced it, and assigned densely starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinIndex(pub usize);

/// A compact bit set over unicast bin indices, describing the live
/// destination set of a multicast packet. Capacity is bounded by the number
/// of unicast bins configured (at most 255 in this address space, so a
/// `u32` comfortably covers the on-wire 24-bit field plus headroom; the
/// in-memory representation uses one bit per configured unicast bin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DstVec(u32);

impl DstVec {
    pub fn empty() -> Self {
        DstVec(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        DstVec(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, idx: BinIndex) -> bool {
        idx.0 < 32 && (self.0 & (1 << idx.0)) != 0
    }

    pub fn insert(&mut self, idx: BinIndex) {
        if idx.0 < 32 {
            self.0 |= 1 << idx.0;
        }
    }

    pub fn remove(&mut self, idx: BinIndex) {
        if idx.0 < 32 {
            self.0 &= !(1 << idx.0);
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn union(self, other: DstVec) -> DstVec {
        DstVec(self.0 | other.0)
    }

    pub fn intersection(self, other: DstVec) -> DstVec {
        DstVec(self.0 & other.0)
    }

    pub fn difference(self, other: DstVec) -> DstVec {
        DstVec(self.0 & !other.0)
    }

    pub fn is_subset_of(self, other: DstVec) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = BinIndex> {
        let bits = self.0;
        (0..32).filter(move |b| bits & (1 << b) != 0).map(BinIndex)
    }
}

/// What kind of destination a `BinIndex` resolves to.
#[derive(Debug, Clone)]
pub enum BinKind {
    Unicast,
    Multicast { group_id: GroupId, members: DstVec },
}

/// Maps between wire `BinId`/`GroupId` and dense `BinIndex`, and tracks
/// which indices are unicast vs. multicast group bins. Built once at
/// configuration time; the set of bin indices is fixed thereafter (spec.md
/// §3 invariant).
#[derive(Debug, Default)]
pub struct BinMap {
    unicast_ids: AHashMap<BinId, BinIndex>,
    group_ids: AHashMap<GroupId, BinIndex>,
    kinds: Vec<BinKind>,
    ids: Vec<BinIdOrGroup>,
}

#[derive(Debug, Clone, Copy)]
enum BinIdOrGroup {
    Unicast(BinId),
    Group(GroupId),
}

impl BinMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unicast bin, returning its dense index. Idempotent for a
    /// bin id already registered.
    pub fn add_unicast(&mut self, bin_id: BinId) -> BinIndex {
        if let Some(&idx) = self.unicast_ids.get(&bin_id) {
            return idx;
        }
        let idx = BinIndex(self.kinds.len());
        self.kinds.push(BinKind::Unicast);
        self.ids.push(BinIdOrGroup::Unicast(bin_id));
        self.unicast_ids.insert(bin_id, idx);
        idx
    }

    /// Register a multicast group with its initial membership set.
    pub fn add_group(&mut self, group_id: GroupId, members: DstVec) -> BinIndex {
        if let Some(&idx) = self.group_ids.get(&group_id) {
            return idx;
        }
        let idx = BinIndex(self.kinds.len());
        self.kinds.push(BinKind::Multicast { group_id, members });
        self.ids.push(BinIdOrGroup::Group(group_id));
        self.group_ids.insert(group_id, idx);
        idx
    }

    pub fn unicast_index(&self, bin_id: BinId) -> Option<BinIndex> {
        self.unicast_ids.get(&bin_id).copied()
    }

    pub fn group_index(&self, group_id: GroupId) -> Option<BinIndex> {
        self.group_ids.get(&group_id).copied()
    }

    pub fn kind(&self, idx: BinIndex) -> Option<&BinKind> {
        self.kinds.get(idx.0)
    }

    /// Members of the multicast group at `idx`, or `None` if `idx` is not a
    /// multicast group (or out of range).
    pub fn group_members(&self, idx: BinIndex) -> Option<DstVec> {
        match self.kinds.get(idx.0)? {
            BinKind::Multicast { members, .. } => Some(*members),
            BinKind::Unicast => None,
        }
    }

    /// All configured unicast bin indices, in registration order.
    pub fn unicast_indices(&self) -> impl Iterator<Item = BinIndex> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| matches!(k, BinKind::Unicast))
            .map(|(i, _)| BinIndex(i))
    }

    pub fn num_bins(&self) -> usize {
        self.kinds.len()
    }

    pub fn bin_id_of(&self, idx: BinIndex) -> Option<BinId> {
        match self.ids.get(idx.0)? {
            BinIdOrGroup::Unicast(id) => Some(*id),
            BinIdOrGroup::Group(_) => None,
        }
    }
}
