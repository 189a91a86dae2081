//! UberFwdAlg: per-tick gradient computation and joint (path ×
//! destination × packet) selection (spec.md §4.6).

use super::neighbor::NeighborId;
use crate::packet::{BinIndex, DstVec};
use ahash::AHashSet;

/// `G_N(B) = max(0, W_local(B) - W_N(B))`, the classical backpressure
/// gradient.
pub fn gradient(w_local: u32, w_neighbor: u32) -> u32 {
    w_local.saturating_sub(w_neighbor)
}

/// Tunables for scoring a unicast candidate.
#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub mtu_bytes: u32,
    /// Weight given to latency in the score; larger values penalize
    /// high-latency paths more.
    pub alpha: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        ScoreParams {
            mtu_bytes: 1500,
            alpha: 1.0,
        }
    }
}

/// `score = G_N(B) * C_N / MTU - alpha * L_N(B)`. Higher is better.
pub fn score(
    grad_bytes: u32,
    capacity_bps: u64,
    latency_usec: u32,
    params: ScoreParams,
) -> f64 {
    (grad_bytes as f64 * capacity_bps as f64 / params.mtu_bytes as f64)
        - params.alpha * latency_usec as f64
}

/// One scored unicast candidate: a (path/neighbor, destination bin) pair
/// with a nonempty gradient.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub neighbor: NeighborId,
    pub dest: BinIndex,
    pub gradient: u32,
    pub score: f64,
    pub is_latency_sensitive: bool,
}

/// Whether a packet with `remaining_ttg_usec` can still arrive in time via
/// a path of `latency_usec`. A packet with no valid TTG is always
/// feasible (spec.md: TTG tracking is opt-in per packet).
pub fn ttg_feasible(remaining_ttg_usec: Option<u32>, latency_usec: u32) -> bool {
    match remaining_ttg_usec {
        None => true,
        Some(ttg) => (ttg as i64) - (latency_usec as i64) >= 0,
    }
}

/// Select the best unicast candidate from `candidates`, applying:
/// - latency-sensitive preemption (any LS candidate with positive gradient
///   beats every non-LS candidate),
/// - the loop filter and TTG-infeasibility filter the caller is expected
///   to have already applied by excluding disqualified candidates,
/// - plain highest-score-wins among what remains.
///
/// Returns `None` if `candidates` is empty.
pub fn select_unicast(candidates: &[Candidate]) -> Option<Candidate> {
    let any_ls = candidates.iter().any(|c| c.is_latency_sensitive && c.gradient > 0);
    let pool: Vec<&Candidate> = if any_ls {
        candidates.iter().filter(|c| c.is_latency_sensitive).collect()
    } else {
        candidates.iter().collect()
    };
    pool.into_iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
}

/// Tracks packet ids this node has already forwarded, so a packet queued
/// for transmission on multiple bins/neighbors within the same tick isn't
/// sent twice for the same id (spec.md's duplicate-suppression rule).
#[derive(Default)]
pub struct ForwardedIdSet {
    seen: AHashSet<(u8, u32)>,
}

impl ForwardedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(src_bin_id, packet_id)` as forwarded. Returns `true` if it
    /// was not already present (i.e. this send should proceed).
    pub fn mark_forwarded(&mut self, src_bin_id: u8, packet_id: u32) -> bool {
        self.seen.insert((src_bin_id, packet_id))
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Assign each set destination bit in `dst` to the neighbor
/// `best_neighbor_for` reports for it (or leave it unassigned if `None`),
/// then group the assignment into one `DstVec` per neighbor plus a
/// residual of bits with no eligible neighbor this tick.
///
/// This realizes spec.md's multicast split rule: if every bit resolves to
/// the same neighbor, the result is a single `(neighbor, dst)` entry
/// identical to sending one unsplit copy; otherwise each neighbor gets its
/// own reduced `DstVec` clone.
pub fn multicast_split(
    dst: DstVec,
    best_neighbor_for: impl Fn(BinIndex) -> Option<NeighborId>,
) -> (Vec<(NeighborId, DstVec)>, DstVec) {
    let mut groups: Vec<(NeighborId, DstVec)> = Vec::new();
    let mut residual = DstVec::empty();
    for bit in dst.iter() {
        match best_neighbor_for(bit) {
            Some(neighbor) => {
                if let Some((_, v)) = groups.iter_mut().find(|(n, _)| *n == neighbor) {
                    v.insert(bit);
                } else {
                    let mut v = DstVec::empty();
                    v.insert(bit);
                    groups.push((neighbor, v));
                }
            }
            None => residual.insert(bit),
        }
    }
    groups.sort_by_key(|(n, _)| n.0);
    (groups, residual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_never_negative() {
        assert_eq!(gradient(100, 150), 0);
        assert_eq!(gradient(150, 100), 50);
    }

    #[test]
    fn ls_candidate_preempts_non_ls() {
        let candidates = vec![
            Candidate {
                neighbor: NeighborId(1),
                dest: BinIndex(0),
                gradient: 500,
                score: 1000.0,
                is_latency_sensitive: false,
            },
            Candidate {
                neighbor: NeighborId(2),
                dest: BinIndex(1),
                gradient: 10,
                score: 1.0,
                is_latency_sensitive: true,
            },
        ];
        let picked = select_unicast(&candidates).unwrap();
        assert_eq!(picked.neighbor, NeighborId(2));
    }

    #[test]
    fn ttg_infeasible_path_is_rejected() {
        assert!(!ttg_feasible(Some(100), 200));
        assert!(ttg_feasible(Some(200), 100));
        assert!(ttg_feasible(None, 100_000));
    }

    #[test]
    fn duplicate_packet_id_only_forwarded_once() {
        let mut seen = ForwardedIdSet::new();
        assert!(seen.mark_forwarded(3, 42));
        assert!(!seen.mark_forwarded(3, 42));
        assert!(seen.mark_forwarded(4, 42));
    }

    #[test]
    fn multicast_split_matches_example_s4() {
        // A has {B, C, D}; N1 offers {B, C}; N2 offers {D}.
        let mut dst = DstVec::empty();
        dst.insert(BinIndex(1)); // B
        dst.insert(BinIndex(2)); // C
        dst.insert(BinIndex(3)); // D
        let (groups, residual) = multicast_split(dst, |bit| match bit.0 {
            1 | 2 => Some(NeighborId(1)),
            3 => Some(NeighborId(2)),
            _ => None,
        });
        assert!(residual.is_empty());
        assert_eq!(groups.len(), 2);
        let n1 = groups.iter().find(|(n, _)| *n == NeighborId(1)).unwrap().1;
        assert!(n1.contains(BinIndex(1)) && n1.contains(BinIndex(2)) && !n1.contains(BinIndex(3)));
        let n2 = groups.iter().find(|(n, _)| *n == NeighborId(2)).unwrap().1;
        assert!(n2.contains(BinIndex(3)) && n2.len() == 1);
    }

    #[test]
    fn multicast_no_split_when_one_neighbor_covers_all() {
        let mut dst = DstVec::empty();
        dst.insert(BinIndex(0));
        dst.insert(BinIndex(1));
        let (groups, residual) = multicast_split(dst, |_| Some(NeighborId(9)));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.bits(), dst.bits());
        assert!(residual.is_empty());
    }
}
