//! The backpressure forwarding algorithm ("UberFwdAlg"): gradients,
//! neighbor QLAM state, unicast/multicast selection, and tick pacing
//! (spec.md §4.6).

mod alg;
mod neighbor;
mod pacing;

pub use alg::{
    gradient, multicast_split, score, select_unicast, ttg_feasible, Candidate, ForwardedIdSet,
    ScoreParams,
};
pub use neighbor::{NeighborId, NeighborSnapshot, NeighborState, NeighborTable, PerBinAdvert};
pub use pacing::{TickPacer, DEFAULT_FALLBACK_TICK};
