//! Queue depths, QLAM codec, EWMA/ZLR-smoothed per-bin queue management,
//! and the oscillation estimator that retunes EWMA time constants
//! (spec.md §4.3, §4.4, §4.5).

mod depths;
mod ewma;
mod manager;
mod osc;
mod zlr;

pub use depths::{
    build_qlam, decode_qlam, encode_qlam, is_newer_sequence, Qlam, QlamGroup, QueueDepths,
    QLAM_TYPE_BYTE,
};
pub use ewma::{EwmaSmoother, EwmaVariant};
pub use manager::{BinQueueManager, BinQueueManagerConfig, ExpiryPolicy};
pub use osc::{OscConfig, PeriodEstimate, QueueDepthOsc};
pub use zlr::{ZlrConfig, ZlrController};
