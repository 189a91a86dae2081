//! UDP proxy: per-flow FEC encode/decode/release pipeline (spec.md §4.8).

mod context;
mod decoder;
mod encoder;
mod release;

pub use context::{FecContext, FecContextTable};
pub use decoder::{FecDecoder, ReleasedOriginal};
pub use encoder::{EncodedPacket, FecEncoder, FecTrailer, TRAILER_LEN};
pub use release::{
    NormFlowController, ReceiverReportMessage, ThrottledRelease, UnthrottledRelease,
};
