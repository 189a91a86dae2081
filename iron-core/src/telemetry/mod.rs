//! Metrics (spec.md's ambient stack, §1 of `SPEC_FULL.md`).

mod metrics;

pub use metrics::{encode_metrics, init_metrics, Metrics};
