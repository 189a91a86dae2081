#![forbid(unsafe_code)]

//! Core data-plane engine of an IRON node: the packet/bin model, the packet
//! pool, per-bin queue management with EWMA smoothing and Zombie Latency
//! Reduction, the backpressure forwarding algorithm, the path-controller
//! abstraction (with the default SOND implementation), and the UDP proxy's
//! FEC encode/decode/release pipeline.
//!
//! Process bootstrap, configuration file parsing, raw socket I/O, and the
//! SLIQ transport are external collaborators and are not implemented here;
//! see `SPEC_FULL.md` for the exact boundary.

pub mod bpf;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod packet;
pub mod path_controller;
pub mod pool;
pub mod queue;
pub mod telemetry;
pub mod udp_proxy;

pub use error::{IronError, Result};
