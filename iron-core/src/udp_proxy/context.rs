//! Per-flow FEC context: the parameters a classified port range is
//! encoded/decoded under (spec.md §4.8).

use super::decoder::FecDecoder;
use crate::config::FecContextConfig;
use crate::packet::DstVec;
use std::time::Instant;

/// A live FEC context for one classified flow (or multicast group),
/// carrying its configuration plus the bookkeeping that changes as
/// packets pass through it.
pub struct FecContext {
    pub config: FecContextConfig,
    pub dst_vec: Option<DstVec>,
    pub util_fn_defn: Option<String>,
    last_active: Instant,
}

impl FecContext {
    pub fn new(config: FecContextConfig, now: Instant) -> Self {
        FecContext {
            config,
            dst_vec: None,
            util_fn_defn: None,
            last_active: now,
        }
    }

    pub fn matches_port(&self, port: u16) -> bool {
        (self.config.lo_port..=self.config.hi_port).contains(&port)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    /// Whether this context has been idle past its configured timeout and
    /// should be garbage-collected.
    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_active) >= self.config.timeout
    }

    /// Build a decoder for this context's negotiated `(k, n)` shard counts,
    /// carrying its `reorder_time` and `in_order` release policy through.
    pub fn build_decoder(&self) -> FecDecoder {
        FecDecoder::new(
            self.config.base_rate_k as usize,
            self.config.total_rate_n as usize,
            self.config.reorder_time,
            self.config.in_order,
        )
    }
}

/// Keyed collection of live FEC contexts, selected by destination port.
#[derive(Default)]
pub struct FecContextTable {
    contexts: Vec<FecContext>,
}

impl FecContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, context: FecContext) {
        self.contexts.push(context);
    }

    pub fn find_for_port(&mut self, port: u16) -> Option<&mut FecContext> {
        self.contexts.iter_mut().find(|c| c.matches_port(port))
    }

    /// Drop every context that has gone idle past its timeout.
    pub fn reap_stale(&mut self, now: Instant) {
        self.contexts.retain(|c| !c.is_stale(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn finds_context_by_port_range() {
        let mut table = FecContextTable::new();
        let mut cfg = FecContextConfig::default();
        cfg.lo_port = 5000;
        cfg.hi_port = 5010;
        table.insert(FecContext::new(cfg, Instant::now()));
        assert!(table.find_for_port(5005).is_some());
        assert!(table.find_for_port(6000).is_none());
    }

    #[test]
    fn build_decoder_carries_in_order_flag_from_config() {
        use super::super::encoder::FecEncoder;

        let mut cfg = FecContextConfig::default();
        cfg.base_rate_k = 3;
        cfg.total_rate_n = 5;
        cfg.in_order = true;
        let ctx = FecContext::new(cfg, Instant::now());
        let mut dec = ctx.build_decoder();

        let mut enc = FecEncoder::new(3, 5, 8, Duration::from_millis(50));
        let now = Instant::now();
        enc.push(b"a0000000", now);
        enc.push(b"a1111111", now);
        let block0 = enc.push(b"a2222222", now).unwrap();
        enc.push(b"b0000000", now);
        enc.push(b"b1111111", now);
        let block1 = enc.push(b"b2222222", now).unwrap();

        let mut released = Vec::new();
        for pkt in &block1 {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert!(released.is_empty(), "group 1 held back pending group 0 because in_order carried through");

        for pkt in &block0 {
            released = dec.receive(&pkt.bytes, now);
            if !released.is_empty() {
                break;
            }
        }
        assert_eq!(released.len(), 6);
    }

    #[test]
    fn stale_contexts_are_reaped() {
        let mut table = FecContextTable::new();
        let mut cfg = FecContextConfig::default();
        cfg.timeout = std::time::Duration::from_millis(1);
        let t0 = Instant::now();
        table.insert(FecContext::new(cfg, t0));
        table.reap_stale(t0 + std::time::Duration::from_millis(5));
        assert!(table.find_for_port(100).is_none());
    }
}
