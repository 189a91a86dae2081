//! Micro benchmarks for the packet pool's hot path: get/recycle and
//! shallow-copy refcounting. Pure CPU, no network, no IO.
//!
//! ```bash
//! cargo bench --bench pool_bench
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use iron_core::packet::BinId;
use iron_core::pool::{PacketPool, PacketRecvTimeMode};

const PAYLOAD: &[u8] = &[0xab; 512];

fn bench_get_recycle(c: &mut Criterion) {
    let pool = PacketPool::new(1024);

    c.bench_function("pool_get_recycle_roundtrip", |b| {
        b.iter(|| {
            let idx = pool.get(std::hint::black_box(PAYLOAD), BinId(1), PacketRecvTimeMode::NoTimestamp);
            pool.recycle(idx);
        });
    });
}

fn bench_shallow_copy(c: &mut Criterion) {
    let pool = PacketPool::new(1024);

    c.bench_function("pool_shallow_copy_fanout", |b| {
        b.iter(|| {
            let idx = pool.get(std::hint::black_box(PAYLOAD), BinId(1), PacketRecvTimeMode::NoTimestamp);
            let copies: Vec<_> = (0..4).map(|_| pool.shallow_copy(idx)).collect();
            for c in copies {
                pool.recycle(c);
            }
            pool.recycle(idx);
        });
    });
}

fn bench_clone_packet(c: &mut Criterion) {
    let pool = PacketPool::new(1024);
    let idx = pool.get(PAYLOAD, BinId(1), PacketRecvTimeMode::NoTimestamp);

    c.bench_function("pool_clone_packet", |b| {
        b.iter(|| {
            let cloned = pool.clone_packet(std::hint::black_box(idx), PacketRecvTimeMode::NowTimestamp);
            pool.recycle(cloned);
        });
    });
    pool.recycle(idx);
}

criterion_group!(pool_benches, bench_get_recycle, bench_shallow_copy, bench_clone_packet);
criterion_main!(pool_benches);
