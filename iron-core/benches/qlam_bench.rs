//! Micro benchmarks for QLAM wire encode/decode. Pure CPU, no network, no IO.
//!
//! ```bash
//! cargo bench --bench qlam_bench
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use iron_core::queue::{decode_qlam, encode_qlam, Qlam, QlamGroup};

fn sample_qlam(entries: usize) -> Qlam {
    Qlam {
        src_bin_id: 1,
        sequence: 42,
        groups: vec![QlamGroup {
            group_id: 0,
            entries: (0..entries).map(|i| (i as u8, i as u32 * 97, i as u32 * 11)).collect(),
        }],
    }
}

fn bench_encode(c: &mut Criterion) {
    let qlam = sample_qlam(32);
    c.bench_function("qlam_encode_32_entries", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            encode_qlam(std::hint::black_box(&qlam), &mut out);
            out
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let qlam = sample_qlam(32);
    let mut buf = Vec::new();
    encode_qlam(&qlam, &mut buf);

    c.bench_function("qlam_decode_32_entries", |b| {
        b.iter(|| decode_qlam(std::hint::black_box(&buf)));
    });
}

fn bench_roundtrip(c: &mut Criterion) {
    let qlam = sample_qlam(8);
    c.bench_function("qlam_roundtrip_8_entries", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            encode_qlam(std::hint::black_box(&qlam), &mut buf);
            decode_qlam(&buf)
        });
    });
}

criterion_group!(qlam_benches, bench_encode, bench_decode, bench_roundtrip);
criterion_main!(qlam_benches);
