use iron_core::udp_proxy::{FecDecoder, FecEncoder, ReceiverReportMessage};
use std::time::{Duration, Instant};

#[test]
fn survives_a_single_lost_shard_per_block() {
    let k = 4;
    let n = 6;
    let mut enc = FecEncoder::new(k, n, 32, Duration::from_millis(50));
    let mut dec = FecDecoder::new(k, n, Duration::from_millis(100), false);
    let mut rrm = ReceiverReportMessage::default();

    let now = Instant::now();
    let payloads: Vec<Vec<u8>> = (0..k).map(|i| vec![i as u8; 20]).collect();
    let mut block = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        if let Some(b) = enc.push(payload, now) {
            assert_eq!(i, k - 1);
            block = b;
        }
    }
    assert_eq!(block.len(), n);

    // Drop one original shard; the block should still reconstruct from the
    // remaining originals plus repair shards.
    let mut released = Vec::new();
    for pkt in block.iter().filter(|p| p.trailer.slot_id != 0) {
        released = dec.receive(&pkt.bytes, now);
        if !released.is_empty() {
            break;
        }
    }
    assert_eq!(released.len(), k);
    rrm.record_reconstructed();

    let mut by_slot: Vec<_> = released.into_iter().collect();
    by_slot.sort_by_key(|r| r.slot_id);
    for (slot, expected) in by_slot.iter().zip(payloads.iter()) {
        assert!(slot.payload.starts_with(expected));
    }
    assert_eq!(rrm.loss_fraction(), 0.0);
}

#[test]
fn reorder_timeout_partially_releases_an_incomplete_block() {
    let k = 3;
    let n = 5;
    let mut enc = FecEncoder::new(k, n, 16, Duration::from_millis(50));
    let mut dec = FecDecoder::new(k, n, Duration::from_millis(10), false);
    let mut rrm = ReceiverReportMessage::default();

    let now = Instant::now();
    enc.push(b"aaaaaaaa", now);
    enc.push(b"bbbbbbbb", now);
    let block = enc.push(b"cccccccc", now).expect("third original completes block");

    // Only the first shard ever arrives.
    assert!(dec.receive(&block[0].bytes, now).is_empty());
    let released = dec.reap(now + Duration::from_millis(20));
    assert_eq!(released.len(), 1);
    rrm.record_partial();
    assert!(rrm.loss_fraction() > 0.0);
}
