use super::directory::CHAIN_HISTOGRAM_LEN;
use super::*;
use crate::layout::dir_entry::DirEntry;
use crate::test_utils::{GIB, StripeImage, live_entry, read_bytes, sparse_image};

const START: u64 = 16_384;
const BUCKETS: u64 = 1024;

fn image() -> StripeImage {
    let mut img = StripeImage::new(1, BUCKETS);
    // Everything below 64 MiB past the stripe start is live for phase 0.
    img.write_pos = (START + (64 << 20)) as i64;
    img.agg_pos = START as i64;
    img
}

fn check(img: &StripeImage) -> (tempfile::NamedTempFile, directory::DirectoryReport) {
    let tf = sparse_image(GIB);
    img.write(tf.path(), START);
    let dev = Device::open(tf.path(), false).expect("open image");
    let mut stripe = Stripe::new(
        "dir",
        Bytes::new(START as i64),
        CacheStoreBlocks::new(100_000),
    );
    let report = stripe.dir_check(&dev).expect("directory check");
    (tf, report)
}

#[test]
fn empty_directory() {
    let (_tf, report) = check(&image());
    assert_eq!(report.segments.len(), 1);
    let seg = &report.segments[0];
    assert_eq!(seg.in_use, 0);
    assert_eq!(seg.buckets_empty, BUCKETS);
    assert_eq!(seg.free, 0);
    assert!(!seg.repaired);
    assert_eq!(report.chain_histogram()[0], BUCKETS);
}

#[test]
fn classifies_live_and_stale_entries() {
    let mut img = image();
    img.entries = vec![
        (0, 0, live_entry(10, 1, 0)),
        (0, 4, live_entry(20, 2, 5)),
        (0, 5, live_entry(30, 3, 0)),
        // Past the write cursor for its phase.
        (0, 8, live_entry(200_000, 4, 0)),
    ];
    let (_tf, report) = check(&img);
    let seg = &report.segments[0];

    assert_eq!(seg.in_use, 3);
    assert_eq!(seg.stale, 1);
    assert_eq!(seg.heads, 3);
    assert_eq!(seg.buckets_used, 3);
    assert_eq!(seg.buckets_empty, BUCKETS - 3);
    assert_eq!(seg.max_chain, 2);
    assert!((seg.avg_chain() - 4.0 / 3.0).abs() < 1e-9);
    assert_eq!(seg.dup_tags, 0);
    assert_eq!(seg.bytes_in_use, 3 * 512);

    let hist = report.chain_histogram();
    assert_eq!(hist[1], 2);
    assert_eq!(hist[2], 1);
    assert_eq!(hist.iter().sum::<u64>(), BUCKETS);
    assert_eq!(report.size_histogram()[0][0], 3);
}

#[test]
fn out_of_phase_entries_behind_aggregation_are_stale() {
    let mut img = image();
    img.agg_pos = (START + 512 * 100) as i64;
    let mut old = live_entry(50, 1, 0);
    old.set_phase(true);
    let mut fresh = live_entry(150, 2, 0);
    fresh.set_phase(true);
    img.entries = vec![(0, 0, old), (0, 4, fresh)];

    let (_tf, report) = check(&img);
    assert_eq!(report.stale(), 1);
    assert_eq!(report.in_use(), 1);
}

#[test]
fn duplicate_tags_in_a_bucket_are_counted() {
    let mut img = image();
    img.entries = vec![(0, 0, live_entry(10, 9, 1)), (0, 1, live_entry(11, 9, 0))];
    let (_tf, report) = check(&img);
    assert_eq!(report.segments[0].dup_tags, 1);
}

#[test]
fn free_list_is_measured() {
    let mut img = image();
    img.freelist = vec![5];
    let mut a = DirEntry::default();
    a.set_next(6);
    img.entries = vec![(0, 5, a)];
    let (_tf, report) = check(&img);
    assert_eq!(report.free(), 2);
}

#[test]
fn bucket_loop_resets_segment_in_memory() {
    let mut img = image();
    img.entries = vec![
        (0, 0, live_entry(10, 1, 0)),
        (0, 12, live_entry(40, 2, 13)),
        (0, 13, live_entry(41, 3, 12)),
    ];
    let (tf, report) = check(&img);
    let seg = &report.segments[0];

    assert!(seg.repaired);
    assert_eq!(report.repaired_segments(), 1);
    assert_eq!(seg.in_use, 0);
    assert_eq!(seg.buckets_empty, BUCKETS);
    assert_eq!(seg.free, 3 * BUCKETS);
    assert!(report.to_string().contains("repaired"));

    // The device still has the looping chain.
    let at = START + img.header_len() + 12 * 10;
    let raw = read_bytes(tf.path(), at, 10);
    assert_eq!(u16::from_le_bytes([raw[6], raw[7]]), 13);
}

#[test]
fn free_list_loop_resets_segment() {
    let mut img = image();
    img.freelist = vec![5];
    let mut a = DirEntry::default();
    a.set_next(6);
    let mut b = DirEntry::default();
    b.set_next(5);
    img.entries = vec![(0, 0, live_entry(10, 1, 0)), (0, 5, a), (0, 6, b)];

    let (_tf, report) = check(&img);
    let seg = &report.segments[0];
    assert!(seg.repaired);
    assert_eq!(seg.free, 3 * BUCKETS);
    assert_eq!(seg.in_use, 0);
}

#[test]
fn free_list_head_outside_segment_resets_segment() {
    let mut img = image();
    img.freelist = vec![60_000];
    img.entries = vec![(0, 0, live_entry(10, 1, 0))];

    let (_tf, report) = check(&img);
    let seg = &report.segments[0];
    assert!(seg.repaired);
    assert_eq!(seg.bad_links, 1);
    assert_eq!(seg.free, 3 * BUCKETS);
    assert_eq!(seg.in_use, 0);
}

#[test]
fn copy_b_directory_is_read_through_a_mapping() {
    let mut img = image();
    img.serial_a = (9, 8);
    img.entries = vec![(0, 0, live_entry(10, 1, 0))];
    let (_tf, report) = check(&img);

    assert_eq!(report.copy, MetaCopy::B);
    assert_eq!(report.in_use(), 1);
}

#[test]
fn long_chains_share_the_last_histogram_slot() {
    let mut img = image();
    // Bucket 0 chains through 19 entries in rows 1..4 of later buckets.
    let chain: Vec<u64> = (0..20).map(|i| if i == 0 { 0 } else { 4 * i + 1 }).collect();
    img.entries = chain
        .iter()
        .enumerate()
        .map(|(i, &idx)| {
            let next = chain.get(i + 1).copied().unwrap_or(0) as u16;
            (0, idx, live_entry(10 + i as u64, i as u16, next))
        })
        .collect();

    let (_tf, report) = check(&img);
    assert_eq!(report.segments[0].max_chain, 20);
    assert_eq!(report.chain_histogram()[CHAIN_HISTOGRAM_LEN - 1], 1);
}

#[test]
fn torn_stripe_reports_no_directory() {
    let mut img = image();
    img.serial_a = (9, 8);
    img.serial_b = None;
    let tf = sparse_image(GIB);
    img.write(tf.path(), START);
    let dev = Device::open(tf.path(), false).unwrap();
    let mut stripe = Stripe::new("dir", Bytes::new(START as i64), CacheStoreBlocks::new(100_000));

    let zret = stripe.dir_check(&dev).unwrap_err();
    assert!(zret.to_string().contains("sync serial data not valid"));
    assert!(stripe.directory_cache().is_empty());
}
