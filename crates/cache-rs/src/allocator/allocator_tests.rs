use super::*;
use crate::layout::units::{CacheStoreBlocks, Gigabytes};
use crate::retention::span::Span;
use crate::test_utils::GIB;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Sparse span images plus a span list and a volume config naming them.
struct Setup {
    _dir: TempDir,
    images: Vec<PathBuf>,
    span_list: PathBuf,
    volume_file: PathBuf,
}

fn setup(sizes: &[u64], volumes: &str) -> Setup {
    let dir = TempDir::new().unwrap();
    let mut list = String::from("# test spans\n");
    let images: Vec<PathBuf> = sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let p = dir.path().join(format!("span-{i}.img"));
            fs::File::create(&p).unwrap().set_len(len).unwrap();
            list.push_str(&format!("{}\n", p.display()));
            p
        })
        .collect();
    let span_list = dir.path().join("storage.config");
    fs::write(&span_list, list).unwrap();
    let volume_file = dir.path().join("volume.config");
    fs::write(&volume_file, volumes).unwrap();
    Setup {
        _dir: dir,
        images,
        span_list,
        volume_file,
    }
}

fn loaded(s: &Setup, config: ToolConfig) -> VolumeAllocator {
    let mut va = VolumeAllocator::new(config);
    let zret = va
        .load(Some(&s.span_list), Some(&s.volume_file))
        .expect("allocator loads");
    assert!(zret.is_ok(), "{zret}");
    va
}

#[test]
fn missing_inputs_are_reported_together() {
    let mut va = VolumeAllocator::new(ToolConfig::read_only());
    let zret = va.load(None, None).unwrap_err();
    assert!(!zret.is_ok());
    assert_eq!(zret.len(), 2);
    let text = zret.to_string();
    assert!(text.contains("Volume config file not set"));
    assert!(text.contains("Span file not set"));
}

#[test]
fn unreadable_span_is_skipped_and_the_rest_allocated() {
    let s = setup(&[4 * GIB], "volume=1 size=100%\n");
    let missing = s._dir.path().join("missing.img");
    let list = fs::read_to_string(&s.span_list).unwrap();
    fs::write(&s.span_list, format!("{}\n{list}", missing.display())).unwrap();

    let mut va = VolumeAllocator::new(ToolConfig::read_only());
    let zret = va
        .load(Some(&s.span_list), Some(&s.volume_file))
        .expect("good span still loads");
    assert!(!zret.is_ok());
    assert!(zret.iter().any(|e| matches!(e, CacheError::Io { .. })));
    assert_eq!(va.cache().spans.len(), 1);

    assert!(va.fill_all_spans().is_ok());
    let span = &va.cache().spans[0];
    assert_eq!(span.path, s.images[0]);
    assert_eq!(span.stripes[0].vol_idx, 1);
    assert!(va.allocated()[0].1.count() > 0);
}

#[test]
fn span_list_without_a_loadable_span_is_an_error() {
    let s = setup(&[], "volume=1 size=100%\n");
    let missing = s._dir.path().join("missing.img");
    fs::write(&s.span_list, format!("{}\n", missing.display())).unwrap();

    let mut va = VolumeAllocator::new(ToolConfig::read_only());
    let zret = va
        .load(Some(&s.span_list), Some(&s.volume_file))
        .unwrap_err();
    assert!(zret.iter().any(|e| matches!(e, CacheError::Io { .. })));
    assert!(va.cache().spans.is_empty());
}

#[test]
fn forty_sixty_split_of_a_blank_span() {
    let s = setup(&[10 * GIB], "volume=1 size=40%\nvolume=2 size=60%\n");
    let mut va = loaded(&s, ToolConfig::read_only());

    let targets: Vec<i64> = va.volume_config().iter().map(|v| v.alloc.count()).collect();
    assert_eq!(targets, vec![32, 48]);

    let zret = va.fill_all_spans();
    assert!(zret.is_ok(), "{zret}");

    let span = &va.cache().spans[0];
    assert_eq!(span.stripes.len(), 2);
    let unit = CacheStoreBlocks::round_up(CacheStripeBlocks::new(1)).count();
    let four = CacheStoreBlocks::round_up(Gigabytes::new(4)).count();
    let six = CacheStoreBlocks::round_up(Gigabytes::new(6)).count();
    assert_eq!(span.stripes[0].vol_idx, 1);
    assert_eq!(span.stripes[1].vol_idx, 2);
    assert!((span.stripes[0].len.count() - four).abs() <= unit);
    assert!((span.stripes[1].len.count() - six).abs() <= unit);

    let header = span.header.as_ref().expect("header rebuilt");
    assert_eq!(header.num_used, 2);
    assert_eq!(header.num_free, 0);
    assert_eq!(header.num_volumes, 2);

    assert_eq!(
        va.allocated(),
        vec![(1, CacheStripeBlocks::new(32)), (2, CacheStripeBlocks::new(47))]
    );
    assert!(va.dump_volumes().contains("Volume 2 has 1 stripes"));
}

#[test]
fn read_only_run_leaves_device_untouched() {
    let s = setup(&[2 * GIB], "volume=1 size=100%\n");
    let mut va = loaded(&s, ToolConfig::read_only());
    assert!(va.fill_all_spans().is_ok());

    let reloaded = Span::load(&s.images[0], ToolConfig::read_only()).unwrap();
    assert!(reloaded.header.is_none());
}

#[test]
fn written_allocation_survives_reload() {
    let s = setup(&[10 * GIB], "volume=1 size=40%\nvolume=2 size=60%\n");
    let mut va = loaded(&s, ToolConfig::writable());
    assert!(va.fill_all_spans().is_ok());
    let before: Vec<_> = va.cache().spans[0]
        .stripes
        .iter()
        .map(|st| (st.start, st.len, st.vol_idx))
        .collect();
    drop(va);

    let va = loaded(&s, ToolConfig::read_only());
    let after: Vec<_> = va.cache().spans[0]
        .stripes
        .iter()
        .map(|st| (st.start, st.len, st.vol_idx))
        .collect();
    assert_eq!(before, after);
    assert_eq!(va.cache().volumes.len(), 2);
    assert_eq!(
        va.allocated(),
        vec![(1, CacheStripeBlocks::new(32)), (2, CacheStripeBlocks::new(47))]
    );
}

#[test]
fn fill_empty_spans_skips_allocated_ones() {
    let s = setup(&[GIB, GIB], "volume=1 size=50%\nvolume=2 size=50%\n");
    {
        let mut span = Span::load(&s.images[0], ToolConfig::writable()).unwrap();
        span.clear();
        span.alloc_stripe(1, CacheStripeBlocks::new(4)).unwrap();
        span.update_header().unwrap();
    }

    let mut va = loaded(&s, ToolConfig::read_only());
    assert_eq!(va.allocated()[0], (1, CacheStripeBlocks::new(4)));
    assert!(va.fill_empty_spans().is_ok());

    let spans = &va.cache().spans;
    assert_eq!(spans[0].stripes.len(), 2);
    assert!(spans[0].stripes[1].is_free());
    let second: Vec<u8> = spans[1].stripes.iter().map(|st| st.vol_idx).collect();
    assert_eq!(second, vec![2, 1]);
    assert_eq!(va.cache().volumes[&1].stripes.len(), 2);
    assert_eq!(va.cache().volumes[&2].stripes.len(), 1);
}

#[test]
fn volume_refs_follow_stripe_splits() {
    let s = setup(&[4 * GIB], "volume=1 size=50%\nvolume=2 size=50%\n");
    let mut va = loaded(&s, ToolConfig::read_only());
    assert!(va.fill_all_spans().is_ok());

    let cache = va.cache();
    for (idx, vol) in &cache.volumes {
        for r in &vol.stripes {
            assert_eq!(cache.stripe(*r).unwrap().vol_idx, *idx);
        }
    }
}

#[test]
fn random_configs_never_overshoot_or_lose_space() {
    let mut rng = rand::rng();
    for _ in 0..8 {
        let sizes: Vec<u64> = (0..rng.random_range(1..=3))
            .map(|_| rng.random_range(1..=6) * GIB)
            .collect();
        let mut left = 100;
        let mut text = String::new();
        for idx in 1..=rng.random_range(1..=4u32) {
            if left == 0 {
                break;
            }
            let pct = rng.random_range(1..=left);
            left -= pct;
            text.push_str(&format!("volume={idx} size={pct}%\n"));
        }
        let s = setup(&sizes, &text);
        let mut va = loaded(&s, ToolConfig::read_only());
        let free_before = va.cache().free_space();
        let zret = va.fill_all_spans();
        assert!(zret.is_ok(), "{text}: {zret}");

        for (spec, (idx, size)) in va.volume_config().iter().zip(va.allocated()) {
            assert_eq!(spec.idx, idx);
            assert!(size <= spec.alloc, "{text}: volume {idx} got {size}");
        }

        let cache = va.cache();
        let in_volumes: CacheStoreBlocks = cache.volumes.values().map(|v| v.size).sum();
        assert_eq!(in_volumes + cache.free_space(), free_before, "{text}");
        for span in &cache.spans {
            let covered: CacheStoreBlocks = span.stripes.iter().map(|st| st.len).sum();
            assert_eq!(span.offset + covered, span.len);
            for pair in span.stripes.windows(2) {
                assert_eq!(pair[0].end(), pair[1].start);
            }
        }
    }
}
