use super::*;
use crate::errata::CacheError;
use crate::layout::units::CacheStripeBlocks;
use std::io::Write;

fn codes(zret: &crate::errata::Errata) -> Vec<u16> {
    zret.iter().map(CacheError::code).collect()
}

#[test]
fn parses_percent_and_absolute_sizes() {
    let mut cfg = VolumeConfig::default();
    let zret = cfg.parse("# two volumes\n\nvolume=1 size=40%\n  VOLUME=2 Size=256\n");

    assert!(zret.is_empty(), "{zret}");
    assert_eq!(cfg.len(), 2);
    assert_eq!(cfg.volumes[0].idx, 1);
    assert_eq!(cfg.volumes[0].percent, 40);
    assert_eq!(cfg.volumes[1].idx, 2);
    assert_eq!(cfg.volumes[1].percent, 0);
    assert_eq!(cfg.volumes[1].size, CacheStripeBlocks::new(2));
}

#[test]
fn absolute_size_is_rounded_up_with_a_note() {
    let mut cfg = VolumeConfig::default();
    let zret = cfg.parse("volume=3 size=200\n");

    assert!(zret.is_ok());
    assert_eq!(codes(&zret), vec![0]);
    assert_eq!(cfg.volumes[0].size, CacheStripeBlocks::new(2));
}

#[test]
fn bad_lines_are_reported_and_skipped() {
    let mut cfg = VolumeConfig::default();
    let text = "\
volume=1 size=10%
garbage
volume=2 size=abc
volume=3 size=5GB
volume=x size=5%
volume=4 size=1% size=2%
volume=5 volume=6 size=1%
volume=7
size=3%
volume=0 size=1%
";
    let zret = cfg.parse(text);

    assert_eq!(
        codes(&zret),
        vec![1, 7, 8, 2, 7, 3, 7, 4, 8, 5, 6, 7, 8, 4, 8]
    );
    let kept: Vec<u8> = cfg.iter().map(|v| v.idx).collect();
    assert_eq!(kept, vec![1, 4, 5]);
    assert!(zret.to_string().contains("Line 2 is invalid"));
}

#[test]
fn over_committed_percentages_are_flagged() {
    let mut cfg = VolumeConfig::default();
    let zret = cfg.parse("volume=1 size=70%\nvolume=2 size=40%\n");
    assert_eq!(codes(&zret), vec![10]);
    assert_eq!(cfg.len(), 2);
}

#[test]
fn convert_to_absolute_rounds_percentages_up() {
    let mut cfg = VolumeConfig::default();
    cfg.parse("volume=1 size=40%\nvolume=2 size=60%\nvolume=3 size=1024\n");
    cfg.convert_to_absolute(CacheStripeBlocks::new(79));

    let alloc: Vec<i64> = cfg.iter().map(|v| v.alloc.count()).collect();
    assert_eq!(alloc, vec![32, 48, 8]);
}

#[test]
fn volume_index_bounds() {
    assert_eq!(parse_volume_index("1"), Some(1));
    assert_eq!(parse_volume_index("255"), Some(255));
    assert_eq!(parse_volume_index("0"), None);
    assert_eq!(parse_volume_index("256"), None);
    assert_eq!(parse_volume_index("+3"), None);
    assert_eq!(parse_volume_index(""), None);
}

#[test]
fn load_reads_file_and_reports_missing_one() {
    let mut tf = tempfile::NamedTempFile::new().unwrap();
    writeln!(tf, "volume=9 size=100%").unwrap();

    let mut cfg = VolumeConfig::default();
    assert!(cfg.load(tf.path()).is_empty());
    assert_eq!(cfg.volumes[0].percent, 100);

    let mut missing = VolumeConfig::default();
    let zret = missing.load(&tf.path().with_extension("absent"));
    assert!(!zret.is_ok());
    assert!(zret.to_string().contains("Unable to load"));
}
