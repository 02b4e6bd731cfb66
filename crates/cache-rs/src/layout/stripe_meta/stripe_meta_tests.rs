use super::*;

fn sample() -> StripeMeta {
    StripeMeta {
        magic: MAGIC,
        version: Version {
            major: CACHE_DB_MAJOR_VERSION,
            minor: 0,
        },
        create_time: 1_500_000_000,
        write_pos: 0x10_0000,
        last_write_pos: 0x0F_0000,
        agg_pos: 0x10_2000,
        generation: 7,
        phase: 1,
        cycle: 3,
        sync_serial: 42,
        write_serial: 41,
        dirty: 0,
        sector_size: 512,
    }
}

#[test]
fn fixed_offsets_match_layout() {
    let mut buf = [0u8; META_SIZE];
    sample().write_to(&mut buf);
    assert_eq!(&buf[0..4], &MAGIC.to_le_bytes());
    assert_eq!(&buf[4..6], &24u16.to_le_bytes());
    assert_eq!(&buf[16..24], &0x10_0000i64.to_le_bytes());
    assert_eq!(&buf[52..56], &42u32.to_le_bytes());
    assert_eq!(&buf[64..68], &512u32.to_le_bytes());
}

#[test]
fn parse_reads_what_write_stored() {
    let mut buf = vec![0u8; 8192];
    let meta = sample();
    meta.write_to(&mut buf);
    assert_eq!(StripeMeta::parse(&buf), Some(meta));
}

#[test]
fn validity_checks_magic_and_version() {
    let mut meta = sample();
    assert!(meta.is_valid());

    meta.version.minor = 3;
    assert!(!meta.is_valid());

    meta.version = Version {
        major: CACHE_DB_MAJOR_VERSION + 1,
        minor: 0,
    };
    assert!(!meta.is_valid());

    let mut meta = sample();
    meta.magic = 0;
    assert!(!meta.is_valid());
}

#[test]
fn parse_valid_filters_zeroed_blocks() {
    assert!(parse_valid(&[0u8; 8192]).is_none());
    assert!(StripeMeta::parse(&[0u8; META_SIZE - 1]).is_none());
}

#[test]
fn freelist_follows_fixed_fields() {
    let mut buf = vec![0u8; 8192];
    sample().write_to(&mut buf);
    write_freelist(&mut buf, &[3, 0, 0xFFFF]);
    assert_eq!(&buf[72..74], &3u16.to_le_bytes());
    assert_eq!(read_freelist(&buf, 3), vec![3, 0, 0xFFFF]);
    assert_eq!(read_freelist(&buf[..74], 2), vec![3, 0]);
}

#[test]
fn header_len_grows_with_segments() {
    assert_eq!(StripeMeta::header_len(1), 80);
    assert_eq!(StripeMeta::header_len(10), 98);
}
