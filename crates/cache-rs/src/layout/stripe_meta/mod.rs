//! Stripe metadata record, written as a head and a foot around each directory copy.

#[cfg(test)]
mod stripe_meta_tests;

use crate::layout::span_header::{read_i64, read_u32};

/// MAGIC identifies a stripe metadata record.
pub const MAGIC: u32 = 0xF1D0_F00D;
/// CACHE_DB_MAJOR_VERSION is the newest directory format understood.
pub const CACHE_DB_MAJOR_VERSION: u16 = 24;
/// CACHE_DB_MINOR_VERSION_MAX is the newest minor version accepted.
pub const CACHE_DB_MINOR_VERSION_MAX: u16 = 2;
/// META_SIZE is the byte size of the fixed record, one free-list slot included.
pub const META_SIZE: usize = 80;
/// FREELIST_OFFSET is where the per-segment free-list heads start.
pub const FREELIST_OFFSET: usize = 72;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

/// Fixed part of a stripe metadata copy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StripeMeta {
    pub magic: u32,
    pub version: Version,
    pub create_time: i64,
    pub write_pos: i64,
    pub last_write_pos: i64,
    pub agg_pos: i64,
    /// Token generation, never zero on a live stripe.
    pub generation: u32,
    pub phase: u32,
    pub cycle: u32,
    pub sync_serial: u32,
    pub write_serial: u32,
    pub dirty: u32,
    pub sector_size: u32,
}

impl StripeMeta {
    /// `parse` decodes the fixed fields. It does not validate.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < META_SIZE {
            return None;
        }
        let mut v = [0u8; 2];
        v.copy_from_slice(&buf[4..6]);
        let major = u16::from_le_bytes(v);
        v.copy_from_slice(&buf[6..8]);
        let minor = u16::from_le_bytes(v);
        Some(Self {
            magic: read_u32(buf, 0),
            version: Version { major, minor },
            create_time: read_i64(buf, 8),
            write_pos: read_i64(buf, 16),
            last_write_pos: read_i64(buf, 24),
            agg_pos: read_i64(buf, 32),
            generation: read_u32(buf, 40),
            phase: read_u32(buf, 44),
            cycle: read_u32(buf, 48),
            sync_serial: read_u32(buf, 52),
            write_serial: read_u32(buf, 56),
            dirty: read_u32(buf, 60),
            sector_size: read_u32(buf, 64),
        })
    }

    /// `write_to` encodes the fixed fields into the first [`META_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`META_SIZE`].
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= META_SIZE, "buffer too small for stripe meta");
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.major.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version.minor.to_le_bytes());
        buf[8..16].copy_from_slice(&self.create_time.to_le_bytes());
        buf[16..24].copy_from_slice(&self.write_pos.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_write_pos.to_le_bytes());
        buf[32..40].copy_from_slice(&self.agg_pos.to_le_bytes());
        buf[40..44].copy_from_slice(&self.generation.to_le_bytes());
        buf[44..48].copy_from_slice(&self.phase.to_le_bytes());
        buf[48..52].copy_from_slice(&self.cycle.to_le_bytes());
        buf[52..56].copy_from_slice(&self.sync_serial.to_le_bytes());
        buf[56..60].copy_from_slice(&self.write_serial.to_le_bytes());
        buf[60..64].copy_from_slice(&self.dirty.to_le_bytes());
        buf[64..68].copy_from_slice(&self.sector_size.to_le_bytes());
        buf[68..72].fill(0);
    }

    /// `is_valid` checks the magic and the supported version range.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && self.version.major <= CACHE_DB_MAJOR_VERSION
            && self.version.minor <= CACHE_DB_MINOR_VERSION_MAX
    }

    /// `header_len` is the byte length of the record with `segments` free-list heads.
    #[must_use]
    pub const fn header_len(segments: u64) -> u64 {
        let extra = if segments == 0 { 0 } else { segments - 1 };
        META_SIZE as u64 + 2 * extra
    }
}

/// `parse_valid` decodes `buf` and keeps it only if it is a valid record.
#[must_use]
pub fn parse_valid(buf: &[u8]) -> Option<StripeMeta> {
    StripeMeta::parse(buf).filter(StripeMeta::is_valid)
}

/// `read_freelist` copies `segments` free-list heads trailing a head record.
#[must_use]
pub fn read_freelist(buf: &[u8], segments: usize) -> Vec<u16> {
    (0..segments)
        .map(|s| {
            let at = FREELIST_OFFSET + 2 * s;
            buf.get(at..at + 2)
                .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
        })
        .collect()
}

/// `write_freelist` stores free-list heads after the fixed fields of `buf`.
///
/// # Panics
/// Panics if `buf` cannot hold every head.
pub fn write_freelist(buf: &mut [u8], freelist: &[u16]) {
    for (s, head) in freelist.iter().enumerate() {
        let at = FREELIST_OFFSET + 2 * s;
        buf[at..at + 2].copy_from_slice(&head.to_le_bytes());
    }
}
