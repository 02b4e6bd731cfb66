//! Serialized span header and the stripe descriptors that follow it.
//!
//! All integers are little endian. The header has a fixed 32 byte prefix followed by
//! `num_diskvol_blks` descriptors of 24 bytes each:
//!
//! | offset | field              |
//! |--------|--------------------|
//! | 0      | `magic` u32        |
//! | 4      | `num_volumes` u32  |
//! | 8      | `num_free` u32     |
//! | 12     | `num_used` u32     |
//! | 16     | `num_diskvol_blks` u32 |
//! | 24     | `num_blocks` i64 (store blocks) |
//! | 32..   | descriptors        |


use crate::layout::units::{Bytes, CacheStoreBlocks};

/// MAGIC identifies a formatted span.
pub const MAGIC: u32 = 0xABCD_1237;
/// PREFIX_SIZE is the byte size of the fixed header fields.
pub const PREFIX_SIZE: usize = 32;
/// DESCRIPTOR_SIZE is the byte size of one serialized stripe descriptor.
pub const DESCRIPTOR_SIZE: usize = 24;
/// HEADER_BASE_SIZE is the size of a header carrying a single descriptor.
pub const HEADER_BASE_SIZE: usize = PREFIX_SIZE + DESCRIPTOR_SIZE;

/// Location of a stripe inside its span.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StripeDescriptor {
    /// Offset of the stripe from the start of the span.
    pub offset: Bytes,
    pub len: CacheStoreBlocks,
    /// Owning volume when in use.
    pub vol_idx: u32,
    pub stripe_type: u8,
    pub free: bool,
}

impl StripeDescriptor {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..8].copy_from_slice(&self.offset.count().to_le_bytes());
        buf[8..16].copy_from_slice(&self.len.count().to_le_bytes());
        buf[16..20].copy_from_slice(&self.vol_idx.to_le_bytes());
        let bits = u32::from(self.stripe_type & 0x7) | (u32::from(self.free) << 3);
        buf[20..24].copy_from_slice(&bits.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let bits = read_u32(buf, 20);
        Self {
            offset: Bytes::new(read_i64(buf, 0)),
            len: CacheStoreBlocks::new(read_i64(buf, 8)),
            vol_idx: read_u32(buf, 16),
            stripe_type: (bits & 0x7) as u8,
            free: (bits >> 3) & 1 == 1,
        }
    }
}

/// Header stored at the start of every formatted span.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SpanHeader {
    pub magic: u32,
    /// Number of distinct volumes with stripes on the span.
    pub num_volumes: u32,
    pub num_free: u32,
    pub num_used: u32,
    pub num_diskvol_blks: u32,
    pub num_blocks: CacheStoreBlocks,
    pub stripes: Vec<StripeDescriptor>,
}

impl SpanHeader {
    /// `serialized_len` is the byte length of a header with `n` descriptors.
    ///
    /// The on-disk record always carries room for at least one descriptor.
    #[must_use]
    pub const fn serialized_len(n: usize) -> usize {
        let n = if n == 0 { 1 } else { n };
        PREFIX_SIZE + n * DESCRIPTOR_SIZE
    }

    /// `size_for` is the number of store blocks a header with `n` descriptors occupies.
    #[must_use]
    pub fn size_for(n: usize) -> CacheStoreBlocks {
        CacheStoreBlocks::round_up(Bytes::new(Self::serialized_len(n) as i64))
    }

    /// `descriptor_count` reads the fixed prefix and reports whether it describes a valid header.
    ///
    /// # Returns
    /// The descriptor count if the magic and the used/free invariant hold.
    #[must_use]
    pub fn descriptor_count(buf: &[u8]) -> Option<usize> {
        if buf.len() < PREFIX_SIZE {
            return None;
        }
        let magic = read_u32(buf, 0);
        let num_free = read_u32(buf, 8);
        let num_used = read_u32(buf, 12);
        let num_diskvol_blks = read_u32(buf, 16);
        if magic != MAGIC || Some(num_diskvol_blks) != num_used.checked_add(num_free) {
            return None;
        }
        usize::try_from(num_diskvol_blks).ok()
    }

    /// `parse` decodes a full header, descriptors included.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let n = Self::descriptor_count(buf)?;
        if buf.len() < PREFIX_SIZE + n * DESCRIPTOR_SIZE {
            return None;
        }
        let stripes = buf[PREFIX_SIZE..PREFIX_SIZE + n * DESCRIPTOR_SIZE]
            .chunks_exact(DESCRIPTOR_SIZE)
            .map(|raw| {
                let mut d = [0u8; DESCRIPTOR_SIZE];
                d.copy_from_slice(raw);
                StripeDescriptor::from_bytes(&d)
            })
            .collect();
        Some(Self {
            magic: read_u32(buf, 0),
            num_volumes: read_u32(buf, 4),
            num_free: read_u32(buf, 8),
            num_used: read_u32(buf, 12),
            num_diskvol_blks: read_u32(buf, 16),
            num_blocks: CacheStoreBlocks::new(read_i64(buf, 24)),
            stripes,
        })
    }

    /// `to_bytes` serializes the header padded to whole store blocks.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = Self::size_for(self.stripes.len());
        let mut buf = vec![0u8; usize::try_from(size.bytes()).unwrap_or(0)];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_volumes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_free.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_used.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_diskvol_blks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.num_blocks.count().to_le_bytes());
        for (i, d) in self.stripes.iter().enumerate() {
            let at = PREFIX_SIZE + i * DESCRIPTOR_SIZE;
            buf[at..at + DESCRIPTOR_SIZE].copy_from_slice(&d.to_bytes());
        }
        buf
    }
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

pub(crate) fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(b)
}
