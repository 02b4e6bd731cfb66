//! Packed 10 byte directory entry.
//!
//! The entry is five little-endian `u16` words:
//!
//! ```text
//! w0  offset bits 0..16
//! w1  offset bits 16..24 (0..8) | big (8..10) | size (10..16)
//! w2  tag (0..12) | phase (12) | head (13) | pinned (14) | token (15)
//! w3  next entry index within the segment
//! w4  offset bits 24..40
//! ```
//!
//! Entries on a segment free list reuse `w2` as the back link.


/// SIZEOF_DIR is the on-disk size of an entry.
pub const SIZEOF_DIR: usize = 10;
/// DIR_DEPTH is the number of entries in a bucket.
pub const DIR_DEPTH: usize = 4;
pub const DIR_TAG_WIDTH: u32 = 12;
pub const DIR_SIZE_WIDTH: u32 = 6;
/// DIR_BLOCK_SIZES is the number of distinct `big` values.
pub const DIR_BLOCK_SIZES: usize = 4;
/// MAX_ENTRIES_PER_SEGMENT is bounded by the 16 bit `next` link.
pub const MAX_ENTRIES_PER_SEGMENT: usize = 1 << 16;
/// MAX_BUCKETS_PER_SEGMENT caps how many buckets share one free list.
pub const MAX_BUCKETS_PER_SEGMENT: usize = MAX_ENTRIES_PER_SEGMENT / DIR_DEPTH;
pub const CACHE_BLOCK_SHIFT: u32 = 9;
/// CACHE_BLOCK_SIZE is the smallest sector size, the unit of entry offsets.
pub const CACHE_BLOCK_SIZE: u64 = 1 << CACHE_BLOCK_SHIFT;

const TAG_MASK: u16 = (1 << DIR_TAG_WIDTH) - 1;

#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, Debug)]
pub struct DirEntry {
    pub w: [u16; 5],
}

impl DirEntry {
    #[must_use]
    pub const fn from_bytes(buf: &[u8; SIZEOF_DIR]) -> Self {
        let mut w = [0u16; 5];
        let mut i = 0;
        while i < 5 {
            w[i] = u16::from_le_bytes([buf[2 * i], buf[2 * i + 1]]);
            i += 1;
        }
        Self { w }
    }

    #[must_use]
    pub const fn to_bytes(&self) -> [u8; SIZEOF_DIR] {
        let mut buf = [0u8; SIZEOF_DIR];
        let mut i = 0;
        while i < 5 {
            let b = self.w[i].to_le_bytes();
            buf[2 * i] = b[0];
            buf[2 * i + 1] = b[1];
            i += 1;
        }
        buf
    }

    /// `offset` is the content location in cache blocks, 1-based; 0 means empty.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.w[0] as u64) | (((self.w[1] & 0xFF) as u64) << 16) | ((self.w[4] as u64) << 24)
    }

    pub const fn set_offset(&mut self, offset: u64) {
        self.w[0] = offset as u16;
        self.w[1] = (((offset >> 16) & 0xFF) as u16) | (self.w[1] & 0xFF00);
        self.w[4] = (offset >> 24) as u16;
    }

    #[must_use]
    pub const fn big(&self) -> u32 {
        ((self.w[1] >> 8) & 0x3) as u32
    }

    pub const fn set_big(&mut self, big: u32) {
        self.w[1] = (self.w[1] & !0x0300) | (((big & 0x3) as u16) << 8);
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        (self.w[1] >> 10) as u32
    }

    pub const fn set_size(&mut self, size: u32) {
        self.w[1] = (self.w[1] & 0x03FF) | (((size & 0x3F) as u16) << 10);
    }

    /// `approx_size` is the upper bound in bytes of the content described by the entry.
    #[must_use]
    pub const fn approx_size(&self) -> u64 {
        (self.size() as u64 + 1) * (CACHE_BLOCK_SIZE << (3 * self.big()))
    }

    #[must_use]
    pub const fn tag(&self) -> u16 {
        self.w[2] & TAG_MASK
    }

    pub const fn set_tag(&mut self, tag: u16) {
        self.w[2] = (self.w[2] & !TAG_MASK) | (tag & TAG_MASK);
    }

    #[must_use]
    pub const fn phase(&self) -> bool {
        self.bit(12)
    }

    pub const fn set_phase(&mut self, v: bool) {
        self.set_bit(12, v);
    }

    #[must_use]
    pub const fn head(&self) -> bool {
        self.bit(13)
    }

    pub const fn set_head(&mut self, v: bool) {
        self.set_bit(13, v);
    }

    #[must_use]
    pub const fn pinned(&self) -> bool {
        self.bit(14)
    }

    pub const fn set_pinned(&mut self, v: bool) {
        self.set_bit(14, v);
    }

    #[must_use]
    pub const fn token(&self) -> bool {
        self.bit(15)
    }

    pub const fn set_token(&mut self, v: bool) {
        self.set_bit(15, v);
    }

    /// `next` is the index of the following entry in the segment, 0 ends the chain.
    #[must_use]
    pub const fn next(&self) -> u16 {
        self.w[3]
    }

    pub const fn set_next(&mut self, next: u16) {
        self.w[3] = next;
    }

    /// Free-list back link, shares storage with the tag word.
    pub const fn set_prev(&mut self, prev: u16) {
        self.w[2] = prev;
    }

    const fn bit(&self, b: u32) -> bool {
        (self.w[2] >> b) & 1 == 1
    }

    const fn set_bit(&mut self, b: u32, v: bool) {
        let m = 1u16 << b;
        if v {
            self.w[2] |= m;
        } else {
            self.w[2] &= !m;
        }
    }
}
