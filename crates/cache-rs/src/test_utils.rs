//! Synthetic span and stripe images for tests.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::layout::dir_entry::{DIR_DEPTH, DirEntry, SIZEOF_DIR};
use crate::layout::stripe_meta::{self, StripeMeta, Version};
use crate::retention::stripe::{STORE_BLOCK, round_to_store_block};

pub const GIB: u64 = 1 << 30;

/// A sparse image file of `len` bytes.
pub fn sparse_image(len: u64) -> NamedTempFile {
    let tf = NamedTempFile::new().expect("tmp image");
    tf.as_file().set_len(len).expect("size image");
    tf
}

pub fn write_bytes(path: &Path, off: u64, data: &[u8]) {
    let f = OpenOptions::new().write(true).open(path).expect("open image");
    f.write_all_at(data, off).expect("write image");
}

pub fn read_bytes(path: &Path, off: u64, len: usize) -> Vec<u8> {
    let f = OpenOptions::new().read(true).open(path).expect("open image");
    let mut buf = vec![0u8; len];
    f.read_exact_at(&mut buf, off).expect("read image");
    buf
}

/// Layout of a stripe written by [`StripeImage::write`].
pub struct StripeImage {
    pub segments: u64,
    pub buckets: u64,
    /// Head and foot sync serials of copy A.
    pub serial_a: (u32, u32),
    /// Head and foot sync serials of copy B, or nothing written for B.
    pub serial_b: Option<(u32, u32)>,
    pub phase: u32,
    pub write_pos: i64,
    pub agg_pos: i64,
    pub version: Version,
    /// `(segment, index, entry)` written into both copies.
    pub entries: Vec<(u64, u64, DirEntry)>,
    pub freelist: Vec<u16>,
}

impl StripeImage {
    pub fn new(segments: u64, buckets: u64) -> Self {
        Self {
            segments,
            buckets,
            serial_a: (7, 7),
            serial_b: Some((6, 6)),
            phase: 0,
            write_pos: 0,
            agg_pos: 0,
            version: Version {
                major: stripe_meta::CACHE_DB_MAJOR_VERSION,
                minor: 0,
            },
            entries: Vec::new(),
            freelist: vec![0; segments as usize],
        }
    }

    pub fn header_len(&self) -> u64 {
        round_to_store_block(StripeMeta::header_len(self.segments))
    }

    pub fn dir_bytes(&self) -> u64 {
        self.segments * self.buckets * DIR_DEPTH as u64 * SIZEOF_DIR as u64
    }

    /// Distance from a copy's head to its foot.
    pub fn delta(&self) -> u64 {
        self.header_len() + round_to_store_block(self.dir_bytes())
    }

    /// Offset of copy B's head relative to the stripe start.
    pub fn copy_b_offset(&self) -> u64 {
        self.delta() + STORE_BLOCK as u64
    }

    fn meta(&self, serial: u32) -> StripeMeta {
        StripeMeta {
            magic: stripe_meta::MAGIC,
            version: self.version,
            create_time: 1_700_000_000,
            write_pos: self.write_pos,
            last_write_pos: self.write_pos,
            agg_pos: self.agg_pos,
            generation: 1,
            phase: self.phase,
            cycle: 0,
            sync_serial: serial,
            write_serial: serial,
            dirty: 0,
            sector_size: 512,
        }
    }

    fn write_copy(&self, path: &Path, head_pos: u64, serials: (u32, u32)) {
        let mut head = vec![0u8; self.header_len() as usize];
        self.meta(serials.0).write_to(&mut head);
        stripe_meta::write_freelist(&mut head, &self.freelist);
        write_bytes(path, head_pos, &head);

        let dir_pos = head_pos + self.header_len();
        let per_segment = self.buckets * DIR_DEPTH as u64;
        for (seg, idx, e) in &self.entries {
            let at = dir_pos + (seg * per_segment + idx) * SIZEOF_DIR as u64;
            write_bytes(path, at, &e.to_bytes());
        }

        let mut foot = vec![0u8; STORE_BLOCK];
        self.meta(serials.1).write_to(&mut foot);
        write_bytes(path, head_pos + self.delta(), &foot);
    }

    /// Write both copies for a stripe starting at byte `start` of the image.
    pub fn write(&self, path: &Path, start: u64) {
        self.write_copy(path, start, self.serial_a);
        if let Some(serials) = self.serial_b {
            self.write_copy(path, start + self.copy_b_offset(), serials);
        }
    }
}

/// An in-use entry with the given chain link.
pub fn live_entry(offset: u64, tag: u16, next: u16) -> DirEntry {
    let mut e = DirEntry::default();
    e.set_offset(offset);
    e.set_tag(tag);
    e.set_head(true);
    e.set_next(next);
    e
}
