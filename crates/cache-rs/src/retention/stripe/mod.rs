//! A stripe: one contiguous region of a span and the metadata that describes it.

pub mod directory;
#[cfg(test)]
mod directory_tests;

use tracing::debug;

use crate::errata::{CacheError, Errata};
use crate::layout::dir_entry::{DIR_DEPTH, MAX_BUCKETS_PER_SEGMENT, SIZEOF_DIR};
use crate::layout::stripe_meta::{self, META_SIZE, StripeMeta, Version};
use crate::layout::units::{Bytes, CacheStoreBlocks};
use crate::retention::device::Device;

/// STORE_BLOCK is the byte size of one store block, the alignment of every meta copy.
pub const STORE_BLOCK: usize = CacheStoreBlocks::SCALE as usize;
/// META_CHUNK_SIZE is the bulk read size used while searching for a footer. It is a
/// multiple of both the store block and the entry size so neither straddles a read.
pub const META_CHUNK_SIZE: usize = (1 << 8) * STORE_BLOCK * SIZEOF_DIR;

/// Which redundant metadata copy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MetaCopy {
    A = 0,
    B = 1,
}

const HEAD: usize = 0;
const FOOT: usize = 1;

/// Bytes read while searching for the footer, kept for the directory check.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    start: u64,
    data: Vec<u8>,
}

impl DirectoryCache {
    fn reset(&mut self, start: u64) {
        self.start = start;
        self.data.clear();
    }

    fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Drop the retained bytes.
    pub fn clear(&mut self) {
        self.data = Vec::new();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `slice` returns the cached bytes for `[off, off + len)` if fully retained.
    #[must_use]
    pub fn slice(&self, off: u64, len: usize) -> Option<&[u8]> {
        let rel = usize::try_from(off.checked_sub(self.start)?).ok()?;
        self.data.get(rel..rel.checked_add(len)?)
    }
}

pub struct Stripe {
    /// Offset of the first byte of the stripe within the span.
    pub start: Bytes,
    pub len: CacheStoreBlocks,
    /// Owning volume, 0 when free.
    pub vol_idx: u8,
    pub stripe_type: u8,
    /// Position in the span header, if the stripe came from one.
    pub idx: Option<usize>,
    seed: String,
    hash_id: [u8; 16],
    hash_text: String,
    /// Buckets per segment.
    pub buckets: u64,
    pub segments: u64,
    meta: [[Option<StripeMeta>; 2]; 2],
    meta_pos: [[u64; 2]; 2],
    live: Option<MetaCopy>,
    freelist: Vec<u16>,
    directory: DirectoryCache,
}

impl Stripe {
    /// Build a stripe whose identifier is derived from `seed` (span path or id) and its extent.
    #[must_use]
    pub fn new(seed: &str, start: Bytes, len: CacheStoreBlocks) -> Self {
        let mut stripe = Self {
            start,
            len,
            vol_idx: 0,
            stripe_type: 0,
            idx: None,
            seed: seed.to_owned(),
            hash_id: [0; 16],
            hash_text: String::new(),
            buckets: 0,
            segments: 0,
            meta: Default::default(),
            meta_pos: [[0; 2]; 2],
            live: None,
            freelist: Vec::new(),
            directory: DirectoryCache::default(),
        };
        stripe.rehash();
        stripe
    }

    fn rehash(&mut self) {
        self.hash_text = format!("{} {}:{}", self.seed, self.start.count(), self.len.count());
        self.hash_id = md5::compute(self.hash_text.as_bytes()).0;
        debug!(text = %self.hash_text, "stripe hash id");
    }

    /// Move or shrink the stripe, refreshing its identifier.
    pub fn resize(&mut self, start: Bytes, len: CacheStoreBlocks) {
        self.start = start;
        self.len = len;
        self.rehash();
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.vol_idx == 0
    }

    #[must_use]
    pub const fn hash_id(&self) -> &[u8; 16] {
        &self.hash_id
    }

    /// `hash_text` is the string the identifier was computed from.
    #[must_use]
    pub fn hash_text(&self) -> &str {
        &self.hash_text
    }

    /// `end` is the first byte past the stripe.
    #[must_use]
    pub const fn end(&self) -> Bytes {
        Bytes::new(self.start.count() + self.len.bytes())
    }

    #[must_use]
    pub fn meta(&self, copy: MetaCopy, foot: bool) -> Option<&StripeMeta> {
        self.meta[copy as usize][usize::from(foot)].as_ref()
    }

    #[must_use]
    pub fn meta_pos(&self, copy: MetaCopy, foot: bool) -> u64 {
        self.meta_pos[copy as usize][usize::from(foot)]
    }

    /// The copy selected by the last successful [`Self::load_meta`].
    #[must_use]
    pub const fn live_copy(&self) -> Option<MetaCopy> {
        self.live
    }

    #[must_use]
    pub fn freelist(&self) -> &[u16] {
        &self.freelist
    }

    #[must_use]
    pub const fn directory_cache(&self) -> &DirectoryCache {
        &self.directory
    }

    /// Drop the directory bytes retained by the last metadata load.
    pub fn release_directory(&mut self) {
        self.directory.clear();
    }

    /// Total directory entries described by the derived geometry.
    #[must_use]
    pub const fn entries(&self) -> u64 {
        self.buckets * self.segments * DIR_DEPTH as u64
    }

    /// Byte length of the stripe meta head including the free list, rounded to store blocks.
    #[must_use]
    pub fn dir_header_len(&self) -> u64 {
        round_to_store_block(StripeMeta::header_len(self.segments))
    }

    /// Byte length of the directory entries of one copy.
    #[must_use]
    pub const fn dir_bytes(&self) -> u64 {
        self.entries() * SIZEOF_DIR as u64
    }

    fn reset_meta(&mut self) {
        self.meta = Default::default();
        self.meta_pos = [[0; 2]; 2];
        self.live = None;
        self.buckets = 0;
        self.segments = 0;
        self.freelist.clear();
        self.directory.clear();
    }

    /// Locate the A/B metadata copies, pick the authoritative one and derive the directory
    /// geometry from it.
    ///
    /// The head of copy A is at the start of the stripe. Its foot is found by scanning
    /// store block boundaries forward in [`META_CHUNK_SIZE`] reads, at most 1/16 of the
    /// stripe. Copy B follows copy A's foot with the same head to foot distance.
    pub fn load_meta(&mut self, dev: &Device) -> Errata {
        let mut zret = Errata::new();
        self.reset_meta();

        let io_align = dev.geometry().block_size;
        if io_align > STORE_BLOCK as u64 {
            zret.push(CacheError::io(
                format!("Cannot load stripe {}", self.hash_text),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "I/O block alignment {io_align} is larger than the buffer alignment {STORE_BLOCK}"
                    ),
                ),
            ));
            return zret;
        }

        let start = self.start.count() as u64;
        let limit = start + (self.len.bytes() / 16) as u64;

        let head_a_buf = match read_block(dev, start) {
            Ok(buf) => buf,
            Err(e) => {
                zret.push(e);
                return zret;
            }
        };
        let Some(head_a) = stripe_meta::parse_valid(&head_a_buf) else {
            zret.push(CacheError::Format("Header A not found".into()));
            return zret;
        };
        self.meta_pos[MetaCopy::A as usize][HEAD] = start;

        let mut pos = start + STORE_BLOCK as u64;
        self.directory.reset(pos);
        let mut foot_a = None;
        while pos < limit {
            let mut chunk = vec![0u8; META_CHUNK_SIZE];
            let n = match dev.read_at(pos, &mut chunk) {
                Ok(n) => n,
                Err(e) => {
                    zret.push(CacheError::io(format!("Failed to read stripe at {pos}"), e));
                    break;
                }
            };
            if n == 0 {
                break;
            }
            chunk.truncate(n);
            if let Some((at, meta)) = scan_meta(&chunk, Some(head_a.version)) {
                debug!(stripe = %self.hash_text, pos = pos + at as u64, "footer A found");
                self.directory.append(&chunk[..at]);
                foot_a = Some((pos + at as u64, meta));
                break;
            }
            self.directory.append(&chunk);
            pos += n as u64;
        }

        let Some((foot_a_pos, foot_a)) = foot_a else {
            if zret.is_ok() {
                zret.push(CacheError::Format(format!(
                    "Footer A not found within {} bytes of stripe {}",
                    limit - start,
                    self.hash_text
                )));
            }
            self.directory.clear();
            return zret;
        };
        self.meta_pos[MetaCopy::A as usize][FOOT] = foot_a_pos;
        let delta = foot_a_pos - start;

        // Copy B is cheap to fetch because its offsets are known exactly.
        let head_b_pos = foot_a_pos + STORE_BLOCK as u64;
        let mut head_b_buf = Vec::new();
        let mut copy_b = None;
        if let Ok(buf) = read_block(dev, head_b_pos)
            && let Some(head_b) = stripe_meta::parse_valid(&buf)
        {
            head_b_buf = buf;
            self.meta_pos[MetaCopy::B as usize][HEAD] = head_b_pos;
            let foot_b_pos = head_b_pos + delta;
            let foot_b = read_block(dev, foot_b_pos)
                .ok()
                .and_then(|buf| stripe_meta::parse_valid(&buf));
            if let Some(foot_b) = &foot_b {
                self.meta_pos[MetaCopy::B as usize][FOOT] = foot_b_pos;
                copy_b = Some((head_b.sync_serial, foot_b.sync_serial));
            }
            self.meta[MetaCopy::B as usize] = [Some(head_b), foot_b];
        }

        let a_consistent = head_a.sync_serial == foot_a.sync_serial;
        let b_consistent = matches!(copy_b, Some((h, f)) if h == f);
        let a_newer = copy_b.is_none_or(|(h, _)| head_a.sync_serial > h);
        self.meta[MetaCopy::A as usize] = [Some(head_a), Some(foot_a)];

        let chosen = if a_consistent && (!b_consistent || a_newer) {
            MetaCopy::A
        } else if b_consistent {
            MetaCopy::B
        } else {
            zret.push(CacheError::Consistency(
                "Invalid stripe data - candidates found but sync serial data not valid.".into(),
            ));
            self.directory.clear();
            return zret;
        };

        self.update_live_data(chosen);
        let head_buf = match chosen {
            MetaCopy::A => &head_a_buf,
            MetaCopy::B => &head_b_buf,
        };
        let segments = usize::try_from(self.segments).unwrap_or(0);
        self.freelist = stripe_meta::read_freelist(head_buf, segments);
        if self.dir_header_len() > STORE_BLOCK as u64 {
            // The free list spills past the first block; fetch the rest of the header.
            let mut full = vec![0u8; usize::try_from(self.dir_header_len()).unwrap_or(0)];
            if dev.read_at(self.meta_pos[chosen as usize][HEAD], &mut full).is_ok() {
                self.freelist = stripe_meta::read_freelist(&full, segments);
            }
        }
        zret
    }

    /// Derive bucket and segment counts from the head to foot distance of `copy`.
    ///
    /// The header length depends on the segment count (one free list slot each), so it
    /// is grown one store block at a time until the free list fits.
    pub fn update_live_data(&mut self, copy: MetaCopy) {
        let c = copy as usize;
        let delta = CacheStoreBlocks::from_bytes_down(
            (self.meta_pos[c][FOOT] - self.meta_pos[c][HEAD]) as i64,
        );
        let entry_group = (SIZEOF_DIR * DIR_DEPTH) as i64;
        let max_buckets = MAX_BUCKETS_PER_SEGMENT as i64;

        let mut header_len = CacheStoreBlocks::new(0);
        let (n_buckets, n_segments) = loop {
            header_len += CacheStoreBlocks::new(1);
            let n_buckets = ((delta - header_len).bytes() / entry_group).max(0);
            let mut n_segments = (n_buckets / max_buckets).max(1);
            while n_buckets / n_segments > max_buckets {
                n_segments += 1;
            }
            if (META_SIZE as i64) + 2 * n_segments <= header_len.bytes() {
                break (n_buckets, n_segments);
            }
        };

        self.buckets = (n_buckets / n_segments) as u64;
        self.segments = n_segments as u64;
        self.live = Some(copy);
    }
}

/// `scan_meta` scans store block boundaries of `mem` for a valid meta record.
///
/// # Returns
/// The byte offset and record of the first match with the required `version`.
#[must_use]
pub fn scan_meta(mem: &[u8], version: Option<Version>) -> Option<(usize, StripeMeta)> {
    (0..mem.len())
        .step_by(STORE_BLOCK)
        .take_while(|at| at + META_SIZE <= mem.len())
        .find_map(|at| {
            stripe_meta::parse_valid(&mem[at..])
                .filter(|m| version.is_none_or(|v| m.version == v))
                .map(|m| (at, m))
        })
}

#[must_use]
pub const fn round_to_store_block(bytes: u64) -> u64 {
    bytes.div_ceil(STORE_BLOCK as u64) * STORE_BLOCK as u64
}

fn read_block(dev: &Device, pos: u64) -> Result<Vec<u8>, CacheError> {
    let mut buf = vec![0u8; STORE_BLOCK];
    let n = dev
        .read_at(pos, &mut buf)
        .map_err(|e| CacheError::io(format!("Failed to read stripe meta at {pos}"), e))?;
    buf.truncate(n);
    Ok(buf)
}
