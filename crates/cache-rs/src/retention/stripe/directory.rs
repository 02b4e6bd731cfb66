//! Directory consistency check.
//!
//! The directory of the authoritative copy is walked bucket by bucket. Chains are
//! checked for loops before they are walked; a loop resets the whole segment in the
//! in-memory copy. Nothing is ever written back to the device.

use std::fmt;

use tracing::{debug, warn};

use super::{HEAD, MetaCopy, Stripe};
use crate::errata::{CacheError, Errata};
use crate::layout::dir_entry::{
    CACHE_BLOCK_SIZE, DIR_BLOCK_SIZES, DIR_DEPTH, DIR_SIZE_WIDTH, DirEntry, SIZEOF_DIR,
};
use crate::layout::stripe_meta::StripeMeta;
use crate::retention::device::Device;

/// Chains of this length or longer share the last histogram slot.
pub const CHAIN_HISTOGRAM_LEN: usize = 17;
const SIZE_CLASSES: usize = 1 << DIR_SIZE_WIDTH;
/// The aggregation buffer is empty offline.
const AGG_BUF_POS: i64 = 0;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SegmentReport {
    pub index: u64,
    pub in_use: u64,
    pub stale: u64,
    /// Length of the segment free list.
    pub free: u64,
    pub bytes_in_use: u64,
    pub heads: u64,
    pub buckets_used: u64,
    pub buckets_empty: u64,
    pub max_chain: u64,
    chain_total: u64,
    /// Tags appearing more than once in the same bucket.
    pub dup_tags: u64,
    /// Entries reachable from more than one bucket.
    pub shared_entries: u64,
    /// Links pointing outside the segment.
    pub bad_links: u64,
    pub repaired: bool,
    pub chain_histogram: [u64; CHAIN_HISTOGRAM_LEN],
    pub size_histogram: Vec<[u64; DIR_BLOCK_SIZES]>,
}

impl SegmentReport {
    fn new(index: u64, repaired: bool) -> Self {
        Self {
            index,
            repaired,
            size_histogram: vec![[0; DIR_BLOCK_SIZES]; SIZE_CLASSES],
            ..Self::default()
        }
    }

    /// Mean chain length over buckets that hold at least one entry.
    #[must_use]
    pub fn avg_chain(&self) -> f64 {
        if self.buckets_used == 0 {
            0.0
        } else {
            self.chain_total as f64 / self.buckets_used as f64
        }
    }
}

/// Result of checking one stripe directory.
#[derive(Clone, Debug)]
pub struct DirectoryReport {
    pub stripe: String,
    pub copy: MetaCopy,
    pub buckets: u64,
    pub segments: Vec<SegmentReport>,
}

impl DirectoryReport {
    fn total(&self, f: impl Fn(&SegmentReport) -> u64) -> u64 {
        self.segments.iter().map(f).sum()
    }

    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.total(|s| s.in_use)
    }

    #[must_use]
    pub fn stale(&self) -> u64 {
        self.total(|s| s.stale)
    }

    #[must_use]
    pub fn free(&self) -> u64 {
        self.total(|s| s.free)
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.total(|s| s.bytes_in_use)
    }

    #[must_use]
    pub fn repaired_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.repaired).count()
    }

    #[must_use]
    pub fn chain_histogram(&self) -> [u64; CHAIN_HISTOGRAM_LEN] {
        let mut hist = [0; CHAIN_HISTOGRAM_LEN];
        for s in &self.segments {
            for (acc, n) in hist.iter_mut().zip(s.chain_histogram) {
                *acc += n;
            }
        }
        hist
    }

    /// Live entries by `[size][big]`.
    #[must_use]
    pub fn size_histogram(&self) -> Vec<[u64; DIR_BLOCK_SIZES]> {
        let mut hist = vec![[0; DIR_BLOCK_SIZES]; SIZE_CLASSES];
        for s in &self.segments {
            for (acc, row) in hist.iter_mut().zip(&s.size_histogram) {
                for (a, n) in acc.iter_mut().zip(row) {
                    *a += n;
                }
            }
        }
        hist
    }
}

impl fmt::Display for DirectoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Stripe '{}' directory copy {:?}: {} segments x {} buckets",
            self.stripe,
            self.copy,
            self.segments.len(),
            self.buckets
        )?;
        for s in &self.segments {
            writeln!(
                f,
                "  Segment {}: in use {}, stale {}, free {}, bytes {}, buckets {} used {} empty, \
                 max chain {}, avg chain {:.2}, dup tags {}{}",
                s.index,
                s.in_use,
                s.stale,
                s.free,
                s.bytes_in_use,
                s.buckets_used,
                s.buckets_empty,
                s.max_chain,
                s.avg_chain(),
                s.dup_tags,
                if s.repaired { ", repaired" } else { "" }
            )?;
        }
        writeln!(
            f,
            "  Total: in use {}, stale {}, free {}, bytes {}",
            self.in_use(),
            self.stale(),
            self.free(),
            self.bytes_in_use()
        )?;
        write!(f, "  Chain lengths:")?;
        for (len, n) in self.chain_histogram().iter().enumerate() {
            if *n > 0 {
                let plus = if len + 1 == CHAIN_HISTOGRAM_LEN { "+" } else { "" };
                write!(f, " {len}{plus}:{n}")?;
            }
        }
        writeln!(f)
    }
}

/// Entry access into a raw directory copy.
struct DirView<'a> {
    bytes: &'a mut [u8],
    per_segment: usize,
}

impl DirView<'_> {
    fn at(&self, seg: usize, idx: usize) -> usize {
        (seg * self.per_segment + idx) * SIZEOF_DIR
    }

    fn get(&self, seg: usize, idx: usize) -> DirEntry {
        let at = self.at(seg, idx);
        let mut raw = [0u8; SIZEOF_DIR];
        raw.copy_from_slice(&self.bytes[at..at + SIZEOF_DIR]);
        DirEntry::from_bytes(&raw)
    }

    fn put(&mut self, seg: usize, idx: usize, e: DirEntry) {
        let at = self.at(seg, idx);
        self.bytes[at..at + SIZEOF_DIR].copy_from_slice(&e.to_bytes());
    }

    /// Follow `next`, treating links outside the segment as the end of the chain.
    fn next(&self, seg: usize, idx: usize) -> usize {
        let next = usize::from(self.get(seg, idx).next());
        if next < self.per_segment { next } else { 0 }
    }

    /// Floyd cycle detection over the chain starting at `start`.
    fn has_loop(&self, seg: usize, start: usize) -> bool {
        let mut slow = start;
        let mut fast = start;
        loop {
            fast = self.next(seg, fast);
            if fast == 0 {
                return false;
            }
            fast = self.next(seg, fast);
            if fast == 0 {
                return false;
            }
            slow = self.next(seg, slow);
            if slow == fast {
                return true;
            }
        }
    }

    /// Zero the segment and rebuild its free list from every non-head row.
    fn init_segment(&mut self, seg: usize, buckets: usize, freelist: &mut [u16]) {
        let from = self.at(seg, 0);
        self.bytes[from..from + self.per_segment * SIZEOF_DIR].fill(0);
        freelist[seg] = 0;
        for row in 1..DIR_DEPTH {
            for b in 0..buckets {
                let idx = b * DIR_DEPTH + row;
                let head = freelist[seg];
                let mut e = self.get(seg, idx);
                e.set_next(head);
                self.put(seg, idx, e);
                if head != 0 {
                    let mut h = self.get(seg, usize::from(head));
                    h.set_prev(idx as u16);
                    self.put(seg, usize::from(head), h);
                }
                freelist[seg] = idx as u16;
            }
        }
    }
}

struct Checker<'a> {
    view: DirView<'a>,
    buckets: usize,
    meta: &'a StripeMeta,
    start: i64,
}

impl Checker<'_> {
    /// An entry is stale if its offset falls outside the live region for its phase.
    fn is_stale(&self, e: &DirEntry) -> bool {
        let off = e.offset() as i64 - 1;
        let block = CACHE_BLOCK_SIZE as i64;
        if u32::from(e.phase()) == self.meta.phase {
            off >= (self.meta.write_pos + AGG_BUF_POS - self.start) / block
        } else {
            off < (self.meta.agg_pos - self.start) / block
        }
    }

    fn check_segment(&mut self, seg: usize, freelist: &mut [u16]) -> SegmentReport {
        let mut repaired = false;
        let mut bad_heads = 0;
        'walk: loop {
            let mut report = SegmentReport::new(seg as u64, repaired);
            report.bad_links = bad_heads;
            let mut marks = vec![usize::MAX; self.view.per_segment];
            let mut tags = Vec::with_capacity(DIR_DEPTH);

            for b in 0..self.buckets {
                let root = b * DIR_DEPTH;
                if self.view.has_loop(seg, root) {
                    warn!(segment = seg, bucket = b, "loop in bucket chain, resetting segment");
                    self.view.init_segment(seg, self.buckets, freelist);
                    repaired = true;
                    continue 'walk;
                }

                tags.clear();
                let mut idx = root;
                let mut len = 0u64;
                loop {
                    let e = self.view.get(seg, idx);
                    if e.offset() == 0 {
                        break;
                    }
                    len += 1;
                    if marks[idx] != usize::MAX && marks[idx] != b {
                        report.shared_entries += 1;
                    }
                    marks[idx] = b;
                    tags.push(e.tag());
                    if self.is_stale(&e) {
                        report.stale += 1;
                    } else {
                        report.in_use += 1;
                        report.bytes_in_use += e.approx_size();
                        report.size_histogram[e.size() as usize][e.big() as usize] += 1;
                        if e.head() {
                            report.heads += 1;
                        }
                    }
                    let next = usize::from(e.next());
                    if next == 0 {
                        break;
                    }
                    if next >= self.view.per_segment {
                        report.bad_links += 1;
                        break;
                    }
                    idx = next;
                }

                if len == 0 {
                    report.buckets_empty += 1;
                } else {
                    report.buckets_used += 1;
                    report.chain_total += len;
                    report.max_chain = report.max_chain.max(len);
                }
                let slot = usize::try_from(len).map_or(CHAIN_HISTOGRAM_LEN - 1, |l| {
                    l.min(CHAIN_HISTOGRAM_LEN - 1)
                });
                report.chain_histogram[slot] += 1;

                tags.sort_unstable();
                report.dup_tags += tags.windows(2).filter(|w| w[0] == w[1]).count() as u64;
            }

            let head = usize::from(freelist[seg]);
            if head >= self.view.per_segment {
                warn!(segment = seg, head, "free list head outside segment, resetting segment");
                self.view.init_segment(seg, self.buckets, freelist);
                bad_heads += 1;
                repaired = true;
                continue 'walk;
            }
            if head != 0 && self.view.has_loop(seg, head) {
                warn!(segment = seg, "loop in free list, resetting segment");
                self.view.init_segment(seg, self.buckets, freelist);
                repaired = true;
                continue 'walk;
            }
            let mut idx = head;
            while idx != 0 {
                report.free += 1;
                idx = self.view.next(seg, idx);
            }
            return report;
        }
    }
}

impl Stripe {
    /// Load the metadata and check every segment of the authoritative directory.
    ///
    /// # Errors
    /// Returns the accumulated errors if the metadata cannot be loaded or the
    /// directory cannot be read.
    pub fn dir_check(&mut self, dev: &Device) -> Result<DirectoryReport, Errata> {
        let zret = self.load_meta(dev);
        if !zret.is_ok() {
            return Err(zret);
        }
        let Some(copy) = self.live else {
            return Err(Errata::from(CacheError::Consistency(format!(
                "No authoritative copy for stripe {}",
                self.hash_text
            ))));
        };
        let Some(meta) = self.meta[copy as usize][HEAD].clone() else {
            return Err(Errata::from(CacheError::Consistency(format!(
                "Missing head for copy {copy:?} of stripe {}",
                self.hash_text
            ))));
        };

        let dir_start = self.meta_pos[copy as usize][HEAD] + self.dir_header_len();
        let dir_len = usize::try_from(self.dir_bytes()).unwrap_or(usize::MAX);
        let mut freelist = self.freelist.clone();
        debug!(stripe = %self.hash_text, dir_start, dir_len, "checking directory");

        let segments = if dir_len == 0 {
            Vec::new()
        } else if let Some(cached) = self.directory.slice(dir_start, dir_len) {
            let mut bytes = cached.to_vec();
            self.check_bytes(&mut bytes, &meta, &mut freelist)
        } else {
            let mut map = dev.map_private(dir_start, dir_len).map_err(|e| {
                Errata::from(CacheError::io(
                    format!("Failed to map directory of stripe {}", self.hash_text),
                    e,
                ))
            })?;
            self.check_bytes(&mut map, &meta, &mut freelist)
        };
        self.freelist = freelist;

        let report = DirectoryReport {
            stripe: self.hash_text.clone(),
            copy,
            buckets: self.buckets,
            segments,
        };
        if report.repaired_segments() > 0 {
            warn!(
                stripe = %report.stripe,
                segments = report.repaired_segments(),
                "directory segments were reset in memory"
            );
        }
        Ok(report)
    }

    fn check_bytes(
        &self,
        bytes: &mut [u8],
        meta: &StripeMeta,
        freelist: &mut Vec<u16>,
    ) -> Vec<SegmentReport> {
        let buckets = usize::try_from(self.buckets).unwrap_or(0);
        let segments = usize::try_from(self.segments).unwrap_or(0);
        freelist.resize(segments, 0);
        let mut checker = Checker {
            view: DirView {
                bytes,
                per_segment: buckets * DIR_DEPTH,
            },
            buckets,
            meta,
            start: self.start.count(),
        };
        (0..segments)
            .map(|s| checker.check_segment(s, freelist))
            .collect()
    }
}
