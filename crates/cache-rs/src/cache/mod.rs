//! The set of loaded spans and the volumes found on them.

pub mod hash_table;
pub mod url;

#[cfg(test)]
mod url_tests;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;

use tracing::{info, warn};

use crate::config::{ToolConfig, Verbosity};
use crate::errata::{CacheError, Errata};
use crate::layout::units::{CacheStoreBlocks, CacheStripeBlocks};
use crate::retention::span::Span;
use crate::retention::stripe::{MetaCopy, Stripe};
use crate::retention::stripe::directory::DirectoryReport;
use crate::retention::volume::{StripeRef, Volume, parse_volume_index};
use hash_table::{HashEntry, StripeHashTable};
use url::CacheUrl;

/// How much detail [`Cache::dump_spans`] produces.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SpanDumpDepth {
    Span,
    /// Also locate stripe metadata and report directory geometry.
    Stripe,
    /// Also check every directory.
    Directory,
}

pub struct Cache {
    pub spans: Vec<Span>,
    pub volumes: BTreeMap<u8, Volume>,
    pub urls: Vec<CacheUrl>,
    hash_table: Option<StripeHashTable>,
    config: ToolConfig,
}

impl Cache {
    #[must_use]
    pub const fn new(config: ToolConfig) -> Self {
        Self {
            spans: Vec::new(),
            volumes: BTreeMap::new(),
            urls: Vec::new(),
            hash_table: None,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> ToolConfig {
        self.config
    }

    /// Load spans from `path`: a span list if it is a regular file, otherwise a device.
    pub fn load_span(&mut self, path: Option<&Path>) -> Errata {
        let Some(path) = path else {
            return Errata::from(CacheError::Input(
                "A span file specified by --spans is required".into(),
            ));
        };
        if let Err(e) = File::open(path) {
            return Errata::from(CacheError::io(
                format!("'{}' is not readable.", path.display()),
                e,
            ));
        }
        if path.is_file() {
            self.load_span_config(path)
        } else {
            self.load_span_direct(path, None, None)
        }
    }

    /// Load every span named in a span list.
    ///
    /// Each line is `<path> [size] [id=<string>] [volume=<1..255>]`. Blank lines and
    /// lines starting with `#` are skipped.
    pub fn load_span_config(&mut self, path: &Path) -> Errata {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                return Errata::from(CacheError::io(
                    format!("Unable to load {}", path.display()),
                    e,
                ));
            }
        };

        let mut zret = Errata::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(span_path) = fields.next() else {
                continue;
            };

            let mut id = None;
            let mut volume = None;
            for field in fields {
                // A bare field is the configured size, which the span's own geometry overrides.
                let Some((tag, value)) = field.split_once('=') else {
                    continue;
                };
                if tag.eq_ignore_ascii_case("id") {
                    id = Some(value.to_owned());
                } else if tag.eq_ignore_ascii_case("volume") {
                    volume = parse_volume_index(value);
                    if volume.is_none() {
                        zret.push(CacheError::config(
                            i + 1,
                            0,
                            format!("Invalid volume index '{value}'"),
                        ));
                    }
                }
            }
            zret.extend(self.load_span_direct(Path::new(span_path), volume, id));
        }
        zret
    }

    /// Load a single span and register the stripes its header describes.
    ///
    /// A span without a valid header is cleared to one free stripe.
    pub fn load_span_direct(
        &mut self,
        path: &Path,
        forced_volume: Option<u8>,
        id: Option<String>,
    ) -> Errata {
        let mut zret = Errata::new();
        let mut span = match Span::load(path, self.config) {
            Ok(span) => span,
            Err(e) => {
                zret.push(e);
                return zret;
            }
        };
        span.forced_volume = forced_volume;
        span.hash_seed = id;

        let span_idx = self.spans.len();
        if span.header.is_some() {
            span.adopt_header_stripes();
            for (i, stripe) in span.stripes.iter().enumerate() {
                if stripe.is_free() {
                    continue;
                }
                self.volumes
                    .entry(stripe.vol_idx)
                    .or_insert_with(|| Volume::new(stripe.vol_idx))
                    .add(
                        StripeRef {
                            span: span_idx,
                            stripe: i,
                        },
                        stripe.len,
                    );
            }
        } else {
            zret.push(CacheError::Uninitialized(format!(
                "Span header for {} is invalid",
                path.display()
            )));
            span.clear();
        }
        info!(span = %path.display(), stripes = span.stripes.len(), "span added");
        self.spans.push(span);
        self.hash_table = None;
        zret
    }

    /// Allocate `len` on span `span` for volume `vol_idx` and register the stripe.
    ///
    /// # Errors
    /// Returns an allocation error if the span does not exist or has no room.
    pub fn alloc_stripe(
        &mut self,
        span: usize,
        vol_idx: u8,
        len: CacheStripeBlocks,
    ) -> Result<StripeRef, CacheError> {
        let sp = self
            .spans
            .get_mut(span)
            .ok_or_else(|| CacheError::Allocation(format!("No span with index {span}")))?;
        let before = sp.stripes.len();
        let at = sp.alloc_stripe(vol_idx, len)?;
        let stripe_len = sp.stripes[at].len;
        info!(span = %sp.path.display(), volume = vol_idx, len = %stripe_len, "stripe allocated");

        if sp.stripes.len() > before {
            for v in self.volumes.values_mut() {
                v.shift_after_insert(span, at);
            }
        }
        let r = StripeRef { span, stripe: at };
        self.volumes
            .entry(vol_idx)
            .or_insert_with(|| Volume::new(vol_idx))
            .add(r, stripe_len);
        self.hash_table = None;
        Ok(r)
    }

    /// Reset every span to a single free stripe and empty every volume.
    pub fn clear_allocation(&mut self) {
        for span in &mut self.spans {
            span.clear();
        }
        for v in self.volumes.values_mut() {
            v.clear();
        }
        self.hash_table = None;
    }

    #[must_use]
    pub fn stripe(&self, r: StripeRef) -> Option<&Stripe> {
        self.spans.get(r.span)?.stripes.get(r.stripe)
    }

    /// Sum of span lengths, each rounded down to whole stripe blocks.
    #[must_use]
    pub fn calc_total_span_configured_size(&self) -> CacheStripeBlocks {
        self.spans
            .iter()
            .map(|s| CacheStripeBlocks::round_down(s.len))
            .sum()
    }

    /// Describe the loaded spans.
    ///
    /// # Returns
    /// The report text and the errors met while loading stripe metadata.
    pub fn dump_spans(&mut self, depth: SpanDumpDepth) -> (String, Errata) {
        let mut out = String::new();
        let mut zret = Errata::new();
        let verbose = self.config.verbosity >= Verbosity::Verbose;
        for span in &mut self.spans {
            let Some(header) = &span.header else {
                let _ = writeln!(out, "Span: {} is uninitialized", span.path.display());
                continue;
            };
            let _ = writeln!(
                out,
                "Span: {} {} Volumes {} in use {} free {} stripes {} blocks",
                span.path.display(),
                header.num_volumes,
                header.num_used,
                header.num_free,
                header.num_diskvol_blks,
                header.num_blocks.count()
            );

            let (stripes, device) = span.stripes_and_device();
            for stripe in stripes {
                let _ = writeln!(
                    out,
                    "    : Stripe {} @ {} len={} blocks vol={} type={} {}",
                    stripe.idx.map_or_else(|| "-".to_owned(), |i| i.to_string()),
                    stripe.start.count(),
                    stripe.len.count(),
                    stripe.vol_idx,
                    stripe.stripe_type,
                    if stripe.is_free() { "free" } else { "in-use" }
                );
                if stripe.is_free() {
                    continue;
                }
                match depth {
                    SpanDumpDepth::Span => {}
                    SpanDumpDepth::Stripe => {
                        let r = stripe.load_meta(device);
                        if r.is_ok() {
                            let _ = writeln!(
                                out,
                                "      {} segments with {} buckets per segment for {} total \
                                 directory entries taking {} bytes",
                                stripe.segments,
                                stripe.buckets,
                                stripe.entries(),
                                stripe.dir_bytes()
                            );
                            if verbose {
                                write_meta_copies(&mut out, stripe);
                            }
                        }
                        stripe.release_directory();
                        zret.extend(r);
                    }
                    SpanDumpDepth::Directory => match stripe.dir_check(device) {
                        Ok(report) => {
                            let _ = write!(out, "{report}");
                            stripe.release_directory();
                        }
                        Err(e) => zret.extend(e),
                    },
                }
            }
        }
        (out, zret)
    }

    /// One line per volume with its stripe count and total size.
    #[must_use]
    pub fn dump_volumes(&self) -> String {
        let mut out = String::new();
        for v in self.volumes.values() {
            let _ = writeln!(
                out,
                "Volume {} has {} stripes and {} bytes",
                v.idx,
                v.stripes.len(),
                v.size.bytes()
            );
        }
        out
    }

    /// Check the directory of every allocated stripe.
    pub fn check_directories(&mut self) -> (Vec<DirectoryReport>, Errata) {
        let mut reports = Vec::new();
        let mut zret = Errata::new();
        for span in &mut self.spans {
            let (stripes, device) = span.stripes_and_device();
            for stripe in stripes.iter_mut().filter(|s| !s.is_free()) {
                match stripe.dir_check(device) {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        warn!(stripe = %stripe.hash_text(), "directory check failed");
                        zret.extend(e);
                    }
                }
                stripe.release_directory();
            }
        }
        (reports, zret)
    }

    /// Read `url=<value>` lines from `path`. Other lines are ignored.
    pub fn load_urls(&mut self, path: &Path) -> Errata {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                return Errata::from(CacheError::io(
                    format!("Unable to load {}", path.display()),
                    e,
                ));
            }
        };
        let mut zret = Errata::new();
        for (i, line) in text.lines().enumerate() {
            let Some((tag, value)) = line.split_once('=') else {
                continue;
            };
            if !tag.trim().eq_ignore_ascii_case("url") {
                continue;
            }
            match CacheUrl::parse(value.trim()) {
                Ok(url) => self.urls.push(url),
                Err(msg) => zret.push(CacheError::config(i + 1, 1, msg)),
            }
        }
        zret
    }

    /// Build the table that maps content keys to allocated stripes.
    pub fn build_stripe_hash_table(&mut self) -> &StripeHashTable {
        let entries: Vec<HashEntry> = self
            .spans
            .iter()
            .enumerate()
            .flat_map(|(s, span)| {
                span.stripes
                    .iter()
                    .enumerate()
                    .filter(|(_, stripe)| !stripe.is_free())
                    .map(move |(i, stripe)| HashEntry {
                        stripe: StripeRef { span: s, stripe: i },
                        len: stripe.len,
                        hash_id: *stripe.hash_id(),
                    })
            })
            .collect();
        info!(stripes = entries.len(), "building stripe hash table");
        self.hash_table.insert(StripeHashTable::build(&entries))
    }

    #[must_use]
    pub const fn hash_table(&self) -> Option<&StripeHashTable> {
        self.hash_table.as_ref()
    }

    /// The stripe a content key is stored on, once the hash table is built.
    #[must_use]
    pub fn key_to_stripe(&self, key: &[u8; 16]) -> Option<&Stripe> {
        let r = self.hash_table.as_ref()?.lookup(key)?;
        self.stripe(r)
    }

    /// Total free space over all spans.
    #[must_use]
    pub fn free_space(&self) -> CacheStoreBlocks {
        self.spans.iter().map(|s| s.free_space).sum()
    }
}

/// Positions and serials of both metadata copies of a loaded stripe.
fn write_meta_copies(out: &mut String, stripe: &Stripe) {
    for copy in [MetaCopy::A, MetaCopy::B] {
        let serial = |foot| stripe.meta(copy, foot).map(|m| m.sync_serial);
        let _ = writeln!(
            out,
            "      Copy {copy:?}{}: head @ {} serial {:?}, foot @ {} serial {:?}",
            if stripe.live_copy() == Some(copy) { " (live)" } else { "" },
            stripe.meta_pos(copy, false),
            serial(false),
            stripe.meta_pos(copy, true),
            serial(true)
        );
    }
}
