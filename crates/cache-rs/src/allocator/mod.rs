//! Distributes span free space over the configured volumes.
//!
//! Each span is shared between the volumes still short of their target, weighted by
//! how far behind each one is relative to its target. Volumes furthest behind are
//! served first.

#[cfg(test)]
mod allocator_tests;

use std::path::Path;

use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::ToolConfig;
use crate::errata::{CacheError, Errata};
use crate::layout::units::CacheStripeBlocks;
use crate::retention::volume::VolumeConfig;

/// Fixed point scale of the deficit ratio.
const SCALE: i64 = 1000;

/// Working allocation state of one configured volume.
#[derive(Clone, Copy, Debug)]
struct Share {
    /// Index into the volume config.
    vol: usize,
    size: CacheStripeBlocks,
    deficit: i64,
    shares: i64,
}

pub struct VolumeAllocator {
    cache: Cache,
    vols: VolumeConfig,
    av: Vec<Share>,
}

impl VolumeAllocator {
    #[must_use]
    pub fn new(config: ToolConfig) -> Self {
        Self {
            cache: Cache::new(config),
            vols: VolumeConfig::default(),
            av: Vec::new(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    #[must_use]
    pub const fn volume_config(&self) -> &VolumeConfig {
        &self.vols
    }

    /// Load the volume policy and the spans, then size every volume's target.
    ///
    /// Spans that fail to load are reported and left out; targets are sized over the
    /// spans that did load.
    ///
    /// # Errors
    /// Returns the collected errata when nothing can be allocated: an input is missing,
    /// the volume config has errors, or the span list failed without yielding a span.
    pub fn load(
        &mut self,
        span_file: Option<&Path>,
        volume_file: Option<&Path>,
    ) -> Result<Errata, Errata> {
        let mut zret = Errata::new();
        if volume_file.is_none() {
            zret.push(CacheError::Input("Volume config file not set".into()));
        }
        if span_file.is_none() {
            zret.push(CacheError::Input("Span file not set".into()));
        }
        let (Some(span_file), Some(volume_file)) = (span_file, volume_file) else {
            return Err(zret);
        };

        zret.extend(self.vols.load(volume_file));
        if !zret.is_ok() {
            return Err(zret);
        }
        zret.extend(self.cache.load_span(Some(span_file)));
        if !zret.is_ok() {
            if self.cache.spans.is_empty() {
                return Err(zret);
            }
            warn!(
                spans = self.cache.spans.len(),
                "some spans failed to load, allocating over the rest"
            );
        }

        let total = self.cache.calc_total_span_configured_size();
        self.vols.convert_to_absolute(total);
        info!(%total, volumes = self.vols.len(), "volume targets computed");
        self.av = self
            .vols
            .iter()
            .enumerate()
            .map(|(i, v)| Share {
                vol: i,
                size: self
                    .cache
                    .volumes
                    .get(&v.idx)
                    .map_or_else(CacheStripeBlocks::default, |vol| {
                        CacheStripeBlocks::round_down(vol.size)
                    }),
                deficit: 0,
                shares: 0,
            })
            .collect();
        Ok(zret)
    }

    /// Allocate only on spans that have no allocated stripe yet.
    pub fn fill_empty_spans(&mut self) -> Errata {
        let mut zret = Errata::new();
        for i in 0..self.cache.spans.len() {
            if self.cache.spans[i].is_empty() {
                zret.extend(self.allocate_for(i));
            }
        }
        zret
    }

    /// Throw away every allocation and redistribute all spans.
    pub fn fill_all_spans(&mut self) -> Errata {
        for v in &mut self.av {
            v.size = CacheStripeBlocks::new(0);
        }
        self.cache.clear_allocation();
        let mut zret = Errata::new();
        for i in 0..self.cache.spans.len() {
            zret.extend(self.allocate_for(i));
        }
        zret
    }

    /// Size accounted to each configured volume, in config order.
    #[must_use]
    pub fn allocated(&self) -> Vec<(u8, CacheStripeBlocks)> {
        let mut out: Vec<_> = self
            .av
            .iter()
            .map(|v| (v.vol, self.vols.volumes[v.vol].idx, v.size))
            .collect();
        out.sort_by_key(|&(vol, _, _)| vol);
        out.into_iter().map(|(_, idx, size)| (idx, size)).collect()
    }

    #[must_use]
    pub fn dump_volumes(&self) -> String {
        self.cache.dump_volumes()
    }

    fn allocate_for(&mut self, span: usize) -> Errata {
        let mut zret = Errata::new();
        info!(
            span = %self.cache.spans[span].path.display(),
            blocks = CacheStripeBlocks::round_down(self.cache.spans[span].len).count(),
            "allocating stripe blocks from span"
        );

        let mut total_shares = 0;
        for v in &mut self.av {
            let target = self.vols.volumes[v.vol].alloc;
            let delta = target - v.size;
            if delta.count() > 0 {
                v.deficit = delta.count() * SCALE / target.count();
                v.shares = delta.count() * v.deficit;
                total_shares += v.shares;
            } else {
                v.deficit = 0;
                v.shares = 0;
            }
        }

        let span_blocks = CacheStripeBlocks::round_down(self.cache.spans[span].free_space);
        let mut span_used = CacheStripeBlocks::new(0);
        self.av.sort_by(|a, b| b.deficit.cmp(&a.deficit));

        for i in 0..self.av.len() {
            let v = self.av[i];
            if v.shares == 0 {
                continue;
            }
            let spec = &self.vols.volumes[v.vol];
            let remaining = (span_blocks - span_used).count();
            let n = ((remaining * v.shares + total_shares - 1) / total_shares)
                .min((spec.alloc - v.size).count());
            total_shares -= v.shares;
            if n <= 0 {
                continue;
            }

            let n = CacheStripeBlocks::new(n);
            match self.cache.alloc_stripe(span, spec.idx, n) {
                Ok(_) => {
                    info!(volume = spec.idx, blocks = n.count(), "allocated to volume");
                    self.av[i].size += n;
                    span_used += n;
                }
                Err(e) => {
                    warn!(volume = spec.idx, error = %e, "allocation failed");
                    zret.push(e);
                }
            }
        }
        info!(total = span_used.count(), "span allocation done");

        // Without write enable this only refreshes the in-memory header.
        if let Err(e) = self.cache.spans[span].update_header() {
            zret.push(e);
        }
        zret
    }
}
