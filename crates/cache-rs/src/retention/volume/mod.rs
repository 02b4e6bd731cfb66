mod config;
#[cfg(test)]
mod config_tests;

pub use config::{VolumeConfig, VolumeSpec, parse_volume_index};

use crate::layout::units::CacheStoreBlocks;

/// Position of a stripe: the span in the cache and the stripe within that span.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StripeRef {
    pub span: usize,
    pub stripe: usize,
}

/// A logical volume as found on the loaded spans.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Volume {
    pub idx: u8,
    /// Sum of the lengths of the stripes in `stripes`.
    pub size: CacheStoreBlocks,
    pub stripes: Vec<StripeRef>,
}

impl Volume {
    #[must_use]
    pub fn new(idx: u8) -> Self {
        Self {
            idx,
            ..Self::default()
        }
    }

    pub fn add(&mut self, stripe: StripeRef, len: CacheStoreBlocks) {
        self.stripes.push(stripe);
        self.size += len;
    }

    /// Account for a stripe inserted at `at` in `span`, which moves later stripes up by one.
    pub fn shift_after_insert(&mut self, span: usize, at: usize) {
        for r in &mut self.stripes {
            if r.span == span && r.stripe >= at {
                r.stripe += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.size = CacheStoreBlocks::new(0);
        self.stripes.clear();
    }
}
