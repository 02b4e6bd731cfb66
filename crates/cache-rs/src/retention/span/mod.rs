//! A span is one physical device or image file dedicated to the cache.


use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::errata::CacheError;
use crate::layout::span_header::{
    self, DESCRIPTOR_SIZE, HEADER_BASE_SIZE, SpanHeader, StripeDescriptor,
};
use crate::layout::units::{Bytes, CacheStoreBlocks, CacheStripeBlocks};
use crate::retention::device::{Device, DeviceKind, Geometry};
use crate::retention::stripe::{STORE_BLOCK, Stripe};

/// OFFSET is where the span header lives: the first store block is left to the OS.
pub const OFFSET: CacheStoreBlocks = CacheStoreBlocks::new(1);

pub struct Span {
    pub path: PathBuf,
    device: Device,
    /// First usable store block.
    pub base: CacheStoreBlocks,
    /// First store block past the header reservation.
    pub offset: CacheStoreBlocks,
    /// End of the usable region, absolute.
    pub len: CacheStoreBlocks,
    pub free_space: CacheStoreBlocks,
    pub header: Option<SpanHeader>,
    /// Stripes in physical order.
    pub stripes: Vec<Stripe>,
    pub forced_volume: Option<u8>,
    /// Replaces the path when computing stripe identifiers.
    pub hash_seed: Option<String>,
    config: ToolConfig,
}

impl Span {
    /// Classify `path` and open it as a span.
    ///
    /// Block devices, character devices and regular files are accepted.
    ///
    /// # Errors
    /// Returns an error for directories and other file types, and if the device
    /// cannot be opened or read.
    pub fn load(path: &Path, config: ToolConfig) -> Result<Self, CacheError> {
        let kind = DeviceKind::classify(path)
            .map_err(|e| CacheError::io(format!("Unable to stat {}", path.display()), e))?;
        match kind {
            DeviceKind::Block | DeviceKind::Char | DeviceKind::File => {
                Self::load_device(path, config)
            }
            DeviceKind::Directory => Err(CacheError::Input(format!(
                "Directory support not yet available: {}",
                path.display()
            ))),
            DeviceKind::Other => Err(CacheError::Input(format!(
                "{} is not a valid file type",
                path.display()
            ))),
        }
    }

    /// Open the device and read its span header.
    ///
    /// A span without a valid header is returned with `header == None` and the whole
    /// device past [`OFFSET`] as its extent.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened or the header block cannot be read.
    pub fn load_device(path: &Path, config: ToolConfig) -> Result<Self, CacheError> {
        let device = Device::open(path, config.write_enabled)
            .map_err(|e| CacheError::io(format!("Unable to open {}", path.display()), e))?;
        let geometry = device.geometry();
        let base = CacheStoreBlocks::round_up(OFFSET);
        let at = OFFSET.bytes() as u64;

        let mut buf = vec![0u8; STORE_BLOCK];
        let n = device.read_at(at, &mut buf).map_err(|e| {
            CacheError::io(format!("Failed to read span header of {}", path.display()), e)
        })?;
        buf.truncate(n);

        let total = CacheStoreBlocks::from_bytes_down(geometry.total_size as i64);
        let reserved = header_reservation(total - base);
        let mut header = None;
        if let Some(count) = SpanHeader::descriptor_count(&buf) {
            let full = SpanHeader::serialized_len(count);
            if full as i64 > reserved.bytes() {
                warn!(
                    span = %path.display(),
                    descriptors = count,
                    "span header describes more stripes than the span can hold"
                );
            } else if full > buf.len() {
                buf.resize(full, 0);
                let n = device.read_at(at, &mut buf).map_err(|e| {
                    CacheError::io(format!("Failed to read span header of {}", path.display()), e)
                })?;
                buf.truncate(n);
                header = SpanHeader::parse(&buf);
            } else {
                header = SpanHeader::parse(&buf);
            }
        }

        let (offset, len) = match &header {
            Some(h) => {
                let offset = h.stripes.first().map_or_else(
                    || base + SpanHeader::size_for(h.stripes.len()),
                    |d| CacheStoreBlocks::round_down(d.offset),
                );
                (offset, h.num_blocks)
            }
            None => {
                warn!(span = %path.display(), "span header is invalid");
                (base, total - base)
            }
        };
        debug!(span = %path.display(), size = geometry.total_size, %len, "span loaded");

        Ok(Self {
            path: path.to_path_buf(),
            device,
            base,
            offset,
            len,
            free_space: CacheStoreBlocks::new(0),
            header,
            stripes: Vec::new(),
            forced_volume: None,
            hash_seed: None,
            config,
        })
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.device.geometry()
    }

    /// Borrow the stripes mutably together with the device they live on.
    pub fn stripes_and_device(&mut self) -> (&mut [Stripe], &Device) {
        (&mut self.stripes, &self.device)
    }

    /// `seed` is the text stripe identifiers are derived from.
    #[must_use]
    pub fn seed(&self) -> String {
        self.hash_seed
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Rebuild the stripe list from the loaded header.
    pub fn adopt_header_stripes(&mut self) {
        let Some(header) = &self.header else {
            return;
        };
        let seed = self.seed();
        self.stripes = header
            .stripes
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut stripe = Stripe::new(&seed, d.offset, d.len);
                stripe.idx = Some(i);
                stripe.stripe_type = d.stripe_type;
                stripe.vol_idx = if d.free {
                    0
                } else {
                    u8::try_from(d.vol_idx).unwrap_or(u8::MAX)
                };
                stripe
            })
            .collect();
        self.free_space = self
            .stripes
            .iter()
            .filter(|s| s.is_free())
            .map(|s| s.len)
            .sum();
    }

    /// `is_empty` is true when no stripe is assigned to a volume.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(Stripe::is_free)
    }

    /// Assign `len` of free space to `vol_idx`.
    ///
    /// The first free stripe at least `len` long is used. If taking `len` would leave
    /// less than one stripe block behind, the whole free stripe is taken; otherwise it
    /// is split and the new stripe is placed in front of the remainder.
    ///
    /// # Errors
    /// Returns an allocation error if `len` is zero or no free stripe is large enough.
    ///
    /// # Returns
    /// The index of the allocated stripe in [`Self::stripes`].
    pub fn alloc_stripe(
        &mut self,
        vol_idx: u8,
        len: CacheStripeBlocks,
    ) -> Result<usize, CacheError> {
        if len.count() <= 0 {
            return Err(CacheError::Allocation(format!(
                "Failed to allocate stripe of size {len} - size must be positive"
            )));
        }
        let want = CacheStoreBlocks::round_up(len);
        let Some(i) = self
            .stripes
            .iter()
            .position(|s| s.is_free() && s.len >= want)
        else {
            return Err(CacheError::Allocation(format!(
                "Failed to allocate stripe of size {len} - no free block large enough"
            )));
        };

        let slack = CacheStoreBlocks::round_up(len + CacheStripeBlocks::new(1));
        if self.stripes[i].len <= slack {
            let stripe = &mut self.stripes[i];
            stripe.vol_idx = vol_idx;
            stripe.stripe_type = 1;
            self.free_space -= stripe.len;
            return Ok(i);
        }

        let seed = self.seed();
        let free = &mut self.stripes[i];
        let start = free.start;
        free.resize(start + Bytes::new(want.bytes()), free.len - want);

        let mut stripe = Stripe::new(&seed, start, want);
        stripe.vol_idx = vol_idx;
        stripe.stripe_type = 1;
        self.stripes.insert(i, stripe);
        self.free_space -= want;
        Ok(i)
    }

    /// Reset the in-memory layout to a single free stripe covering the span.
    ///
    /// The header reservation is sized for the largest number of stripe blocks that
    /// could ever be carved out of the span.
    pub fn clear(&mut self) {
        self.stripes.clear();
        self.offset = self.base + header_reservation(self.len - self.base);

        let free_len = self.len - self.offset;
        if free_len.count() > 0 {
            let seed = self.seed();
            self.stripes.push(Stripe::new(
                &seed,
                Bytes::new(self.offset.bytes()),
                free_len,
            ));
            self.free_space = free_len;
        } else {
            self.free_space = CacheStoreBlocks::new(0);
        }
    }

    /// Rebuild the header from the stripe list and persist it when writes are enabled.
    ///
    /// # Errors
    /// Returns a format error if the header no longer fits in front of the first
    /// stripe, or an I/O error if the write fails.
    pub fn update_header(&mut self) -> Result<(), CacheError> {
        let n = self.stripes.len();
        let needed = SpanHeader::size_for(n);
        let reserved = self.offset - self.base;
        if needed > reserved {
            return Err(CacheError::Format(format!(
                "Span header for {} needs {needed} but only {reserved} are reserved",
                self.path.display()
            )));
        }

        let stripes: Vec<StripeDescriptor> = self
            .stripes
            .iter()
            .map(|s| StripeDescriptor {
                offset: s.start,
                len: s.len,
                vol_idx: u32::from(s.vol_idx),
                stripe_type: s.stripe_type,
                free: s.is_free(),
            })
            .collect();
        let num_free = stripes.iter().filter(|d| d.free).count() as u32;
        let num_volumes = self
            .stripes
            .iter()
            .filter(|s| !s.is_free())
            .map(|s| s.vol_idx)
            .collect::<BTreeSet<_>>()
            .len() as u32;
        let header = SpanHeader {
            magic: span_header::MAGIC,
            num_volumes,
            num_free,
            num_used: n as u32 - num_free,
            num_diskvol_blks: n as u32,
            num_blocks: self.len,
            stripes,
        };
        let raw = header.to_bytes();
        self.header = Some(header);
        for (i, s) in self.stripes.iter_mut().enumerate() {
            s.idx = Some(i);
        }

        if !self.config.write_enabled {
            info!(span = %self.path.display(), "Writing not enabled, no updates performed");
            return Ok(());
        }
        self.device
            .write_at(OFFSET.bytes() as u64, &raw)
            .map_err(|e| {
                CacheError::io(format!("Failed to write span header of {}", self.path.display()), e)
            })?;
        info!(span = %self.path.display(), stripes = n, "span header updated");
        Ok(())
    }

    /// Overwrite the header block with zeros, leaving the span uninitialized.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub fn clear_permanently(&mut self) -> Result<(), CacheError> {
        if !self.config.write_enabled {
            info!(span = %self.path.display(), "Writing not enabled, no updates performed");
            return Ok(());
        }
        let zero = vec![0u8; STORE_BLOCK];
        self.device
            .write_at(OFFSET.bytes() as u64, &zero)
            .map_err(|e| CacheError::io(format!("Failed to clear {}", self.path.display()), e))?;
        self.header = None;
        info!(span = %self.path.display(), "span cleared");
        Ok(())
    }
}

/// Store blocks reserved for the header of a span with `eff` usable store blocks.
///
/// Room is left for the largest number of stripe blocks that could ever be carved out
/// of the span.
fn header_reservation(eff: CacheStoreBlocks) -> CacheStoreBlocks {
    let n = ((eff.bytes() - HEADER_BASE_SIZE as i64)
        / (CacheStripeBlocks::SCALE + DESCRIPTOR_SIZE as i64))
        .max(1);
    CacheStoreBlocks::round_up(Bytes::new(
        HEADER_BASE_SIZE as i64 + (n - 1) * DESCRIPTOR_SIZE as i64,
    ))
}
