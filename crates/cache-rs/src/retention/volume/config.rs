//! Volume sizing policy read from a volume config file.
//!
//! One volume per line, whitespace separated `tag=value` fields:
//!
//! ```text
//! # comment
//! volume=1 size=40%
//! volume=2 size=2048
//! ```
//!
//! A size without `%` is in megabytes and is rounded up to whole stripe blocks.

use std::path::Path;

use tracing::debug;

use crate::errata::{CacheError, Errata};
use crate::layout::units::{CacheStripeBlocks, Megabytes};

const TAG_SIZE: &str = "size";
const TAG_VOL: &str = "volume";

/// One configured volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeSpec {
    pub idx: u8,
    /// Share of the total span capacity, 0 when an absolute size is used.
    pub percent: u32,
    pub size: CacheStripeBlocks,
    /// Target size, set by [`VolumeConfig::convert_to_absolute`].
    pub alloc: CacheStripeBlocks,
}

#[derive(Clone, Debug, Default)]
pub struct VolumeConfig {
    pub volumes: Vec<VolumeSpec>,
}

/// `parse_volume_index` accepts a decimal volume index in `1..=255`.
#[must_use]
pub fn parse_volume_index(value: &str) -> Option<u8> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u8>().ok().filter(|&n| n > 0)
}

/// Leading decimal digits of `value` and the text after them.
fn split_number(value: &str) -> Option<(u64, &str)> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let n = value[..end].parse().ok()?;
    Some((n, &value[end..]))
}

impl VolumeConfig {
    /// Read and parse the config file at `path`.
    pub fn load(&mut self, path: &Path) -> Errata {
        match std::fs::read_to_string(path) {
            Ok(text) => self.parse(&text),
            Err(e) => Errata::from(CacheError::io(
                format!("Unable to load {}", path.display()),
                e,
            )),
        }
    }

    /// Parse config text. Lines missing a field or with bad values are reported and skipped.
    pub fn parse(&mut self, text: &str) -> Errata {
        let mut zret = Errata::new();
        for (i, line) in text.lines().enumerate() {
            let ln = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut idx = None;
            let mut size = None;
            let mut percent = None;
            for field in line.split_whitespace() {
                let Some((tag, value)) = field.split_once('=') else {
                    zret.push(CacheError::config(ln, 1, format!("Line {ln} is invalid")));
                    continue;
                };
                if tag.eq_ignore_ascii_case(TAG_SIZE) {
                    if size.is_some() || percent.is_some() {
                        zret.push(CacheError::config(
                            ln,
                            5,
                            format!("Line {ln} has field {TAG_SIZE} more than once"),
                        ));
                        continue;
                    }
                    match split_number(value) {
                        Some((n, "")) => {
                            let mb = Megabytes::new(n as i64);
                            let blocks = CacheStripeBlocks::round_up(mb);
                            if blocks.bytes() != mb.bytes() {
                                zret.push(CacheError::config(
                                    ln,
                                    0,
                                    format!("Line {ln} size {n} was rounded up to {blocks}"),
                                ));
                            }
                            size = Some(blocks);
                        }
                        Some((n, "%")) => percent = Some(n as u32),
                        Some(_) => zret.push(CacheError::config(
                            ln,
                            3,
                            format!("Line {ln} has invalid value '{value}' for {TAG_SIZE} field"),
                        )),
                        None => zret.push(CacheError::config(
                            ln,
                            2,
                            format!("Line {ln} has invalid value '{value}' for {TAG_SIZE} field"),
                        )),
                    }
                } else if tag.eq_ignore_ascii_case(TAG_VOL) {
                    if idx.is_some() {
                        zret.push(CacheError::config(
                            ln,
                            6,
                            format!("Line {ln} has field {TAG_VOL} more than once"),
                        ));
                    } else if let Some(n) = parse_volume_index(value) {
                        idx = Some(n);
                    } else {
                        zret.push(CacheError::config(
                            ln,
                            4,
                            format!("Line {ln} has invalid value '{value}' for {TAG_VOL} field"),
                        ));
                    }
                }
            }

            let has_size = size.is_some() || percent.is_some();
            match idx {
                Some(idx) if has_size => {
                    debug!(line = ln, volume = idx, "volume configured");
                    self.volumes.push(VolumeSpec {
                        idx,
                        percent: percent.unwrap_or(0),
                        size: size.unwrap_or_default(),
                        alloc: CacheStripeBlocks::new(0),
                    });
                }
                _ => {
                    if !has_size {
                        zret.push(CacheError::config(
                            ln,
                            7,
                            format!("Line {ln} does not have the required field {TAG_SIZE}"),
                        ));
                    }
                    if idx.is_none() {
                        zret.push(CacheError::config(
                            ln,
                            8,
                            format!("Line {ln} does not have the required field {TAG_VOL}"),
                        ));
                    }
                }
            }
        }

        let total: u32 = self.volumes.iter().map(|v| v.percent).sum();
        if total > 100 {
            zret.push(CacheError::config(
                0,
                10,
                format!("Volume percent allocation {total} is more than 100%"),
            ));
        }
        zret
    }

    /// Set every volume's target size given `total` span capacity.
    pub fn convert_to_absolute(&mut self, total: CacheStripeBlocks) {
        for v in &mut self.volumes {
            v.alloc = if v.percent > 0 {
                CacheStripeBlocks::new((total.count() * i64::from(v.percent) + 99) / 100)
            } else {
                v.size
            };
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumeSpec> {
        self.volumes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
