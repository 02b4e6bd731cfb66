//! Byte and block quantities with a fixed scale.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};


#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
/// Scalar counts units of `SCALE` bytes.
pub struct Scalar<const SCALE: i64>(i64);

pub type Bytes = Scalar<1>;
pub type Kilobytes = Scalar<1024>;
pub type Megabytes = Scalar<{ 1024 * 1024 }>;
pub type Gigabytes = Scalar<{ 1024 * 1024 * 1024 }>;
pub type Terabytes = Scalar<{ 1024 * 1024 * 1024 * 1024 }>;

/// Units of allocation for stripes.
pub type CacheStripeBlocks = Scalar<{ 128 * 1024 * 1024 }>;
/// Size of cache storage and of metadata storage units.
pub type CacheStoreBlocks = Scalar<{ 8 * 1024 }>;
/// Size unit for content stored in the cache.
pub type CacheDataBlocks = Scalar<512>;

impl<const SCALE: i64> Scalar<SCALE> {
    pub const SCALE: i64 = SCALE;

    #[inline]
    #[must_use]
    pub const fn new(count: i64) -> Self {
        Self(count)
    }

    #[inline]
    #[must_use]
    pub const fn count(self) -> i64 {
        self.0
    }

    #[inline]
    #[must_use]
    /// `bytes` returns the quantity in bytes.
    pub const fn bytes(self) -> i64 {
        self.0 * SCALE
    }

    #[inline]
    #[must_use]
    /// `from_bytes_up` is the smallest count covering `bytes`.
    pub const fn from_bytes_up(bytes: i64) -> Self {
        Self((bytes + SCALE - 1).div_euclid(SCALE))
    }

    #[inline]
    #[must_use]
    /// `from_bytes_down` is the largest count contained in `bytes`.
    pub const fn from_bytes_down(bytes: i64) -> Self {
        Self(bytes.div_euclid(SCALE))
    }

    #[inline]
    #[must_use]
    pub const fn round_up<const OTHER: i64>(value: Scalar<OTHER>) -> Self {
        Self::from_bytes_up(value.bytes())
    }

    #[inline]
    #[must_use]
    pub const fn round_down<const OTHER: i64>(value: Scalar<OTHER>) -> Self {
        Self::from_bytes_down(value.bytes())
    }

    /// Label used when printing a quantity of this unit.
    #[must_use]
    pub const fn label() -> &'static str {
        match SCALE {
            1 => "bytes",
            1024 => "KB",
            0x10_0000 => "MB",
            0x4000_0000 => "GB",
            0x100_0000_0000 => "TB",
            0x800_0000 => "stripe blocks",
            8192 => "store blocks",
            512 => "data blocks",
            _ => "units",
        }
    }
}

impl<const SCALE: i64> Add for Scalar<SCALE> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl<const SCALE: i64> Sub for Scalar<SCALE> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl<const SCALE: i64> AddAssign for Scalar<SCALE> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl<const SCALE: i64> SubAssign for Scalar<SCALE> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl<const SCALE: i64> Sum for Scalar<SCALE> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self(0), Add::add)
    }
}

impl<const SCALE: i64> fmt::Display for Scalar<SCALE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, Self::label())
    }
}
