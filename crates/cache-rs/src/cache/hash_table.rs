//! Consistent assignment of lookup keys to stripes.
//!
//! Every stripe draws a number of pseudo-random tickets proportional to its size from a
//! generator seeded by its identifier. Table slots are evenly spaced over the 32 bit
//! range and each takes the stripe owning the first ticket at or past the slot.

use tracing::debug;

use crate::layout::dir_entry::DIR_TAG_WIDTH;
use crate::layout::units::{CacheStoreBlocks, Megabytes};
use crate::retention::volume::StripeRef;

/// VOL_HASH_TABLE_SIZE is prime so keys spread over every slot.
pub const VOL_HASH_TABLE_SIZE: usize = 32_707;
/// VOL_HASH_EMPTY marks a slot with no stripe.
pub const VOL_HASH_EMPTY: u16 = 0xFFFF;
/// VOL_HASH_ALLOC_SIZE is the stripe length that earns one ticket.
pub const VOL_HASH_ALLOC_SIZE: Megabytes = Megabytes::new(8);

/// A stripe taking part in the table.
#[derive(Clone, Copy, Debug)]
pub struct HashEntry {
    pub stripe: StripeRef,
    pub len: CacheStoreBlocks,
    pub hash_id: [u8; 16],
}

pub struct StripeHashTable {
    table: Vec<u16>,
    stripes: Vec<StripeRef>,
    /// Slots each stripe would get from its size alone.
    pub requested: Vec<u32>,
    /// Slots each stripe actually got.
    pub obtained: Vec<u32>,
}

/// `fold` reduces a 128 bit identifier to the generator seed.
#[must_use]
pub fn fold(hash_id: &[u8; 16]) -> u32 {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&hash_id[..8]);
    hi.copy_from_slice(&hash_id[8..]);
    (u64::from_le_bytes(lo) ^ u64::from_le_bytes(hi)) as u32
}

/// `next_rand` advances the linear congruential generator.
#[must_use]
pub const fn next_rand(seed: u32) -> u32 {
    seed.wrapping_mul(1_103_515_145).wrapping_add(12_345)
}

impl StripeHashTable {
    #[must_use]
    pub fn build(entries: &[HashEntry]) -> Self {
        let n = entries.len();
        let mut table = vec![VOL_HASH_EMPTY; VOL_HASH_TABLE_SIZE];
        let mut obtained = vec![0u32; n];
        let stripes = entries.iter().map(|e| e.stripe).collect();
        if n == 0 {
            return Self {
                table,
                stripes,
                requested: Vec::new(),
                obtained,
            };
        }

        let total: i64 = entries.iter().map(|e| e.len.bytes()).sum();
        let mut requested: Vec<u32> = entries
            .iter()
            .map(|e| {
                let share = i128::from(e.len.bytes()) * VOL_HASH_TABLE_SIZE as i128;
                (share / i128::from(total.max(1))) as u32
            })
            .collect();
        let used: u32 = requested.iter().sum();
        for i in 0..(VOL_HASH_TABLE_SIZE as u32).saturating_sub(used) {
            requested[i as usize % n] += 1;
        }

        let mut tickets: Vec<(u32, u16)> = Vec::new();
        for (i, e) in entries.iter().enumerate() {
            let count = (e.len.bytes() / VOL_HASH_ALLOC_SIZE.bytes()).max(1);
            let mut seed = fold(&e.hash_id);
            for _ in 0..count {
                seed = next_rand(seed);
                tickets.push((seed, i as u16));
            }
        }
        tickets.sort_by_key(|&(rval, _)| rval);

        let width = ((1u64 << 32) / VOL_HASH_TABLE_SIZE as u64) as u32;
        let last = tickets.len() - 1;
        let mut i = 0;
        for (j, slot) in table.iter_mut().enumerate() {
            let pos = width / 2 + j as u32 * width;
            while pos > tickets[i].0 && i < last {
                i += 1;
            }
            let idx = tickets[i].1;
            *slot = idx;
            obtained[usize::from(idx)] += 1;
        }

        for (i, (want, got)) in requested.iter().zip(&obtained).enumerate() {
            debug!(stripe = i, requested = want, got, "hash table share");
        }
        Self {
            table,
            stripes,
            requested,
            obtained,
        }
    }

    /// `slot_of` is the table slot a content key maps to.
    #[must_use]
    pub fn slot_of(key: &[u8; 16]) -> usize {
        let word = u32::from_le_bytes([key[8], key[9], key[10], key[11]]);
        ((word >> DIR_TAG_WIDTH) as usize) % VOL_HASH_TABLE_SIZE
    }

    #[must_use]
    pub fn lookup(&self, key: &[u8; 16]) -> Option<StripeRef> {
        let idx = self.table[Self::slot_of(key)];
        if idx == VOL_HASH_EMPTY {
            return None;
        }
        self.stripes.get(usize::from(idx)).copied()
    }

    #[must_use]
    pub fn slots(&self) -> &[u16] {
        &self.table
    }

    #[must_use]
    pub fn stripes(&self) -> &[StripeRef] {
        &self.stripes
    }
}
