//! Concurrent open-addressing set of k-mer keys.
//!
//! Each slot is one `u64` word: `0` means empty, otherwise bit 63 is set and
//! the lower `2k` bits hold the key. A key is published by a single CAS on its
//! word, so a slot id handed out by [`MerArray::set`] always refers to a fully
//! inserted key. Collisions are resolved by linear reprobing, bounded by the
//! reprobe limit and the table size.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian as LE, WriteBytesExt};

use crate::matrix::BinaryMatrix;
use crate::substitution::LinearHash;

const OCCUPIED: u64 = 1 << 63;

#[inline]
fn tag(key: u64) -> u64 {
    key | OCCUPIED
}

#[inline]
fn reprobes(size: usize, max_reprobe: u32) -> usize {
    (max_reprobe as usize).min(size - 1)
}

/// Walk the probe chain starting at `start`. `load` reads the tagged word of
/// a slot.
#[inline]
fn find_from_with<F: Fn(usize) -> u64>(
    load: F,
    key: u64,
    start: u64,
    size_mask: u64,
    limit: usize,
) -> Option<usize> {
    let wanted = tag(key);
    for i in 0..=limit as u64 {
        let slot = ((start + i) & size_mask) as usize;
        match load(slot) {
            0 => return None,
            w if w == wanted => return Some(slot),
            _ => {}
        }
    }
    None
}

pub struct MerArray {
    k: usize,
    size: usize,
    max_reprobe: u32,
    hash: Arc<LinearHash>,
    keys: Vec<AtomicU64>,
}

impl MerArray {
    /// Table with at least `size` slots (rounded up to a power of two) for
    /// `k`-mers. The hash matrix is drawn from `seed`.
    pub fn new(size: usize, k: usize, max_reprobe: u32, seed: u64) -> Self {
        let size = size.max(1).next_power_of_two();
        let rows = size.trailing_zeros();
        let matrix = BinaryMatrix::random(rows, 2 * k as u32, seed);
        let hash = Arc::new(LinearHash::new(matrix, size as u64 - 1));
        let keys = (0..size).map(|_| AtomicU64::new(0)).collect();
        Self {
            k,
            size,
            max_reprobe,
            hash,
            keys,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn max_reprobe(&self) -> u32 {
        self.max_reprobe
    }

    #[inline]
    pub fn matrix(&self) -> &BinaryMatrix {
        self.hash.matrix()
    }

    /// The hash function, usable for substitution probing.
    #[inline]
    pub fn linear_hash(&self) -> &Arc<LinearHash> {
        &self.hash
    }

    /// Insert `key` or find its slot. Returns `(slot, is_new)`, or `None`
    /// when the probe chain is exhausted.
    pub fn set(&self, key: u64) -> Option<(usize, bool)> {
        let wanted = tag(key);
        let start = self.hash.hash(key);
        let mask = self.hash.size_mask();
        for i in 0..=reprobes(self.size, self.max_reprobe) as u64 {
            let slot = ((start + i) & mask) as usize;
            let word = &self.keys[slot];
            let mut current = word.load(Ordering::Acquire);
            if current == 0 {
                match word.compare_exchange(0, wanted, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return Some((slot, true)),
                    Err(actual) => current = actual,
                }
            }
            if current == wanted {
                return Some((slot, false));
            }
        }
        None
    }

    pub fn find(&self, key: u64) -> Option<usize> {
        find_from_with(
            |slot| self.keys[slot].load(Ordering::Acquire),
            key,
            self.hash.hash(key),
            self.hash.size_mask(),
            reprobes(self.size, self.max_reprobe),
        )
    }

    /// Occupied `(slot, key)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.keys.iter().enumerate().filter_map(|(slot, w)| {
            let w = w.load(Ordering::Acquire);
            (w != 0).then_some((slot, w & !OCCUPIED))
        })
    }

    pub fn byte_len(&self) -> u64 {
        (self.size * std::mem::size_of::<u64>()) as u64
    }

    /// Write the raw key words, little-endian.
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for word in &self.keys {
            w.write_u64::<LE>(word.load(Ordering::Acquire))?;
        }
        Ok(())
    }
}

/// Read-only view over serialized key words.
#[derive(Clone, Copy)]
pub struct RawMerArray<'a> {
    keys: &'a [u64],
    hash: &'a LinearHash,
    max_reprobe: u32,
}

impl<'a> RawMerArray<'a> {
    pub fn new(keys: &'a [u64], hash: &'a LinearHash, max_reprobe: u32) -> Self {
        debug_assert_eq!(keys.len() as u64, hash.size_mask() + 1);
        Self {
            keys,
            hash,
            max_reprobe,
        }
    }

    #[inline]
    fn load(&self, slot: usize) -> u64 {
        u64::from_le(self.keys[slot])
    }

    pub fn find(&self, key: u64) -> Option<usize> {
        self.find_from(key, self.hash.hash(key))
    }

    /// Probe for `key` starting at the precomputed home slot `start`.
    pub fn find_from(&self, key: u64, start: u64) -> Option<usize> {
        find_from_with(
            |slot| self.load(slot),
            key,
            start,
            self.hash.size_mask(),
            reprobes(self.keys.len(), self.max_reprobe),
        )
    }

    pub fn iter(self) -> impl Iterator<Item = (usize, u64)> + 'a {
        self.keys.iter().enumerate().filter_map(|(slot, &w)| {
            let w = u64::from_le(w);
            (w != 0).then_some((slot, w & !OCCUPIED))
        })
    }
}
