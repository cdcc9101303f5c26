//! Shared build-time structure: key set plus packed values.

use std::io::Write;

use crate::bits_array::AtomicBitsArray;
use crate::mer_array::MerArray;
use crate::value::QualValue;

/// Outcome of a single [`QualityMerDb::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The value changed.
    Updated,
    /// The key is present but the value was left as is (saturated counter or
    /// repeated conflict).
    Unchanged,
    /// No slot could be found for the key.
    Full,
}

/// K-mer keys with their quality values, updated concurrently by many threads.
pub struct QualityMerDb {
    keys: MerArray,
    vals: AtomicBitsArray,
    bits: u32,
    max_count: u64,
}

impl QualityMerDb {
    /// `size` slots (rounded up to a power of two), `bits` count bits per value.
    pub fn new(size: usize, k: usize, bits: u32, max_reprobe: u32, seed: u64) -> Self {
        assert!((1..=63).contains(&bits), "bits must be 1..=63");
        let keys = MerArray::new(size, k, max_reprobe, seed);
        let vals = AtomicBitsArray::new(bits + 1, keys.size());
        Self {
            keys,
            vals,
            bits,
            max_count: QualValue::max_count(bits),
        }
    }

    /// Record one occurrence of canonical `key` at quality `high`.
    pub fn add(&self, key: u64, high: bool) -> AddOutcome {
        let Some((id, _is_new)) = self.keys.set(key) else {
            return AddOutcome::Full;
        };
        let mut current = QualValue::from_raw(self.vals.get(id));
        loop {
            let Some(next) = current.next(high, self.max_count) else {
                return AddOutcome::Unchanged;
            };
            if self.vals.compare_and_swap(id, current.raw(), next.raw()) {
                return AddOutcome::Updated;
            }
            current = QualValue::from_raw(self.vals.get(id));
        }
    }

    /// Value stored for canonical `key`.
    pub fn get(&self, key: u64) -> Option<QualValue> {
        self.keys
            .find(key)
            .map(|id| QualValue::from_raw(self.vals.get(id)))
    }

    /// Every stored `(key, value)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (u64, QualValue)> + '_ {
        self.keys
            .iter()
            .map(|(id, key)| (key, QualValue::from_raw(self.vals.get(id))))
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.keys.k()
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn keys(&self) -> &MerArray {
        &self.keys
    }

    #[inline]
    pub fn vals(&self) -> &AtomicBitsArray {
        &self.vals
    }

    /// Write key words then value words.
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        self.keys.write(w)?;
        self.vals.write(w)
    }
}
