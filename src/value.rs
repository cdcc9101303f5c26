//! Per-slot value: a quality witness flag plus a saturating occurrence count.
//!
//! Layout of the `b + 1` bit value: bit 0 is the witness flag, bits `1..=b`
//! hold the count, capped at `2^b - 1`.

use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualValue(u64);

impl QualValue {
    /// Witnessed at high quality, then contradicted by a low-quality occurrence.
    pub const SENTINEL: QualValue = QualValue(3);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        QualValue(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn witness(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub const fn count(self) -> u64 {
        self.0 >> 1
    }

    /// Largest count representable with `bits` count bits.
    #[inline]
    pub const fn max_count(bits: u32) -> u64 {
        u64::MAX >> (64 - bits)
    }

    /// Value after one more occurrence observed at quality `high`.
    /// `None` means the value stays as is.
    ///
    /// Checks run in a fixed order: witness against observation, then
    /// saturation, then increment.
    #[inline]
    pub fn next(self, high: bool, max_count: u64) -> Option<QualValue> {
        match (self.witness(), high) {
            (true, false) if self == Self::SENTINEL => None,
            (true, false) => Some(Self::SENTINEL),
            (false, true) => Some(QualValue(self.0 | 1)),
            _ if self.count() >= max_count => None,
            _ => Some(QualValue(self.0 + 2)),
        }
    }
}

impl fmt::Display for QualValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.count(), u8::from(self.witness()))
    }
}
