//! Rectangular binary matrix over GF(2), used as the key set's hash function.
//!
//! The matrix has `rows` rows and `cols` columns and is stored column-major,
//! one `u64` per column (lower `rows` bits used). `times(v)` is the
//! matrix-vector product mod 2 of the lower `cols` bits of `v`.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MatrixParts")]
pub struct BinaryMatrix {
    rows: u32,
    cols: u32,
    columns: Vec<u64>,
}

/// Unchecked serialized form, validated by [`BinaryMatrix::from_columns`].
#[derive(Deserialize)]
struct MatrixParts {
    rows: u32,
    cols: u32,
    columns: Vec<u64>,
}

impl TryFrom<MatrixParts> for BinaryMatrix {
    type Error = String;

    fn try_from(p: MatrixParts) -> Result<Self, Self::Error> {
        let (rows, cols) = (p.rows, p.cols);
        BinaryMatrix::from_columns(rows, cols, p.columns)
            .ok_or_else(|| format!("inconsistent {rows}x{cols} hash matrix"))
    }
}

#[inline]
fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl BinaryMatrix {
    /// Random `rows x cols` matrix from a seeded generator.
    pub fn random(rows: u32, cols: u32, seed: u64) -> Self {
        assert!(rows <= 64 && cols <= 64, "matrix dimensions exceed 64");
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mask = low_mask(rows);
        let columns = (0..cols).map(|_| rng.random::<u64>() & mask).collect();
        Self {
            rows,
            cols,
            columns,
        }
    }

    /// Rebuild from serialized parts. `None` if the shape is inconsistent.
    pub fn from_columns(rows: u32, cols: u32, columns: Vec<u64>) -> Option<Self> {
        if rows > 64 || cols > 64 || columns.len() != cols as usize {
            return None;
        }
        let mask = low_mask(rows);
        if columns.iter().any(|&c| c & !mask != 0) {
            return None;
        }
        Some(Self {
            rows,
            cols,
            columns,
        })
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn columns(&self) -> &[u64] {
        &self.columns
    }

    /// `M · v` over GF(2).
    #[inline]
    pub fn times(&self, v: u64) -> u64 {
        let mut v = v & low_mask(self.cols);
        let mut res = 0u64;
        while v != 0 {
            let j = v.trailing_zeros() as usize;
            res ^= self.columns[j];
            v &= v - 1;
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_is_linear() {
        let m = BinaryMatrix::random(12, 40, 7);
        let (a, b) = (0x00AB_CDEF_1234u64, 0x0012_3456_789Au64);
        assert_eq!(m.times(a ^ b), m.times(a) ^ m.times(b));
        assert_eq!(m.times(0), 0);
        assert!(m.times(u64::MAX) < (1 << 12));
    }

    #[test]
    fn rejects_bad_shape() {
        assert!(BinaryMatrix::from_columns(4, 2, vec![1]).is_none());
        assert!(BinaryMatrix::from_columns(4, 1, vec![0x10]).is_none());
        assert!(BinaryMatrix::from_columns(4, 1, vec![0x0F]).is_some());
    }

    #[test]
    fn deserialization_checks_shape() {
        let m = BinaryMatrix::random(10, 18, 5);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(serde_json::from_str::<BinaryMatrix>(&json).unwrap(), m);
        let bad = r#"{"rows":4,"cols":1,"columns":[16]}"#;
        assert!(serde_json::from_str::<BinaryMatrix>(bad).is_err());
        let short = r#"{"rows":4,"cols":2,"columns":[1]}"#;
        assert!(serde_json::from_str::<BinaryMatrix>(short).is_err());
    }
}
