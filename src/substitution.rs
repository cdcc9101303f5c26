//! Slot ids of single-base substitutions in O(1), using the linearity of the
//! key set's hash over GF(2).
//!
//! `hash(key ^ d) = hash(key) ^ hash(d)`, so the hash of every variant at a
//! fixed position differs from the key's own hash by a precomputable term.
//! After one matrix product per position, each key costs one product plus
//! four XORs for all four candidates.

use std::sync::Arc;

use crate::encode::{base_at, base_shift};
use crate::matrix::BinaryMatrix;

/// A GF(2)-linear hash `key -> (M · key) & size_mask`.
///
/// Only a [`BinaryMatrix`] can back this type, which is what makes the
/// substitution arithmetic valid. A key set with a non-linear hash must not
/// hand out a `LinearHash`.
#[derive(Clone, Debug)]
pub struct LinearHash {
    matrix: BinaryMatrix,
    size_mask: u64,
}

impl LinearHash {
    pub fn new(matrix: BinaryMatrix, size_mask: u64) -> Self {
        Self { matrix, size_mask }
    }

    #[inline]
    pub fn matrix(&self) -> &BinaryMatrix {
        &self.matrix
    }

    #[inline]
    pub fn size_mask(&self) -> u64 {
        self.size_mask
    }

    /// K-mer length implied by the matrix width.
    #[inline]
    pub fn k(&self) -> usize {
        self.matrix.cols() as usize / 2
    }

    /// Home slot of `key` (start of its probe chain).
    #[inline]
    pub fn hash(&self, key: u64) -> u64 {
        self.matrix.times(key) & self.size_mask
    }

    /// Input bit-difference between a key holding `from` and the same key
    /// holding `to` at `position`.
    #[inline]
    pub fn delta(&self, position: usize, from: u8, to: u8) -> u64 {
        (((from ^ to) & 0b11) as u64) << base_shift(self.k(), position)
    }
}

/// Precomputed substitution terms for one base position.
#[derive(Clone, Debug)]
pub struct SubstitutionOids {
    hash: Arc<LinearHash>,
    position: usize,
    changes: [u64; 4],
}

impl SubstitutionOids {
    pub fn new(hash: Arc<LinearHash>, position: usize) -> Self {
        assert!(position < hash.k(), "position out of range");
        let mut changes = [0u64; 4];
        for (to, change) in changes.iter_mut().enumerate().skip(1) {
            *change = hash.hash(hash.delta(position, 0, to as u8));
        }
        Self {
            hash,
            position,
            changes,
        }
    }

    /// Home slots of `key` with base A, C, G, T at the configured position.
    #[inline]
    pub fn calc(&self, key: u64) -> [u64; 4] {
        let current = base_at(key, self.hash.k(), self.position) as usize;
        let base = self.hash.hash(key) ^ self.changes[current];
        [
            base,
            base ^ self.changes[1],
            base ^ self.changes[2],
            base ^ self.changes[3],
        ]
    }
}
