//! Bit-packed array of fixed-width values with atomic per-entry access.
//!
//! `64 / bits` entries are packed into each `u64` word and never straddle a
//! word boundary, so every entry can be updated with a single word CAS.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian as LE, WriteBytesExt};

/// Geometry shared by the atomic array and its read-only view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitsLayout {
    bits: u32,
    per_word: usize,
    mask: u64,
}

impl BitsLayout {
    pub fn new(bits: u32) -> Self {
        assert!((1..=64).contains(&bits), "entry width must be 1..=64 bits");
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        Self {
            bits,
            per_word: 64 / bits as usize,
            mask,
        }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of words needed for `len` entries.
    #[inline]
    pub fn words_for(&self, len: usize) -> usize {
        len.div_ceil(self.per_word)
    }

    #[inline]
    fn locate(&self, id: usize) -> (usize, u32) {
        (id / self.per_word, ((id % self.per_word) as u32) * self.bits)
    }

    #[inline]
    fn extract(&self, word: u64, shift: u32) -> u64 {
        (word >> shift) & self.mask
    }
}

pub struct AtomicBitsArray {
    layout: BitsLayout,
    len: usize,
    words: Vec<AtomicU64>,
}

impl AtomicBitsArray {
    /// Zero-filled array of `len` entries of `bits` bits.
    pub fn new(bits: u32, len: usize) -> Self {
        let layout = BitsLayout::new(bits);
        let words = (0..layout.words_for(len)).map(|_| AtomicU64::new(0)).collect();
        Self { layout, len, words }
    }

    #[inline]
    pub fn layout(&self) -> BitsLayout {
        self.layout
    }

    #[inline]
    pub fn get(&self, id: usize) -> u64 {
        debug_assert!(id < self.len);
        let (w, shift) = self.layout.locate(id);
        self.layout.extract(self.words[w].load(Ordering::Acquire), shift)
    }

    /// Replace entry `id` with `new` if it still holds `expected`.
    ///
    /// Returns false when the entry changed underneath; concurrent writes to
    /// neighbouring entries of the same word are retried internally.
    pub fn compare_and_swap(&self, id: usize, expected: u64, new: u64) -> bool {
        debug_assert!(id < self.len);
        debug_assert!(new & !self.layout.mask == 0);
        let (w, shift) = self.layout.locate(id);
        let word = &self.words[w];
        let field = self.layout.mask << shift;
        let mut current = word.load(Ordering::Acquire);
        loop {
            if self.layout.extract(current, shift) != expected {
                return false;
            }
            let next = (current & !field) | (new << shift);
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Size in bytes of the serialized words.
    pub fn byte_len(&self) -> u64 {
        (self.words.len() * std::mem::size_of::<u64>()) as u64
    }

    /// Write the raw words, little-endian.
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for word in &self.words {
            w.write_u64::<LE>(word.load(Ordering::Acquire))?;
        }
        Ok(())
    }
}

/// Read-only view over serialized words.
#[derive(Clone, Copy)]
pub struct RawBitsArray<'a> {
    layout: BitsLayout,
    len: usize,
    words: &'a [u64],
}

impl<'a> RawBitsArray<'a> {
    pub fn new(words: &'a [u64], bits: u32, len: usize) -> Self {
        let layout = BitsLayout::new(bits);
        debug_assert!(words.len() >= layout.words_for(len));
        Self { layout, len, words }
    }

    #[inline]
    pub fn get(&self, id: usize) -> u64 {
        debug_assert!(id < self.len);
        let (w, shift) = self.layout.locate(id);
        self.layout.extract(u64::from_le(self.words[w]), shift)
    }
}
