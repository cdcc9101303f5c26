//! K-mer encoding: 2-bit mapping, rolling reverse complement, canonicalization.
//!
//! Conventions
//! - Codes are **LSB-aligned**: a k-mer uses the lower `2k` bits of a `u64`.
//! - The first base of the string sits in the highest used bit pair.
//! - Base positions are counted from the first character of the k-mer string.
//! - `k` is limited to [`MAX_K`] so bit 63 stays free for the key set's tag.

/// Largest supported k-mer length.
pub const MAX_K: usize = 31;

/// Symbols in code order.
pub const BASES: [u8; 4] = *b"ACGT";

/// 256-entry LUT: ASCII → 2-bit (A=0, C=1, G=2, T/U=3), 0xFF for ambiguous.
pub static MAP_LUT: [u8; 256] = {
    const X: u8 = 0xFF;
    let mut t = [X; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t[b'U' as usize] = 3;
    t[b'u' as usize] = 3;
    t
};

/// 2-bit encoding via LUT: A=00, C=01, G=10, T=11. `None` if ambiguous.
#[inline]
pub fn map_base(b: u8) -> Option<u8> {
    let v = MAP_LUT[b as usize];
    if v <= 3 { Some(v) } else { None }
}

/// Mask covering the lower `2k` bits.
#[inline]
pub fn kmer_mask(k: usize) -> u64 {
    debug_assert!(k <= 32);
    if k == 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Encode a k-mer window. `None` if the window is empty, longer than
/// [`MAX_K`], or contains an ambiguous base.
#[inline]
pub fn encode_kmer(window: &[u8]) -> Option<u64> {
    let k = window.len();
    if k == 0 || k > MAX_K {
        return None;
    }
    let mut code: u64 = 0;
    for &b in window {
        let v = map_base(b)? as u64;
        code = (code << 2) | v;
    }
    Some(code)
}

/// Decode `code` back to an upper-case ASCII string of length `k`.
pub fn decode_kmer(code: u64, k: usize) -> String {
    (0..k).map(|pos| BASES[base_at(code, k, pos) as usize] as char).collect()
}

/// Reverse-complement a code (lower `2k` bits used).
#[inline]
pub fn revcomp(code: u64, k: usize) -> u64 {
    debug_assert!(k <= 32);
    let mut rc: u64 = 0;
    for i in 0..k {
        let base = (code >> (i * 2)) & 0b11;
        let comp = base ^ 0b11;
        let shift = (k - 1 - i) * 2;
        rc |= comp << shift;
    }
    rc
}

/// Smaller of `code` and its reverse complement.
#[inline]
pub fn canonical(code: u64, k: usize) -> u64 {
    code.min(revcomp(code, k))
}

/// Bit shift of the base at `position`.
#[inline]
pub fn base_shift(k: usize, position: usize) -> usize {
    debug_assert!(position < k);
    2 * (k - 1 - position)
}

/// 2-bit code of the base at `position`.
#[inline]
pub fn base_at(code: u64, k: usize, position: usize) -> u8 {
    ((code >> base_shift(k, position)) & 0b11) as u8
}

/// `code` with the base at `position` replaced by `base`.
#[inline]
pub fn with_base(code: u64, k: usize, position: usize, base: u8) -> u64 {
    let shift = base_shift(k, position);
    (code & !(0b11u64 << shift)) | (((base & 0b11) as u64) << shift)
}

/// Rolling forward and reverse-complement codes of the trailing `k` bases.
#[derive(Clone, Debug)]
pub struct RollingKmer {
    k: usize,
    mask: u64,
    fwd: u64,
    rc: u64,
    len: usize,
}

impl RollingKmer {
    pub fn new(k: usize) -> Self {
        assert!(k > 0 && k <= MAX_K, "k must be 1..={MAX_K}");
        Self {
            k,
            mask: kmer_mask(k),
            fwd: 0,
            rc: 0,
            len: 0,
        }
    }

    /// Shift a 2-bit base into both encodings.
    #[inline]
    pub fn push(&mut self, v: u8) {
        let v = (v & 0b11) as u64;
        self.fwd = ((self.fwd << 2) | v) & self.mask;
        self.rc = (self.rc >> 2) | ((v ^ 0b11) << (2 * (self.k - 1)));
        self.len += 1;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.fwd = 0;
        self.rc = 0;
        self.len = 0;
    }

    /// Number of valid bases pushed since the last reset.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once a full window is available.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.k
    }

    #[inline]
    pub fn forward(&self) -> u64 {
        self.fwd
    }

    #[inline]
    pub fn reverse(&self) -> u64 {
        self.rc
    }

    #[inline]
    pub fn canonical(&self) -> u64 {
        self.fwd.min(self.rc)
    }
}
