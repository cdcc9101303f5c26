//! Read-only query facade over a memory-mapped database file.

use memmap2::Mmap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::bits_array::{BitsLayout, RawBitsArray};
use crate::encode::{BASES, MAX_K, canonical, encode_kmer, kmer_mask, with_base};
use crate::io::FileHeader;
use crate::mer_array::RawMerArray;
use crate::substitution::{LinearHash, SubstitutionOids};
use crate::value::QualValue;

#[derive(Debug, Error)]
/// Errors returned when writing or opening a database.
pub enum DbError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file could not be opened or created.
    #[error("Can't open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The header could not be parsed.
    #[error("Can't parse header of file '{}': {reason}", path.display())]
    Header { path: PathBuf, reason: String },
    /// The header carries another format tag.
    #[error("Wrong type '{found}' for file '{}'", path.display())]
    WrongFormat { path: PathBuf, found: String },
    /// Header or payload is malformed.
    #[error("Invalid database: {0}")]
    Format(String),
    /// Header JSON error.
    #[error("Header JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Header fields disagree with each other or with the file length.
    #[error("Inconsistent dimensions in '{}': {reason}", path.display())]
    Dimensions { path: PathBuf, reason: String },
    /// Bytemuck cast failed.
    #[error("Cast error: {0}")]
    Cast(String),
    /// Substitution position outside the k-mer.
    #[error("position {position} is outside a {k}-mer")]
    Position { position: usize, k: usize },
}

/// A stored single-base variant of a queried k-mer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbor {
    /// 2-bit code of the base at the probed position.
    pub base: u8,
    /// The variant in the orientation of the query.
    pub key: u64,
    pub value: QualValue,
}

impl Neighbor {
    pub fn base_char(&self) -> char {
        BASES[self.base as usize] as char
    }
}

/// Database opened for queries. Cheap to clone and share between threads.
#[derive(Clone)]
pub struct MerDatabase {
    path: PathBuf,
    header: FileHeader,
    map: Arc<Mmap>,
    hash: Arc<LinearHash>,
    keys: Range<usize>,
    vals: Range<usize>,
    // Substitution terms, built on first use per position
    oid_cache: Vec<OnceLock<SubstitutionOids>>,
}

impl MerDatabase {
    /// Map `path` read-only and validate its header.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let file = File::open(path).map_err(|source| DbError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let header = FileHeader::read_from(&mut reader).map_err(|e| match e {
            DbError::WrongFormat { found, .. } => DbError::WrongFormat {
                path: path.to_path_buf(),
                found,
            },
            other => DbError::Header {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })?;
        validate_dimensions(&header).map_err(|reason| DbError::Dimensions {
            path: path.to_path_buf(),
            reason,
        })?;

        let file = reader.into_inner();
        let map = unsafe { memmap2::MmapOptions::new().map(&file)? };

        let offset = header.offset() as usize;
        let keys = offset..offset + header.key_bytes as usize;
        let vals = keys.end..keys.end + header.value_bytes as usize;
        if map.len() < vals.end {
            return Err(DbError::Dimensions {
                path: path.to_path_buf(),
                reason: format!("file holds {} bytes, expected {}", map.len(), vals.end),
            });
        }
        for range in [&keys, &vals] {
            bytemuck::try_cast_slice::<u8, u64>(&map[range.clone()])
                .map_err(|e| DbError::Cast(format!("{e:?}")))?;
        }

        let hash = Arc::new(LinearHash::new(header.matrix.clone(), header.size - 1));
        let oid_cache = (0..header.k).map(|_| OnceLock::new()).collect();
        Ok(MerDatabase {
            path: path.to_path_buf(),
            header,
            map: Arc::new(map),
            hash,
            keys,
            vals,
            oid_cache,
        })
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.header.k as usize
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.header.bits
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.header.size
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw_keys(&self) -> RawMerArray<'_> {
        let words = bytemuck::cast_slice::<u8, u64>(&self.map[self.keys.clone()]);
        RawMerArray::new(words, &self.hash, self.header.max_reprobe)
    }

    fn raw_vals(&self) -> RawBitsArray<'_> {
        let words = bytemuck::cast_slice::<u8, u64>(&self.map[self.vals.clone()]);
        RawBitsArray::new(words, self.header.bits + 1, self.header.size as usize)
    }

    /// Value of k-mer `key` in either orientation.
    pub fn lookup(&self, key: u64) -> Option<QualValue> {
        let k = self.k();
        let key = canonical(key & kmer_mask(k), k);
        let id = self.raw_keys().find(key)?;
        Some(QualValue::from_raw(self.raw_vals().get(id)))
    }

    /// Value of an ASCII k-mer. `None` if it has the wrong length, contains
    /// an ambiguous base, or is absent.
    pub fn lookup_seq(&self, kmer: &[u8]) -> Option<QualValue> {
        if kmer.len() != self.k() {
            return None;
        }
        self.lookup(encode_kmer(kmer)?)
    }

    /// Stored variants of `key` at `position` (the unchanged base included),
    /// best supported first: witness, then count, then base order.
    pub fn best_substitution_neighbors(
        &self,
        key: u64,
        position: usize,
    ) -> Result<Vec<Neighbor>, DbError> {
        let k = self.k();
        if position >= k {
            return Err(DbError::Position { position, k });
        }
        let key = key & kmer_mask(k);
        let oids = self.oid_cache[position]
            .get_or_init(|| SubstitutionOids::new(self.hash.clone(), position));
        let slots = oids.calc(key);
        let keys = self.raw_keys();
        let vals = self.raw_vals();

        let mut out = Vec::with_capacity(4);
        for base in 0..4u8 {
            let variant = with_base(key, k, position, base);
            let canon = canonical(variant, k);
            // Reverse-complement variants live at their canonical form's slot
            let start = if canon == variant {
                slots[base as usize]
            } else {
                self.hash.hash(canon)
            };
            if let Some(id) = keys.find_from(canon, start) {
                out.push(Neighbor {
                    base,
                    key: variant,
                    value: QualValue::from_raw(vals.get(id)),
                });
            }
        }
        out.sort_by(|a, b| {
            b.value
                .witness()
                .cmp(&a.value.witness())
                .then(b.value.count().cmp(&a.value.count()))
                .then(a.base.cmp(&b.base))
        });
        Ok(out)
    }

    /// Every stored `(canonical key, value)` pair in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, QualValue)> + '_ {
        let vals = self.raw_vals();
        self.raw_keys()
            .iter()
            .map(move |(id, key)| (key, QualValue::from_raw(vals.get(id))))
    }
}

fn validate_dimensions(h: &FileHeader) -> Result<(), String> {
    let k = h.k as usize;
    if k == 0 || k > MAX_K {
        return Err(format!("k = {k} is outside 1..={MAX_K}"));
    }
    if h.key_len != 2 * h.k {
        return Err(format!("key_len {} does not match k = {k}", h.key_len));
    }
    if !(1..=63).contains(&h.bits) {
        return Err(format!("bits = {} is outside 1..=63", h.bits));
    }
    if h.size == 0 || !h.size.is_power_of_two() {
        return Err(format!("size {} is not a power of two", h.size));
    }
    if h.matrix.cols() != h.key_len || h.matrix.rows() != h.size.trailing_zeros() {
        return Err(format!(
            "hash matrix is {}x{}, expected {}x{}",
            h.matrix.rows(),
            h.matrix.cols(),
            h.size.trailing_zeros(),
            h.key_len
        ));
    }
    let too_large = || format!("size {} is too large", h.size);
    let size = usize::try_from(h.size).map_err(|_| too_large())?;
    let key_bytes = h.size.checked_mul(8).ok_or_else(too_large)?;
    if h.key_bytes != key_bytes {
        return Err(format!("key_bytes {} for size {}", h.key_bytes, h.size));
    }
    let value_bytes = (BitsLayout::new(h.bits + 1).words_for(size) as u64)
        .checked_mul(8)
        .ok_or_else(too_large)?;
    if h.value_bytes != value_bytes {
        return Err(format!("value_bytes {} for size {}", h.value_bytes, h.size));
    }
    // Both arrays must be addressable in memory
    key_bytes
        .checked_add(value_bytes)
        .and_then(|n| n.checked_add(h.offset()))
        .filter(|&n| usize::try_from(n).is_ok())
        .ok_or_else(too_large)?;
    Ok(())
}
