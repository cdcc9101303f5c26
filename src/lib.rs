//! Quality-aware k-mer database for read error correction.
//!
//! - Concurrent build: every canonical k-mer of a read set gets a saturating
//!   count and a quality witness bit, updated lock-free from many threads
//! - Values are packed `b + 1` bit fields; see [`QualValue`] for the update rule
//! - The key set hashes with a GF(2) matrix, so the slots of all single-base
//!   substitutions of a k-mer follow from one product and four XORs
//!   ([`SubstitutionOids`])
//! - Query-time access maps the serialized file read-only ([`MerDatabase`])
//!
//! See [`io`] for the on-disk layout.

pub mod bits_array;
mod builder;
mod database;
pub mod encode;
pub mod io;
pub mod matrix;
pub mod mer_array;
mod query;
mod substitution;
mod value;

#[cfg(feature = "async")]
pub use builder::build_database_async;
pub use builder::{
    BuildConfig, BuildError, ConfigError, MerCounter, QualThreshold, ReadRecord, ScanStats,
    build_database_sync, count_files, parse_size,
};
pub use database::{AddOutcome, QualityMerDb};
pub use encode::{canonical, decode_kmer, encode_kmer, revcomp};
pub use io::{DatabaseWriter, FORMAT_TAG, FileHeader, OutputFile};
pub use query::{DbError, MerDatabase, Neighbor};
pub use substitution::{LinearHash, SubstitutionOids};
pub use value::QualValue;
