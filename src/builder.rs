//! Builders: quality-aware k-mer counting over FASTA/FASTQ files with a rayon
//! pool (sync) or from a tokio runtime (async feature).

use log::{debug, info, warn};
use needletail::parse_fastx_file;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::database::{AddOutcome, QualityMerDb};
use crate::encode::{MAP_LUT, MAX_K, RollingKmer};

/// Configuration problems, detected before any read is processed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Either a min-qual-value or min-qual-char must be provided.")]
    MissingQualThreshold,
    #[error("The min-qual-char should be one ASCII character (got {0:?}).")]
    BadQualChar(String),
    #[error("The number of bits should be between 1 and 63 (got {0}).")]
    Bits(u32),
    #[error("The k-mer length should be between 1 and {max} (got {0}).", max = MAX_K)]
    KmerLength(usize),
    #[error("Invalid size {0:?}.")]
    Size(String),
}

#[derive(Debug, Error)]
/// Errors returned by the builders.
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Can't read '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Can't start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Build task failed: {0}")]
    Join(String),
}

/// Quality cutoff: a base is high quality when its quality byte is strictly
/// greater than the threshold byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QualThreshold(pub u8);

impl QualThreshold {
    /// Resolve the command-line pair. The character form wins when both are
    /// given; the numeric form is the raw byte value.
    pub fn from_args(value: Option<u8>, ch: Option<&str>) -> Result<Self, ConfigError> {
        match (value, ch) {
            (_, Some(c)) => match c.as_bytes() {
                [b] if b.is_ascii() => Ok(QualThreshold(*b)),
                _ => Err(ConfigError::BadQualChar(c.to_string())),
            },
            (Some(v), None) => Ok(QualThreshold(v)),
            (None, None) => Err(ConfigError::MissingQualThreshold),
        }
    }

    #[inline]
    pub fn is_high(&self, q: u8) -> bool {
        q > self.0
    }
}

/// Parse a table size with an optional `k`, `M` or `G` suffix.
pub fn parse_size(s: &str) -> Result<usize, ConfigError> {
    let bad = || ConfigError::Size(s.to_string());
    let (digits, mult) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1_000usize),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1_000_000),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1_000_000_000),
        _ => (s, 1),
    };
    let n: usize = digits.trim().parse().map_err(|_| bad())?;
    let n = n.checked_mul(mult).ok_or_else(bad)?;
    if n == 0 { Err(bad()) } else { Ok(n) }
}

/// Build-time configuration.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    size: usize,
    bits: u32,
    max_reprobe: u32,
    threads: usize,
    batch_size: usize,
    qual_threshold: Option<QualThreshold>,
    seed: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            size: 1 << 20,
            bits: 7,
            max_reprobe: 126,
            threads: 1,
            batch_size: 4096,
            qual_threshold: None,
            seed: 0x5EED_0F_D00D,
        }
    }
}

impl BuildConfig {
    /// Initial table size; rounded up to a power of two. No resizing happens.
    pub fn with_size(mut self, n: usize) -> Self {
        self.size = n;
        self
    }
    /// Count bits per value (1..=63).
    pub fn with_bits(mut self, b: u32) -> Self {
        self.bits = b;
        self
    }
    /// Maximum number of reprobes before a key is declared not insertable.
    pub fn with_max_reprobe(mut self, r: u32) -> Self {
        self.max_reprobe = r;
        self
    }
    /// Worker threads (0 lets rayon decide).
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }
    /// Records handed to the pool per batch.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
    pub fn qual_threshold(mut self, t: QualThreshold) -> Self {
        self.qual_threshold = Some(t);
        self
    }
    /// Seed of the hash matrix.
    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    /// Check the configuration for `k`-mers and return the quality cutoff.
    pub fn validate(&self, k: usize) -> Result<QualThreshold, ConfigError> {
        let threshold = self.qual_threshold.ok_or(ConfigError::MissingQualThreshold)?;
        if !(1..=63).contains(&self.bits) {
            return Err(ConfigError::Bits(self.bits));
        }
        if k == 0 || k > MAX_K {
            return Err(ConfigError::KmerLength(k));
        }
        if self.size == 0 {
            return Err(ConfigError::Size(self.size.to_string()));
        }
        Ok(threshold)
    }

    /// Allocate an empty database for `k`-mers.
    pub fn new_database(&self, k: usize) -> Result<QualityMerDb, ConfigError> {
        self.validate(k)?;
        Ok(QualityMerDb::new(
            self.size,
            k,
            self.bits,
            self.max_reprobe,
            self.seed,
        ))
    }
}

/// One sequencing read. Missing quality means every base is low quality.
#[derive(Clone, Debug, Default)]
pub struct ReadRecord {
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
}

impl ReadRecord {
    pub fn new(seq: &[u8], qual: Option<&[u8]>) -> Self {
        Self {
            seq: seq.to_vec(),
            qual: qual.map(<[u8]>::to_vec),
        }
    }
}

/// Counters collected while scanning reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub reads: u64,
    pub kmers: u64,
    pub high_quality: u64,
    /// K-mers that found no slot.
    pub dropped: u64,
}

impl ScanStats {
    pub fn merge(mut self, o: ScanStats) -> ScanStats {
        self.reads += o.reads;
        self.kmers += o.kmers;
        self.high_quality += o.high_quality;
        self.dropped += o.dropped;
        self
    }
}

/// Feeds reads into a shared [`QualityMerDb`].
#[derive(Clone, Copy)]
pub struct MerCounter<'a> {
    db: &'a QualityMerDb,
    threshold: QualThreshold,
}

impl<'a> MerCounter<'a> {
    pub fn new(db: &'a QualityMerDb, threshold: QualThreshold) -> Self {
        Self { db, threshold }
    }

    /// Add every k-mer of one read.
    ///
    /// A k-mer is high quality when all of its bases are above the threshold.
    /// Ambiguous bases restart the window.
    pub fn scan_read(&self, seq: &[u8], qual: Option<&[u8]>) -> ScanStats {
        let k = self.db.k();
        let qual = qual.unwrap_or(&[]);
        let mut stats = ScanStats {
            reads: 1,
            ..Default::default()
        };
        let mut mer = RollingKmer::new(k);
        let mut high_len = 0usize;

        for (i, &b) in seq.iter().enumerate() {
            let v = MAP_LUT[b as usize];
            if v > 3 {
                mer.reset();
                high_len = 0;
                continue;
            }
            mer.push(v);
            match qual.get(i) {
                Some(&q) if self.threshold.is_high(q) => high_len += 1,
                _ => high_len = 0,
            }
            if mer.is_full() {
                let high = high_len >= k;
                stats.kmers += 1;
                stats.high_quality += high as u64;
                if self.db.add(mer.canonical(), high) == AddOutcome::Full {
                    stats.dropped += 1;
                }
            }
        }
        stats
    }

    /// Scan a batch of reads on the current rayon pool.
    pub fn scan_batch(&self, batch: &[ReadRecord]) -> ScanStats {
        batch
            .par_iter()
            .map(|r| self.scan_read(&r.seq, r.qual.as_deref()))
            .reduce(ScanStats::default, ScanStats::merge)
    }
}

fn parse_error(path: &Path, e: impl std::fmt::Display) -> BuildError {
    BuildError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Count the k-mers of every read in `paths` into `db`.
pub fn count_files(
    db: &QualityMerDb,
    paths: &[PathBuf],
    threshold: QualThreshold,
    cfg: &BuildConfig,
) -> Result<ScanStats, BuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.threads)
        .build()?;
    let counter = MerCounter::new(db, threshold);
    let mut total = ScanStats::default();

    for path in paths {
        let mut reader = parse_fastx_file(path).map_err(|e| parse_error(path, e))?;
        info!("Counting k-mers in {}", path.display());
        loop {
            let mut block: Vec<ReadRecord> = Vec::with_capacity(cfg.batch_size);
            while block.len() < cfg.batch_size {
                let Some(item) = reader.next() else { break };
                let rec = item.map_err(|e| parse_error(path, e))?;
                block.push(ReadRecord::new(&rec.seq(), rec.qual()));
            }
            if block.is_empty() {
                break;
            }
            let stats = pool.install(|| counter.scan_batch(&block));
            debug!(
                "batch: {} reads, {} k-mers, {} dropped",
                stats.reads, stats.kmers, stats.dropped
            );
            total = total.merge(stats);
        }
    }
    Ok(total)
}

/// Build a database synchronously using a rayon pool.
pub fn build_database_sync(
    paths: &[PathBuf],
    k: usize,
    cfg: &BuildConfig,
) -> Result<(QualityMerDb, ScanStats), BuildError> {
    let threshold = cfg.validate(k)?;
    let db = cfg.new_database(k)?;
    info!(
        "Building database: k={}, size={}, bits={}, reprobe={}, threads={}",
        k,
        db.keys().size(),
        db.bits(),
        db.keys().max_reprobe(),
        cfg.threads
    );

    let stats = count_files(&db, paths, threshold, cfg)?;

    info!(
        "Counted {} reads, {} k-mers ({} high quality)",
        stats.reads, stats.kmers, stats.high_quality
    );
    if stats.dropped > 0 {
        warn!(
            "{} k-mer occurrences dropped: table full (size {}, reprobe limit {})",
            stats.dropped,
            db.keys().size(),
            db.keys().max_reprobe()
        );
    }
    Ok((db, stats))
}

/// Build a database from an async context. The counting itself runs on a
/// blocking thread.
#[cfg(feature = "async")]
pub async fn build_database_async(
    paths: Vec<PathBuf>,
    k: usize,
    cfg: BuildConfig,
) -> Result<(QualityMerDb, ScanStats), BuildError> {
    tokio::task::spawn_blocking(move || build_database_sync(&paths, k, &cfg))
        .await
        .map_err(|e| BuildError::Join(e.to_string()))?
}
