//! On-disk format: length-prefixed JSON header, then key words, then value words.
//!
//! ```text
//! u64 LE   header length in bytes
//! [u8]     JSON header
//! padding  zero bytes up to an 8-byte boundary (= header offset)
//! [u64]    key words   (size entries, little-endian)
//! [u64]    value words (little-endian)
//! ```

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

use crate::database::QualityMerDb;
use crate::matrix::BinaryMatrix;
use crate::query::DbError;

/// Format tag identifying a quality-aware k-mer database.
pub const FORMAT_TAG: &str = "binary/quality_mer_db";

/// Upper bound on a sane header, to reject garbage before allocating.
const MAX_HEADER_LEN: u64 = 16 << 20;

#[inline]
fn align8(pos: u64) -> u64 {
    (pos + 7) & !7
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub format: String,
    pub k: u32,
    /// Key width in bits (`2k`).
    pub key_len: u32,
    /// Count bits per value; each value occupies `bits + 1` bits.
    pub bits: u32,
    pub size: u64,
    pub max_reprobe: u32,
    pub matrix: BinaryMatrix,
    pub key_bytes: u64,
    pub value_bytes: u64,
    #[serde(default)]
    pub cmdline: Vec<String>,
    #[serde(default)]
    pub created: u64,
    /// Start of the key array; derived from the header length, not stored.
    #[serde(skip)]
    offset: u64,
}

impl FileHeader {
    /// Header describing `db` as it will be serialized.
    pub fn for_database(db: &QualityMerDb) -> Self {
        let keys = db.keys();
        FileHeader {
            format: FORMAT_TAG.to_string(),
            k: keys.k() as u32,
            key_len: 2 * keys.k() as u32,
            bits: db.bits(),
            size: keys.size() as u64,
            max_reprobe: keys.max_reprobe(),
            matrix: keys.matrix().clone(),
            key_bytes: keys.byte_len(),
            value_bytes: db.vals().byte_len(),
            cmdline: Vec::new(),
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            offset: 0,
        }
    }

    pub fn with_cmdline<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        self.cmdline = args.into_iter().collect();
        self
    }

    /// Byte offset of the key array.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Write the length prefix, JSON and padding. Returns the offset of the
    /// first byte after the padding.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<u64, DbError> {
        let json = serde_json::to_vec(self)?;
        w.write_u64::<LE>(json.len() as u64)?;
        w.write_all(&json)?;
        let end = 8 + json.len() as u64;
        let offset = align8(end);
        w.write_all(&[0u8; 8][..(offset - end) as usize])?;
        Ok(offset)
    }

    /// Parse a header. The reader is left at the key array.
    ///
    /// A header whose format tag differs is rejected before its other fields
    /// are interpreted.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, DbError> {
        let len = r.read_u64::<LE>()?;
        if len > MAX_HEADER_LEN {
            return Err(DbError::Format(format!("header length {len} is too large")));
        }
        let mut json = vec![0u8; len as usize];
        r.read_exact(&mut json)?;
        let value: serde_json::Value = serde_json::from_slice(&json)?;
        let found = value.get("format").and_then(|f| f.as_str()).unwrap_or_default();
        if found != FORMAT_TAG {
            return Err(DbError::WrongFormat {
                path: PathBuf::new(),
                found: found.to_string(),
            });
        }
        let mut header: FileHeader = serde_json::from_value(value)?;
        let end = 8 + len;
        header.offset = align8(end);
        let mut pad = [0u8; 8];
        r.read_exact(&mut pad[..(header.offset - end) as usize])?;
        Ok(header)
    }
}

/// Serializes a built [`QualityMerDb`].
pub struct DatabaseWriter<'a> {
    db: &'a QualityMerDb,
    cmdline: Vec<String>,
}

impl<'a> DatabaseWriter<'a> {
    pub fn new(db: &'a QualityMerDb) -> Self {
        Self {
            db,
            cmdline: Vec::new(),
        }
    }

    /// Record the command line that produced the database.
    pub fn cmdline<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        self.cmdline = args.into_iter().collect();
        self
    }

    /// Header, keys and values to an arbitrary stream.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), DbError> {
        let header = FileHeader::for_database(self.db).with_cmdline(self.cmdline.clone());
        header.write_to(w)?;
        self.db.write(w)?;
        w.flush()?;
        Ok(())
    }

    /// Serialize through `out` and move it into place.
    pub fn write_output(&self, mut out: OutputFile) -> Result<(), DbError> {
        let mut w = BufWriter::new(out.tmp.as_file_mut());
        self.write(&mut w)?;
        drop(w);
        let path = out.path;
        out.tmp.persist(&path).map_err(|e| DbError::Open {
            path,
            source: e.error,
        })?;
        Ok(())
    }

    /// Serialize to `path`, replacing it only once the write succeeded.
    pub fn write_to(&self, path: &Path) -> Result<(), DbError> {
        self.write_output(OutputFile::create(path)?)
    }
}

/// Destination of a database being built.
///
/// The data goes to a temporary file next to `path`, which replaces `path`
/// only in [`DatabaseWriter::write_output`]. Dropping an uncommitted output
/// removes the temporary file and leaves `path` untouched.
pub struct OutputFile {
    path: PathBuf,
    tmp: NamedTempFile,
}

impl OutputFile {
    /// Fails now if `path` can't be written, before any work is done.
    pub fn create(path: &Path) -> Result<Self, DbError> {
        let open_err = |source| DbError::Open {
            path: path.to_path_buf(),
            source,
        };
        if path.is_dir() {
            return Err(open_err(std::io::Error::other("is a directory")));
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".qdb-")
            .tempfile_in(dir)
            .map_err(open_err)?;
        Ok(OutputFile {
            path: path.to_path_buf(),
            tmp,
        })
    }
}
