use quality_mer_db::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

fn key(s: &str) -> u64 {
    canonical(encode_kmer(s.as_bytes()).unwrap(), s.len())
}

#[test]
fn scenario_low_quality_base_clears_witness() {
    let db = QualityMerDb::new(64, 3, 7, 126, 1);
    let counter = MerCounter::new(&db, QualThreshold(b'5'));
    let stats = counter.scan_read(b"ACGTG", Some(b"I#III".as_slice()));
    assert_eq!(stats.kmers, 3);
    assert_eq!(stats.high_quality, 1);
    assert_eq!(stats.dropped, 0);

    // ACG and CGT are reverse complements of each other
    let acg = db.get(key("ACG")).unwrap();
    assert!(!acg.witness());
    assert_eq!(acg.count(), 2);
    assert_eq!(db.get(key("CGT")), Some(acg));

    let gtg = db.get(key("GTG")).unwrap();
    assert_eq!(key("GTG"), encode_kmer(b"CAC").unwrap());
    assert!(gtg.witness());
    assert_eq!(gtg.raw(), 1);
}

#[test]
fn scenario_high_then_low_is_sentinel() {
    let db = QualityMerDb::new(16, 4, 7, 126, 1);
    let x = key("ACCA");
    assert_eq!(db.add(x, true), AddOutcome::Updated);
    assert_eq!(db.get(x).map(QualValue::raw), Some(1));
    assert_eq!(db.add(x, false), AddOutcome::Updated);
    assert_eq!(db.get(x), Some(QualValue::SENTINEL));
    assert_eq!(db.add(x, false), AddOutcome::Unchanged);
}

#[test]
fn scenario_full_table_drops_update() {
    let db = QualityMerDb::new(1, 5, 7, 0, 1);
    let a = key("ACGTA");
    let b = key("CCCCC");
    assert_eq!(db.add(a, true), AddOutcome::Updated);
    assert_eq!(db.add(b, false), AddOutcome::Full);
    assert_eq!(db.get(a).map(QualValue::raw), Some(1));
    assert_eq!(db.get(b), None);

    let counter = MerCounter::new(&db, QualThreshold(b'5'));
    let stats = counter.scan_read(b"CCCCC", None);
    assert_eq!((stats.kmers, stats.dropped), (1, 1));
    assert_eq!(db.get(a).map(QualValue::raw), Some(1));
}

#[test]
fn saturation_keeps_count_and_still_conflicts() {
    let db = QualityMerDb::new(16, 4, 2, 126, 1);
    let x = key("GGTA");
    for _ in 0..5 {
        db.add(x, false);
    }
    assert_eq!(db.get(x).map(|v| (v.count(), v.witness())), Some((3, false)));
    assert_eq!(db.add(x, false), AddOutcome::Unchanged);
    db.add(x, true);
    assert_eq!(db.get(x).map(|v| (v.count(), v.witness())), Some((3, true)));
    assert_eq!(db.add(x, true), AddOutcome::Unchanged);
    db.add(x, false);
    assert_eq!(db.get(x), Some(QualValue::SENTINEL));
}

#[test]
fn ambiguous_bases_restart_window() {
    let db = QualityMerDb::new(64, 3, 7, 126, 1);
    let counter = MerCounter::new(&db, QualThreshold(b'5'));
    let stats = counter.scan_read(b"ACGNACGTNNA", Some(b"IIIIIIIIIII".as_slice()));
    assert_eq!(stats.kmers, 3);
    // ACG twice, CGT once: all three share the canonical key ACG
    assert_eq!(db.iter().count(), 1);
    let v = db.get(key("ACG")).unwrap();
    assert!(v.witness());
    assert_eq!(v.count(), 2);
}

#[test]
fn missing_or_short_quality_is_low() {
    let db = QualityMerDb::new(64, 3, 7, 126, 1);
    let counter = MerCounter::new(&db, QualThreshold(b'5'));
    counter.scan_read(b"AAAA", None);
    counter.scan_read(b"CCCCC", Some(b"III".as_slice()));
    let a = db.get(key("AAA")).unwrap();
    assert_eq!((a.count(), a.witness()), (2, false));
    // Only the first CCC window is fully covered by high-quality bytes
    let c = db.get(key("CCC")).unwrap();
    assert!(c.witness());
}

#[test]
fn concurrent_updates_are_not_lost() {
    let db = QualityMerDb::new(1024, 11, 20, 126, 7);
    let keys: Vec<u64> = (0..64u64).map(|i| canonical(i * 7919, 11)).collect();
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..500 {
                    for &k in &keys {
                        db.add(k, false);
                    }
                }
            });
        }
    });
    let distinct: std::collections::HashSet<u64> = keys.iter().copied().collect();
    for k in distinct {
        let dup = keys.iter().filter(|&&x| x == k).count() as u64;
        assert_eq!(db.get(k).map(|v| v.count()), Some(8 * 500 * dup));
    }
}

#[test]
fn concurrent_mixed_quality_keeps_witness() {
    let db = QualityMerDb::new(16, 6, 12, 126, 3);
    let x = key("ACGGTA");
    std::thread::scope(|s| {
        for t in 0..4 {
            let db = &db;
            s.spawn(move || {
                for i in 0..200 {
                    db.add(x, t == 0 && i == 100);
                }
            });
        }
    });
    assert!(db.get(x).unwrap().witness());
}

fn sample_reads() -> Vec<ReadRecord> {
    let genome: Vec<u8> = (0..2000u64)
        .map(|i| b"ACGT"[((i * 2654435761) >> 7) as usize % 4])
        .collect();
    (0..300)
        .map(|i| {
            let start = (i * 37) % (genome.len() - 100);
            let seq = &genome[start..start + 100];
            ReadRecord::new(seq, Some(&[b'I'; 100][..]))
        })
        .collect()
}

#[test]
fn parallel_scan_matches_sequential() {
    let reads = sample_reads();
    let threshold = QualThreshold(b'5');
    let seq_db = QualityMerDb::new(1 << 14, 15, 7, 126, 9);
    let par_db = QualityMerDb::new(1 << 14, 15, 7, 126, 9);

    let seq_stats = reads
        .iter()
        .map(|r| MerCounter::new(&seq_db, threshold).scan_read(&r.seq, r.qual.as_deref()))
        .fold(ScanStats::default(), ScanStats::merge);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    let par_stats = pool.install(|| MerCounter::new(&par_db, threshold).scan_batch(&reads));

    assert_eq!(seq_stats, par_stats);
    let a: HashMap<u64, QualValue> = seq_db.iter().collect();
    let b: HashMap<u64, QualValue> = par_db.iter().collect();
    assert_eq!(a, b);
}

fn fastq_fixture() -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".fq").tempfile().unwrap();
    write!(f, "@r1\nACGTG\n+\nI#III\n@r2\nACGTNACGT\n+\nIIIIIIIII\n").unwrap();
    f.flush().unwrap();
    f
}

fn fixture_config() -> BuildConfig {
    BuildConfig::default()
        .with_size(64)
        .threads(2)
        .batch_size(1)
        .qual_threshold(QualThreshold(b'5'))
}

#[test]
fn build_from_fastq_file() {
    let f = fastq_fixture();
    let cfg = fixture_config();
    let (db, stats) = build_database_sync(&[f.path().to_path_buf()], 3, &cfg).unwrap();
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.kmers, 3 + 4);
    assert!(db.get(key("GTG")).unwrap().witness());
    // Low-quality hits from r1 and high-quality hits from r2 meet on ACG
    assert!(db.get(key("ACG")).unwrap().witness());
}

#[test]
fn missing_read_file_is_reported() {
    let cfg = BuildConfig::default().qual_threshold(QualThreshold(b'5'));
    let paths = [PathBuf::from("/nonexistent/reads.fq")];
    let err = build_database_sync(&paths, 5, &cfg).err().unwrap();
    assert!(matches!(err, BuildError::Parse { .. }));
}

#[cfg(feature = "async")]
#[tokio::test]
async fn async_build_matches_sync() {
    let f = fastq_fixture();
    let paths = vec![f.path().to_path_buf()];
    let (sync_db, sync_stats) = build_database_sync(&paths, 3, &fixture_config()).unwrap();
    let (async_db, async_stats) = build_database_async(paths, 3, fixture_config())
        .await
        .unwrap();
    assert_eq!(sync_stats, async_stats);
    let a: HashMap<u64, QualValue> = sync_db.iter().collect();
    let b: HashMap<u64, QualValue> = async_db.iter().collect();
    assert_eq!(a, b);
}

#[test]
fn unwritable_output_fails_before_counting() {
    let path = PathBuf::from("/nonexistent/dir/out.qdb");
    let err = OutputFile::create(&path).err().unwrap();
    assert!(matches!(err, DbError::Open { path: ref p, .. } if *p == path));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        OutputFile::create(dir.path()).err().unwrap(),
        DbError::Open { .. }
    ));
}

#[test]
fn failed_build_keeps_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads.qdb");
    let f = fastq_fixture();
    let (db, _) = build_database_sync(&[f.path().to_path_buf()], 3, &fixture_config()).unwrap();
    DatabaseWriter::new(&db).write_to(&path).unwrap();
    let before = std::fs::read(&path).unwrap();

    // Output opened, then the build fails and the output is dropped
    let out = OutputFile::create(&path).unwrap();
    let paths = [PathBuf::from("/nonexistent/reads.fq")];
    assert!(build_database_sync(&paths, 3, &fixture_config()).is_err());
    drop(out);

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(MerDatabase::open(&path).unwrap().lookup_seq(b"GTG").is_some());

    // A successful build replaces it
    let other = QualityMerDb::new(64, 3, 7, 126, 1);
    other.add(key("TTT"), true);
    let out = OutputFile::create(&path).unwrap();
    DatabaseWriter::new(&other).write_output(out).unwrap();
    let q = MerDatabase::open(&path).unwrap();
    assert!(q.lookup_seq(b"GTG").is_none());
    assert!(q.lookup_seq(b"TTT").unwrap().witness());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn config_errors() {
    assert_eq!(
        QualThreshold::from_args(None, None),
        Err(ConfigError::MissingQualThreshold)
    );
    assert_eq!(
        QualThreshold::from_args(None, Some("ab")),
        Err(ConfigError::BadQualChar("ab".into()))
    );
    assert_eq!(QualThreshold::from_args(Some(20), Some("5")), Ok(QualThreshold(b'5')));
    assert_eq!(QualThreshold::from_args(Some(40), None), Ok(QualThreshold(40)));

    let base = BuildConfig::default().qual_threshold(QualThreshold(b'5'));
    assert_eq!(BuildConfig::default().validate(5), Err(ConfigError::MissingQualThreshold));
    assert_eq!(base.clone().with_bits(0).validate(5), Err(ConfigError::Bits(0)));
    assert_eq!(base.clone().with_bits(64).validate(5), Err(ConfigError::Bits(64)));
    assert_eq!(base.clone().validate(32), Err(ConfigError::KmerLength(32)));
    assert_eq!(base.validate(31), Ok(QualThreshold(b'5')));
}

#[test]
fn size_suffixes() {
    assert_eq!(parse_size("100"), Ok(100));
    assert_eq!(parse_size("2k"), Ok(2_000));
    assert_eq!(parse_size("3M"), Ok(3_000_000));
    assert_eq!(parse_size("1G"), Ok(1_000_000_000));
    assert!(parse_size("0").is_err());
    assert!(parse_size("x1").is_err());
}
