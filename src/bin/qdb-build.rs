use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;
use quality_mer_db::*;
use std::path::PathBuf;

/// Build a quality-aware k-mer database from FASTA/FASTQ reads.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Read files (FASTA or FASTQ, optionally compressed)
    #[arg(required = true)]
    reads: Vec<PathBuf>,

    /// K-mer length (<= 31)
    #[arg(short = 'm', long = "mer")]
    k: usize,

    /// Initial hash size; accepts k, M and G suffixes
    #[arg(short, long, value_parser = parse_size)]
    size: usize,

    /// Number of count bits per value (1..=63)
    #[arg(short, long, default_value_t = 7)]
    bits: u32,

    /// Maximum number of reprobes
    #[arg(short, long = "reprobe", default_value_t = 126)]
    reprobe: u32,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Minimum quality, as a raw byte value
    #[arg(short = 'q', long)]
    min_qual_value: Option<u8>,

    /// Minimum quality, as a character
    #[arg(short = 'c', long)]
    min_qual_char: Option<String>,

    /// Output database path
    #[arg(short, long, default_value = "mer_database.qdb")]
    output: PathBuf,

    /// Reads per batch handed to the workers
    #[arg(long, default_value_t = 4096)]
    batch_size: usize,

    /// Seed of the hash matrix
    #[arg(long, default_value_t = 0x5EED_0F_D00D)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let threshold = QualThreshold::from_args(args.min_qual_value, args.min_qual_char.as_deref())?;
    let cfg = BuildConfig::default()
        .with_size(args.size)
        .with_bits(args.bits)
        .with_max_reprobe(args.reprobe)
        .threads(args.threads)
        .batch_size(args.batch_size)
        .qual_threshold(threshold)
        .seed(args.seed);
    cfg.validate(args.k)?;

    // Fail on an unwritable output before spending time on the reads
    let output = OutputFile::create(&args.output)
        .with_context(|| format!("Failed to open output file '{}'", args.output.display()))?;

    let (db, stats) = build_database_sync(&args.reads, args.k, &cfg)?;

    DatabaseWriter::new(&db)
        .cmdline(std::env::args())
        .write_output(output)
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;
    info!(
        "Wrote {}: k={}, size={}, bits={}, {} k-mers ({} dropped)",
        args.output.display(),
        db.k(),
        db.keys().size(),
        db.bits(),
        stats.kmers,
        stats.dropped
    );

    Ok(())
}
