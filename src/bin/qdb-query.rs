use anyhow::{Context, bail};
use clap::Parser;
use env_logger::Env;
use log::debug;
use quality_mer_db::*;
use std::path::PathBuf;

/// Query a quality-aware k-mer database.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Database produced by qdb-build
    db: PathBuf,

    /// K-mers to look up
    kmers: Vec<String>,

    /// Also list the stored substitutions at this base position
    #[arg(short, long)]
    position: Option<usize>,

    /// Print every stored k-mer instead
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let db = MerDatabase::open(&args.db)?;
    let k = db.k();
    debug!(
        "Opened {}: k={}, size={}, bits={}",
        db.path().display(),
        k,
        db.size(),
        db.bits()
    );

    if args.dump {
        for (key, val) in db.iter() {
            println!("{}\t{}\t{}", decode_kmer(key, k), val.count(), u8::from(val.witness()));
        }
        return Ok(());
    }

    for s in &args.kmers {
        if s.len() != k {
            bail!("'{s}' is not a {k}-mer");
        }
        let key = encode_kmer(s.as_bytes()).with_context(|| format!("'{s}' is not DNA"))?;
        match db.lookup(key) {
            Some(val) => println!("{s}\t{}\t{}", val.count(), u8::from(val.witness())),
            None => println!("{s}\tabsent"),
        }
        if let Some(pos) = args.position {
            for n in db.best_substitution_neighbors(key, pos)? {
                println!(
                    "  {}{}\t{}\t{}\t{}",
                    pos,
                    n.base_char(),
                    decode_kmer(n.key, k),
                    n.value.count(),
                    u8::from(n.value.witness())
                );
            }
        }
    }
    Ok(())
}
