use std::{fmt, path::PathBuf, str::FromStr};

use clap::Parser;

mod error;
pub(crate) use error::{Error, Result};

mod util;
mod workloads;

#[derive(Parser, Debug, Clone)]
#[clap(about = "Start bench testing")]
pub(crate) struct Args {
    /// Path of the store file.
    #[arg(long, required = true)]
    db: PathBuf,

    /// Size of each key.
    #[arg(short, long, default_value_t = 16)]
    key_size: u64,

    /// Size of each value.
    #[arg(short, long, default_value_t = 100)]
    value_size: u64,

    /// Number of key/values to place in the index.
    #[arg(short, long, default_value_t = 100000)]
    num: u64,

    /// Number of random reads, `num` when negative.
    #[arg(short, long, default_value_t = -1)]
    reads: i64,

    /// Commit after every N writes, only at the end when 0.
    #[arg(long, default_value_t = 1000)]
    commit_every: u64,

    /// The operations to be bench(separate with comma).
    /// example: `fillseq,readseq[W1]` will fillseq then readseq with 1 warmup.
    #[arg(short, long, default_value = "fillrandom,readseq,readrandom")]
    benchmarks: String,

    /// Name of the index the benchmarks run against.
    #[arg(long, default_value = "bench")]
    index: String,

    /// If true, do not remove an existing store file first.
    #[arg(long, default_value_t = false)]
    use_existing_db: bool,

    /// Number of clean pages cached by the page store.
    #[arg(long, default_value_t = 1024)]
    cache_capacity: usize,

    /// If true, commits do not sync to disk.
    #[arg(long, default_value_t = false)]
    no_sync: bool,

    /// Base seed for random.
    /// derived from the current time when it's 0.
    #[arg(long, default_value_t = 0)]
    seed_base: u64,

    /// Enable collect histogram.
    #[arg(long, default_value_t = false)]
    hist: bool,

    /// Print page store statistics after each benchmark.
    #[arg(long, default_value_t = false)]
    db_stats: bool,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct BenchOperation {
    repeat_count: u64,
    warmup_count: u64,
    benchmark_type: BenchmarkType,
}

#[derive(Debug, Copy, Clone)]
enum BenchmarkType {
    Fillseq,
    FillRandom,
    ReadSeq,
    ReadRandom,
    UpdateRandom,
}

impl FromStr for BenchmarkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "fillseq" => BenchmarkType::Fillseq,
            "fillrandom" => BenchmarkType::FillRandom,
            "readseq" => BenchmarkType::ReadSeq,
            "readrandom" => BenchmarkType::ReadRandom,
            "updaterandom" => BenchmarkType::UpdateRandom,
            _ => return Err(Error::Benchmark(s.to_owned())),
        })
    }
}

impl fmt::Display for BenchmarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BenchmarkType::Fillseq => "fillseq",
            BenchmarkType::FillRandom => "fillrandom",
            BenchmarkType::ReadSeq => "readseq",
            BenchmarkType::ReadRandom => "readrandom",
            BenchmarkType::UpdateRandom => "updaterandom",
        })
    }
}

pub(crate) fn run(config: Args) -> Result<()> {
    let mut workloads = workloads::Workloads::prepare(config)?;
    workloads.execute()?;
    workloads.close()
}
