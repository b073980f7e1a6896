use std::{
    fs,
    time::{SystemTime, UNIX_EPOCH},
};

use log::info;
use pagedb::{Index, PageStoreOptions, Store, StoreOptions, MAX_KEY_LEN, MAX_VALUE_LEN};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{util::*, Args, BenchOperation, BenchmarkType, Error, Result};

pub(super) struct Workloads {
    config: Args,
    store: Store,
    bench_ops: Vec<BenchOperation>,
    seed_offset: u64,
}

impl Workloads {
    pub(super) fn prepare(config: Args) -> Result<Self> {
        let config = Self::process_config(config)?;
        let bench_ops = Self::parse_bench_ops(&config.benchmarks)?;
        if !config.use_existing_db && config.db.exists() {
            info!("Remove existing store {}", config.db.display());
            fs::remove_file(&config.db)?;
        }
        let mut page_store = PageStoreOptions::default();
        page_store.cache_capacity = config.cache_capacity;
        page_store.sync_on_commit = !config.no_sync;
        let mut options = StoreOptions::default();
        options.page_store = page_store;
        let store = Store::open_with(&config.db, options)?;
        Ok(Self {
            config,
            store,
            bench_ops,
            seed_offset: 0,
        })
    }

    pub(super) fn execute(&mut self) -> Result<()> {
        for bench_op in std::mem::take(&mut self.bench_ops) {
            if bench_op.warmup_count > 0 {
                println!(
                    "Warming up benchmark by running {} times",
                    bench_op.warmup_count
                );
            }
            for _ in 0..bench_op.warmup_count {
                self.exec_op(&bench_op)?;
            }
            if bench_op.repeat_count > 0 {
                println!("Running benchmark for {} times", bench_op.repeat_count);
            }
            for _ in 0..bench_op.repeat_count {
                let stats = self.exec_op(&bench_op)?;
                stats.report(bench_op.benchmark_type, self.config.db_stats);
            }
        }
        Ok(())
    }

    pub(super) fn close(self) -> Result<()> {
        Ok(self.store.close()?)
    }

    fn process_config(mut config: Args) -> Result<Args> {
        if config.key_size == 0 || config.key_size as usize > MAX_KEY_LEN {
            return Err(Error::Argument(format!(
                "key size must be in 1..={MAX_KEY_LEN}"
            )));
        }
        if config.value_size as usize > MAX_VALUE_LEN {
            return Err(Error::Argument(format!(
                "value size must not exceed {MAX_VALUE_LEN}"
            )));
        }
        if config.seed_base == 0 {
            config.seed_base = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(1);
            println!(
                "Set base_seed to {}, because base_seed is 0",
                config.seed_base
            )
        }
        Ok(config)
    }

    /// Parses a list like `fillseq,readseq[W1],readrandom[X3]`, where `W`
    /// sets the warmup count and `X` the repeat count.
    fn parse_bench_ops(benchmark_strs: &str) -> Result<Vec<BenchOperation>> {
        let mut benchs = Vec::new();
        for bench_str in benchmark_strs.split(',').map(str::trim) {
            if bench_str.is_empty() {
                continue;
            }
            let mut warmup_count = 0;
            let mut repeat_count = 1;
            let mut name = bench_str;
            if let Some(start) = bench_str.find('[') {
                let ctl = bench_str[start + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| Error::Benchmark(bench_str.to_owned()))?;
                let count = |s: &str| {
                    s.parse::<u64>()
                        .map_err(|_| Error::Benchmark(bench_str.to_owned()))
                };
                if let Some(w) = ctl.strip_prefix('W') {
                    warmup_count = count(w)?;
                } else if let Some(r) = ctl.strip_prefix('X') {
                    repeat_count = count(r)?.max(1);
                } else {
                    return Err(Error::Benchmark(bench_str.to_owned()));
                }
                name = &bench_str[..start];
            }
            benchs.push(BenchOperation {
                benchmark_type: name.parse()?,
                warmup_count,
                repeat_count,
            });
        }
        Ok(benchs)
    }

    fn next_seed(&mut self) -> u64 {
        self.seed_offset += 1;
        self.config.seed_base + self.seed_offset
    }

    fn index(&self) -> Result<Index<'_>> {
        Ok(match self.store.get_index(&self.config.index) {
            Ok(index) => index,
            Err(err) if err.kind() == pagedb::ErrorKind::IndexNotFound => {
                self.store.create_index(&self.config.index)?
            }
            Err(err) => return Err(err.into()),
        })
    }

    fn exec_op(&mut self, op: &BenchOperation) -> Result<Stats> {
        let seed = self.next_seed();
        let mut stats = Stats::start(self.config.hist, self.store.stats());
        match op.benchmark_type {
            BenchmarkType::Fillseq => self.do_write(&mut stats, GenMode::Sequence, seed)?,
            BenchmarkType::FillRandom => self.do_write(&mut stats, GenMode::Random, seed)?,
            BenchmarkType::ReadSeq => self.do_read_seq(&mut stats)?,
            BenchmarkType::ReadRandom => self.do_read_random(&mut stats, seed)?,
            BenchmarkType::UpdateRandom => self.do_update_random(&mut stats, seed)?,
        }
        stats.stop(self.store.stats());
        Ok(stats)
    }

    fn commit_if_due(&self, stats: &mut Stats, written: u64) -> Result<()> {
        let every = self.config.commit_every;
        if every > 0 && written % every == 0 {
            self.store.commit()?;
            stats.finish_operation(OpType::Commit, 0, 0, 0);
        }
        Ok(())
    }

    fn do_write(&self, stats: &mut Stats, mode: GenMode, seed: u64) -> Result<()> {
        let index = self.index()?;
        let key_size = self.config.key_size as usize;
        let mut key_gen = KeyGenerator::new(mode, key_size, self.config.num, seed);
        let mut value_gen = ValueGenerator::new(self.config.value_size as usize);
        let mut key = vec![0u8; key_size];
        for i in 1..=self.config.num {
            key_gen.generate_key(&mut key);
            let value = value_gen.generate_value();
            index.insert(&key, value)?;
            stats.finish_operation(OpType::Write, 1, 0, (key.len() + value.len()) as u64);
            self.commit_if_due(stats, i)?;
        }
        self.store.commit()?;
        Ok(())
    }

    fn do_read_seq(&self, stats: &mut Stats) -> Result<()> {
        let index = self.index()?;
        let mut cursor = index.open();
        cursor.find(b"")?;
        while let (Some(key), Some(value)) = (cursor.key(), cursor.value()) {
            let bytes = (key.len() + value.len()) as u64;
            stats.finish_operation(OpType::Read, 1, 0, bytes);
            cursor.next()?;
        }
        cursor.close();
        Ok(())
    }

    fn do_read_random(&self, stats: &mut Stats, seed: u64) -> Result<()> {
        let index = self.index()?;
        let key_size = self.config.key_size as usize;
        let mut key_gen = KeyGenerator::new(GenMode::Random, key_size, self.config.num, seed);
        let mut key = vec![0u8; key_size];
        let reads = u64::try_from(self.config.reads).unwrap_or(self.config.num);
        let mut cursor = index.open();
        for _ in 0..reads {
            key_gen.generate_key(&mut key);
            cursor.find(&key)?;
            if cursor.key_matches(&key) {
                let bytes = cursor.value().map_or(0, |v| v.len()) + key.len();
                stats.finish_operation(OpType::Read, 1, 0, bytes as u64);
            } else {
                stats.finish_operation(OpType::Read, 1, 1, 0);
            }
        }
        cursor.close();
        Ok(())
    }

    fn do_update_random(&self, stats: &mut Stats, seed: u64) -> Result<()> {
        let index = self.index()?;
        let key_size = self.config.key_size as usize;
        let mut key_gen = KeyGenerator::new(GenMode::Random, key_size, self.config.num, seed);
        let mut value_gen = ValueGenerator::new(self.config.value_size as usize);
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut key = vec![0u8; key_size];
        let mut cursor = index.open();
        for i in 1..=self.config.num {
            key_gen.generate_key(&mut key);
            cursor.find(&key)?;
            if cursor.key_matches(&key) {
                let value = value_gen.generate_value();
                // Mix in-place updates with remove and insert.
                if rng.gen_bool(0.5) {
                    cursor.update_value(value)?;
                } else {
                    cursor.remove()?;
                    index.insert(&key, value)?;
                }
                stats.finish_operation(OpType::Update, 1, 0, (key.len() + value.len()) as u64);
            } else {
                stats.finish_operation(OpType::Update, 1, 1, 0);
            }
            self.commit_if_due(stats, i)?;
        }
        cursor.close();
        self.store.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn failed_removal_is_reported() {
        let dir = tempdir().unwrap();
        // A directory cannot be removed as a store file.
        let db = dir.path().to_str().unwrap();
        let args = Args::try_parse_from(["bench", "--db", db, "--seed-base", "1"]).unwrap();
        assert!(matches!(Workloads::prepare(args), Err(Error::Io(_))));
        assert!(dir.path().exists());
    }

    #[test]
    fn parse_operations() {
        let ops = Workloads::parse_bench_ops("fillseq, readseq[W2],readrandom[X3]").unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0].benchmark_type, BenchmarkType::Fillseq));
        assert_eq!((ops[0].warmup_count, ops[0].repeat_count), (0, 1));
        assert_eq!((ops[1].warmup_count, ops[1].repeat_count), (2, 1));
        assert_eq!((ops[2].warmup_count, ops[2].repeat_count), (0, 3));
        assert!(Workloads::parse_bench_ops("fillsideways").is_err());
        assert!(Workloads::parse_bench_ops("readseq[Q1]").is_err());
        assert!(Workloads::parse_bench_ops("readseq[W1").is_err());
    }
}
