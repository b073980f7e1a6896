use std::{
    collections::HashMap,
    io::Write,
    time::{Duration, Instant},
};

use hdrhistogram::Histogram;
use pagedb::page_store::PageStoreStats;
use rand::{distributions::Uniform, prelude::Distribution, rngs::SmallRng, RngCore, SeedableRng};

use super::BenchmarkType;

pub(super) enum GenMode {
    Random,
    Sequence,
}

pub(super) enum KeyGeneratorState {
    Random { rng: SmallRng },
    Sequence { last: u64 },
}

/// Generates fixed-size keys from numbers below `key_nums`.
pub(super) struct KeyGenerator {
    key_size: usize,
    key_nums: u64,
    state: KeyGeneratorState,
}

impl KeyGenerator {
    pub(super) fn new(mode: GenMode, key_size: usize, key_nums: u64, seed: u64) -> Self {
        let state = match mode {
            GenMode::Random => KeyGeneratorState::Random {
                rng: SmallRng::seed_from_u64(seed),
            },
            GenMode::Sequence => KeyGeneratorState::Sequence { last: 0 },
        };
        Self {
            key_size,
            key_nums: key_nums.max(1),
            state,
        }
    }

    pub(super) fn generate_key(&mut self, buf: &mut [u8]) {
        let num = match &mut self.state {
            KeyGeneratorState::Random { rng } => rng.next_u64() % self.key_nums,
            KeyGeneratorState::Sequence { last } => {
                *last = last.saturating_add(1);
                *last
            }
        };
        self.generate_from_num(num, buf)
    }

    /// Writes `val` big-endian at the front of the key so byte order follows
    /// numeric order, and zero-fills the rest.
    fn generate_from_num(&self, val: u64, buf: &mut [u8]) {
        let fill_size = self.key_size.min(8);
        buf[..fill_size].copy_from_slice(&val.to_be_bytes()[8 - fill_size..]);
        buf[fill_size..self.key_size].fill(0);
    }
}

/// Hands out slices of a block of printable random bytes.
pub(super) struct ValueGenerator {
    value_size: usize,
    data: Vec<u8>,
    pos: usize,
}

impl ValueGenerator {
    pub(super) fn new(value_size: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(301);
        let range = Uniform::new(0, 95);
        // ' ' to '~'
        let data = (0..value_size.max(100) * 4)
            .map(|_| b' ' + range.sample(&mut rng) as u8)
            .collect();
        Self {
            value_size,
            data,
            pos: 0,
        }
    }

    pub(super) fn generate_value(&mut self) -> &[u8] {
        if self.pos + self.value_size > self.data.len() {
            self.pos = 0;
        }
        self.pos += self.value_size;
        &self.data[self.pos - self.value_size..self.pos]
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub(super) enum OpType {
    Write,
    Read,
    Update,
    Commit,
}

pub(super) struct Stats {
    hist_enabled: bool,
    start: Instant,
    finish: Option<Instant>,
    last_op_finish: Option<Instant>,

    done_cnt: u64,
    not_found_cnt: u64,
    bytes: u64,
    next_report_cnt: u64,

    hist: HashMap<OpType, Histogram<u64>>,
    start_store_stats: PageStoreStats,
    store_stats: Option<PageStoreStats>,
}

impl Stats {
    pub(super) fn start(hist_enabled: bool, store_stats: PageStoreStats) -> Self {
        Self {
            hist_enabled,
            start: Instant::now(),
            finish: None,
            last_op_finish: None,
            done_cnt: 0,
            not_found_cnt: 0,
            bytes: 0,
            next_report_cnt: 100,
            hist: HashMap::new(),
            start_store_stats: store_stats,
            store_stats: None,
        }
    }

    pub(super) fn finish_operation(&mut self, typ: OpType, done: u64, not_found: u64, bytes: u64) {
        let now = Instant::now();
        let op_elapsed = now.duration_since(self.last_op_finish.unwrap_or(self.start));
        self.done_cnt += done;
        self.not_found_cnt += not_found;
        self.bytes += bytes;
        self.last_op_finish = Some(now);

        if self.hist_enabled {
            let t = (op_elapsed.as_micros() as u64).max(1);
            let hist = self.hist.entry(typ).or_insert_with(|| {
                Histogram::new_with_bounds(1, 60 * 60 * 1000 * 1000, 2)
                    .expect("histogram bounds are valid")
            });
            // Samples beyond an hour are clamped.
            hist.saturating_record(t);
        }

        if self.done_cnt >= self.next_report_cnt {
            self.next_report_cnt += if self.next_report_cnt < 1000 {
                100
            } else if self.next_report_cnt < 10000 {
                500
            } else if self.next_report_cnt < 50000 {
                5000
            } else if self.next_report_cnt < 100000 {
                10000
            } else if self.next_report_cnt < 500000 {
                50000
            } else {
                100000
            };
            print!("... finished {:30} ops\r", self.done_cnt);
            let _ = std::io::stdout().flush();
        }
    }

    pub(super) fn stop(&mut self, store_stats: PageStoreStats) {
        self.finish = Some(Instant::now());
        self.store_stats = Some(store_stats.sub(&self.start_store_stats));
    }

    pub(super) fn report(&self, bench: BenchmarkType, db_stats: bool) {
        let Some(finish) = self.finish else {
            return;
        };
        let elapsed = finish.duration_since(self.start);
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let bytes_rate = (self.bytes as f64 / 1024.0 / 1024.0) / secs;
        println!(
            "{:12} : {:11.3} micros/op {:.0} ops/sec, {:.3} sec, {} ops, {} not found; {:.1} MiB/s",
            bench.to_string(),
            micros_per_op(elapsed, self.done_cnt),
            self.done_cnt as f64 / secs,
            secs,
            self.done_cnt,
            self.not_found_cnt,
            bytes_rate,
        );
        if self.hist_enabled {
            display_hist(&self.hist);
        }
        if db_stats {
            if let Some(s) = &self.store_stats {
                println!(
                    "PageStoreStats: page_reads: {}, page_writes: {}, cache_hits: {}, cache_misses: {}, commits: {}, log_records: {}",
                    s.page_reads, s.page_writes, s.cache_hits, s.cache_misses, s.commits, s.log_records,
                );
            }
        }
    }
}

fn micros_per_op(elapsed: Duration, ops: u64) -> f64 {
    if ops == 0 {
        return 0.0;
    }
    elapsed.as_micros() as f64 / ops as f64
}

fn display_hist(hists: &HashMap<OpType, Histogram<u64>>) {
    for (op, hist) in hists {
        println!(
            "Percentiles_{:8?} : P50: {} us, P75: {} us, P99: {} us, P99.9: {} us, P99.99: {} us",
            op,
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.75),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.value_at_quantile(0.9999),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_keys_are_ordered() {
        let mut gen = KeyGenerator::new(GenMode::Sequence, 12, 100, 0);
        let mut a = vec![0; 12];
        let mut b = vec![0; 12];
        gen.generate_key(&mut a);
        gen.generate_key(&mut b);
        assert!(a < b);
        assert_eq!(&a[..8], &1u64.to_be_bytes());
        assert!(a[8..].iter().all(|&x| x == 0));

        let mut gen = KeyGenerator::new(GenMode::Sequence, 4, 100, 0);
        let mut short = vec![0; 4];
        gen.generate_key(&mut short);
        assert_eq!(short, [0, 0, 0, 1]);
    }

    #[test]
    fn values_have_fixed_size() {
        let mut gen = ValueGenerator::new(150);
        for _ in 0..10 {
            let v = gen.generate_value();
            assert_eq!(v.len(), 150);
            assert!(v.iter().all(|b| (b' '..=b'~').contains(b)));
        }
    }
}
