//! Write/read throughput benchmark.
//!
//! Payloads are 1, 2 and 5 times each power of ten from 10 bytes up to
//! `5 * 10^size` bytes, so both inline and file-backed paths are exercised.

use std::time::{Duration, Instant};

use hdc_core::{Cache, Error};

/// Timings of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub writes: usize,
    pub write_time: Duration,
    pub reads: usize,
    pub read_time: Duration,
}

impl BenchReport {
    pub fn write_micros_per_record(&self) -> f64 {
        per_record(self.write_time, self.writes)
    }

    pub fn read_micros_per_record(&self) -> f64 {
        per_record(self.read_time, self.reads)
    }
}

fn per_record(elapsed: Duration, count: usize) -> f64 {
    if count == 0 { 0.0 } else { elapsed.as_secs_f64() * 1_000_000.0 / count as f64 }
}

/// Payload set for a benchmark of the given size exponent.
pub fn bench_data(size: u32) -> Vec<Vec<u8>> {
    (1..=size)
        .map_while(|exp| 10usize.checked_pow(exp)?.checked_mul(5))
        .flat_map(|five| [five / 5, five / 5 * 2, five])
        .map(|len| vec![0u8; len])
        .collect()
}

/// Write every payload `batch` times, then read every key `batch` times.
pub async fn run(cache: &Cache, batch: usize, size: u32) -> Result<BenchReport, Error> {
    let data = bench_data(size);
    let keys: Vec<String> = (0..data.len()).map(|i| format!("key-{i}")).collect();

    tracing::info!(batch, payloads = data.len(), largest = data.last().map_or(0, Vec::len), "starting writes");
    let start = Instant::now();
    for _ in 0..batch {
        for (key, payload) in keys.iter().zip(&data) {
            cache.set(key, payload, None).await?;
        }
    }
    let write_time = start.elapsed();

    tracing::info!(batch, keys = keys.len(), "starting reads");
    let start = Instant::now();
    for _ in 0..batch {
        for key in &keys {
            cache.get(key).await?;
        }
    }
    let read_time = start.elapsed();

    Ok(BenchReport { writes: batch * data.len(), write_time, reads: batch * keys.len(), read_time })
}
