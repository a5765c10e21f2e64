//! Benchmark harness: N threads each allocate a batch of randomly sized chunks
//! and then free them, once per strategy. Prints the bytes allocated by every
//! thread and the wall-clock time of each run.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use chunkalloc::{AllocatorConfig, ChunkAllocator, DEFAULT_SLAB_SIZE, Strategy};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Which {
    Locked,
    LockFree,
    Both,
}

#[derive(Debug, Parser)]
#[command(about = "Compare the lock-based and lock-free chunk allocators")]
struct Args {
    /// Worker threads per run.
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Allocations per thread.
    #[arg(short, long, default_value_t = 10_000)]
    iterations: usize,

    /// Largest request size; sizes are drawn from 1..=max-size.
    #[arg(long, default_value_t = 1024)]
    max_size: usize,

    /// Slab size in bytes.
    #[arg(long, default_value_t = DEFAULT_SLAB_SIZE)]
    slab_size: usize,

    #[arg(long, value_enum, default_value_t = Which::Both)]
    strategy: Which,
}

/// xorshift64*, one per thread so workers never share generator state.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

struct Report {
    bytes: usize,
    failures: usize,
}

fn worker(allocator: &dyn ChunkAllocator, seed: u64, iterations: usize, max_size: usize) -> Report {
    let mut rng = Rng(seed | 1);
    let mut report = Report { bytes: 0, failures: 0 };
    let mut chunks = Vec::with_capacity(iterations);

    for i in 0..iterations {
        let size = (rng.next() as usize % max_size) + 1;
        match allocator.allocate(size) {
            Ok(chunk) => {
                report.bytes += size;
                chunks.push(chunk);
            }
            Err(err) => {
                println!("Allocation failed at iteration {i}: {err}");
                report.failures += 1;
            }
        }
    }

    for chunk in chunks {
        allocator.free(chunk);
    }

    report
}

fn run(strategy: Strategy, args: &Args, config: AllocatorConfig) -> Duration {
    let allocator: Arc<dyn ChunkAllocator> = Arc::from(strategy.build(config));
    let start = Instant::now();

    let handles: Vec<_> = (0..args.threads)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            let (iterations, max_size) = (args.iterations, args.max_size);
            thread::spawn(move || worker(allocator.as_ref(), t as u64 + 1, iterations, max_size))
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(report) => println!(
                "{}: Thread completed. Total allocated: {} bytes ({} failures)",
                strategy.name(),
                report.bytes,
                report.failures
            ),
            Err(_) => eprintln!("{}: worker panicked", strategy.name()),
        }
    }

    let elapsed = start.elapsed();
    info!(strategy = strategy.name(), stats = ?allocator.stats(), "run finished");

    elapsed
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match AllocatorConfig::new(args.slab_size) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if args.max_size == 0 || args.max_size > config.chunk_capacity() {
        eprintln!(
            "max-size must be between 1 and {} for this slab size",
            config.chunk_capacity()
        );
        std::process::exit(2);
    }

    let strategies: &[Strategy] = match args.strategy {
        Which::Locked => &[Strategy::Locked],
        Which::LockFree => &[Strategy::LockFree],
        Which::Both => &Strategy::ALL,
    };

    for &strategy in strategies {
        println!("Testing {} allocator", strategy.name());
        let elapsed = run(strategy, &args, config);
        println!(
            "{}: Total time taken: {:.2} seconds\n",
            strategy.name(),
            elapsed.as_secs_f64()
        );
    }
}
