//! Walks through the allocator contract: allocate a chunk, write into it, free
//! it, then allocate a bigger one that is carved from the same slab.
//!
//! Run with `RUST_LOG=debug` to see slab bootstraps and splits.

use chunkalloc::{ChunkAllocator, Strategy};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    for strategy in Strategy::ALL {
        println!("== {}", strategy.name());
        let allocator = strategy.build(Default::default());

        let mut first = match allocator.allocate(1024) {
            Ok(chunk) => chunk,
            Err(err) => {
                eprintln!("allocation failed: {err}");
                continue;
            }
        };
        println!("Allocated chunk at {:p} with size {} bytes", first.as_ptr(), first.size());

        let greeting = b"Hello, World!";
        let payload = unsafe { first.as_mut_slice() };
        payload[..greeting.len()].copy_from_slice(greeting);
        println!("Data in chunk: {}", String::from_utf8_lossy(&payload[..greeting.len()]));

        allocator.free(first);

        match allocator.allocate(2048) {
            Ok(second) => {
                println!("Allocated chunk at {:p} with size {} bytes", second.as_ptr(), second.size());
                allocator.free(second);
            }
            Err(err) => eprintln!("allocation failed: {err}"),
        }

        println!("{:?}", allocator.stats());
    }
}
