//! Behavior both strategies must share, checked against a metered memory
//! source so slab bootstraps can be counted exactly.

mod common;

use std::sync::Arc;

use chunkalloc::{AllocError, AllocatorConfig, HEADER_SIZE, Strategy};
use common::{MeteredMemory, build};

#[test]
fn first_allocation_bootstraps_exactly_one_slab() {
    for strategy in Strategy::ALL {
        let source = Arc::new(MeteredMemory::unlimited());
        let allocator = build(strategy, Arc::clone(&source), AllocatorConfig::default());

        let chunk = allocator.allocate(1024).unwrap();
        assert_eq!(1024, chunk.size(), "{}", strategy.name());
        assert_eq!(1, source.requests(), "{}", strategy.name());
        assert_eq!(1, allocator.stats().splits, "{}", strategy.name());

        allocator.free(chunk);

        let bigger = allocator.allocate(2048).unwrap();
        assert_eq!(2048, bigger.size(), "{}", strategy.name());
        assert_eq!(1, source.requests(), "{}: no second bootstrap", strategy.name());

        allocator.free(bigger);
    }
}

#[test]
fn payload_is_writable_for_the_requested_size() {
    for strategy in Strategy::ALL {
        let allocator = strategy.build(AllocatorConfig::new(64 * 1024).unwrap());

        for size in [1, 7, 8, 100, 1000, 4096] {
            let mut chunk = allocator.allocate(size).unwrap();
            assert!(chunk.size() >= size);

            let payload = unsafe { chunk.as_mut_slice() };
            payload[..size].copy_from_slice(&vec![0x5A; size]);
            assert!(payload[..size].iter().all(|&b| b == 0x5A));

            allocator.free(chunk);
        }
    }
}

#[test]
fn refused_slab_surfaces_out_of_memory() {
    for strategy in Strategy::ALL {
        let source = Arc::new(MeteredMemory::limited(0));
        let config = AllocatorConfig::new(64 * 1024).unwrap();
        let allocator = build(strategy, Arc::clone(&source), config);

        let err = allocator.allocate(16).unwrap_err();
        assert_eq!(
            AllocError::OutOfMemory {
                slab_size: 64 * 1024
            },
            err,
            "{}",
            strategy.name()
        );

        // One request per attempt, nothing retried behind our back.
        assert_eq!(1, source.requests(), "{}", strategy.name());
        assert!(allocator.allocate(16).is_err());
        assert_eq!(2, source.requests(), "{}", strategy.name());
        assert_eq!(2, allocator.stats().failures, "{}", strategy.name());
    }
}

#[test]
fn pool_keeps_serving_after_the_source_runs_dry() {
    for strategy in Strategy::ALL {
        let source = Arc::new(MeteredMemory::limited(1));
        let config = AllocatorConfig::new(64 * 1024).unwrap();
        let allocator = build(strategy, Arc::clone(&source), config);

        let chunk = allocator.allocate(4096).unwrap();
        allocator.free(chunk);

        // Served from the existing pool, the dry source is never asked.
        for _ in 0..100 {
            let chunk = allocator.allocate(4096).unwrap();
            allocator.free(chunk);
        }
        assert_eq!(1, source.requests(), "{}", strategy.name());

        // Larger than anything left in the pool.
        let err = allocator
            .allocate(config.chunk_capacity() - HEADER_SIZE)
            .unwrap_err();
        assert!(err.is_out_of_memory(), "{}", strategy.name());
        assert_eq!(2, source.requests(), "{}", strategy.name());
    }
}

#[test]
fn requests_beyond_slab_capacity_fail_fast() {
    for strategy in Strategy::ALL {
        let source = Arc::new(MeteredMemory::unlimited());
        let config = AllocatorConfig::new(64 * 1024).unwrap();
        let allocator = build(strategy, Arc::clone(&source), config);

        for size in [config.chunk_capacity() + 1, config.slab_size(), usize::MAX] {
            let err = allocator.allocate(size).unwrap_err();
            assert!(err.is_out_of_memory(), "{}: {err}", strategy.name());
        }

        assert_eq!(0, source.requests(), "{}", strategy.name());
    }
}

#[test]
fn split_remainder_has_exact_size() {
    for strategy in Strategy::ALL {
        let config = AllocatorConfig::new(64 * 1024).unwrap();
        let allocator = strategy.build(config);
        let capacity = config.chunk_capacity();

        let head = allocator.allocate(1024).unwrap();
        let tail = allocator.allocate(capacity - 1024 - HEADER_SIZE).unwrap();

        assert_eq!(capacity - 1024 - HEADER_SIZE, tail.size(), "{}", strategy.name());
        // Remainder header sits right after the truncated payload, its own
        // payload one header further.
        assert_eq!(head.addr_range().end, tail.header_addr());
        assert_eq!(head.addr_range().end + HEADER_SIZE, tail.addr_range().start);
        assert_eq!(1, allocator.stats().slabs_acquired, "{}", strategy.name());

        allocator.free(head);
        allocator.free(tail);
    }
}
