#![feature(test)]
extern crate test;
use test::Bencher;

use std::alloc::{GlobalAlloc as _, Layout};

mod repeated_allocation_deallocation {
    use super::*;

    /// Run a benchmark, which repeatedly allocates and deallocates the same
    /// block. The benchmark will allocate the given amount of blocks
    /// beforehand (before running the actual benchmark) in order to fill up
    /// the heap with unrelated allocations. Every pre-allocation occupies a
    /// minimal 32-byte block.
    ///
    /// # Panics
    /// This will panic, if the requested pre-allocations will fill up the
    /// whole heap (so the actual benchmark cannot allocate blocks anymore).
    fn benchmark_with_preallocation(b: &mut Bencher, pre_allocations: usize) {
        let allocator = segalloc::Allocator::<8192>::new();
        // fill up the heap; the allocation itself stays an exact-class hit,
        // so this mostly exercises the heap extension path
        for _ in 0..pre_allocations {
            unsafe { allocator.alloc(Layout::new::<u8>()) };
        }

        let layout = Layout::new::<u8>();

        // make sure, that there is enough room for the next allocation
        let ptr = unsafe { allocator.alloc(layout) };
        assert_ne!(ptr, std::ptr::null_mut::<u8>());
        unsafe { allocator.dealloc(ptr, layout) };

        // run actual benchmark: allocate & deallocate the same block repeatedly
        b.iter(|| {
            let ptr = unsafe { allocator.alloc(layout) };
            let ptr = test::black_box(ptr);
            unsafe { allocator.dealloc(ptr, layout) };
        });
    }

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 128);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 250);
    }
}

mod placement_paths {
    use super::*;

    /// Benchmark recycling a block of the given size. Sizes with an exact
    /// size class are answered by a head pop of their list; anything larger
    /// than 224 payload bytes goes through the first-fit scan of the
    /// overflow list instead.
    fn benchmark_with_size(b: &mut Bencher, size: usize) {
        let allocator = segalloc::Allocator::<{ 64 * 1024 }>::new();
        let layout = Layout::from_size_align(size, 8).unwrap();

        let ptr = unsafe { allocator.alloc(layout) };
        assert_ne!(ptr, std::ptr::null_mut::<u8>());
        unsafe { allocator.dealloc(ptr, layout) };

        b.iter(|| {
            let ptr = unsafe { allocator.alloc(layout) };
            let ptr = test::black_box(ptr);
            unsafe { allocator.dealloc(ptr, layout) };
        });
    }

    #[bench]
    fn exact_size_class(b: &mut Bencher) {
        benchmark_with_size(b, 128);
    }

    #[bench]
    fn overflow_list(b: &mut Bencher) {
        benchmark_with_size(b, 1000);
    }
}
