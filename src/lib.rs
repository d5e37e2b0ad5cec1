//! Segregated-fit memory allocator with boundary tags
//!
//! This crate provides a single type called [`Allocator`]. This type
//! implements the [`core::alloc::GlobalAlloc`]-trait, which is required to
//! use the [`alloc`-crate][alloc] on `#![no_std]`-targets. The allocator
//! manages a fixed-capacity heap region as a classic malloc-style heap:
//! boundary-tagged blocks, 15 segregated free lists, eager coalescing and a
//! footer-elision optimization that hands the footer bytes of allocated
//! blocks to the user.
//!
//! # Usage
//! The usage is simple: just copy and paste the following code snipped into
//! your binary crate and potentially adjust the number of bytes of the heap
//! (here 64K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every fancy collection which is
//! normally provided by the `std`.
//!
//! The minimal heap size is `64`, which holds the bootstrap layout plus one
//! minimal block, i.e. a single allocation of up to 24 bytes at a time.
//! Adjust the size as necessary, e.g. by doing a worst case calculation and
//! potentially adding some backup space of 10% (for example).
//!
//! # Heap layout
//! The heap is a single grow-only region. It starts with an 8-byte pad and
//! two sentinel blocks; user blocks live between them and the region only
//! ever grows at the epilogue end (the break is advanced by the minimal
//! aligned amount whenever no free block fits a request):
//! ```text
//! ┌────────┬─────────┬─────────┬─────────────────────────┬─────────┐
//! │ pad 8  │ PRO HDR │ PRO FTR │ ...... user blocks .....│ EPI HDR │
//! └────────┴─────────┴─────────┴─────────────────────────┴─────────┘
//! ```
//! Every block is framed by two 8-byte boundary tags carrying the payload
//! size and two status bits (block free / previous block free):
//! ```text
//! ┌────────┬──────────────────────────────┬────────┐
//! │ header │ payload (n·16 bytes, n ≥ 1)  │ footer │
//! └────────┴──────────────────────────────┴────────┘
//! ```
//! Payload sizes are multiples of 16 and payloads are 16-byte aligned, so
//! the four low tag bits are free to carry the status. A free block stores
//! two list links in its first 16 payload bytes, which makes 16 the minimum
//! payload and 32 the minimum block.
//!
//! # Finding blocks
//! Free blocks are kept in 15 doubly-linked LIFO lists: one list per exact
//! payload size 16, 32, …, 224 and a last list for everything else. A
//! request is served from the first non-empty exact list at or above its
//! size in constant time; only when all of those are empty is the overflow
//! list scanned first-fit. Oversize blocks are split if at least a minimal
//! block remains; freed blocks merge eagerly with free neighbors, so no two
//! free blocks are ever adjacent.
//!
//! # Footer elision
//! The footer of an *allocated* block carries no information the allocator
//! needs: the status travels in the next header's previous-block-free bit.
//! Those 8 bytes are therefore lent to the user, i.e. a block with a
//! 16-byte payload satisfies any request up to 24 bytes. The footer is
//! rewritten from the header when the block is freed.
//!
//! # Alignment
//! All returned pointers are 16-byte aligned. Layouts requesting an
//! alignment above 16 are refused with a null pointer, since a payload
//! anchor must stay exactly one word above its header.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod seg_allocator;

pub use seg_allocator::{CheckError, FreeError};

use seg_allocator::{SegAllocator, ALIGNMENT};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// The segregated-fit memory allocator.
///
/// This is the core type of this crate: it is an allocator with a predefined
/// heap size. Therefore the heap memory usage is statically limited to an
/// upper value, which also helps to prevent issues with heap/stack-smashes,
/// as the heap is counted to the static memory (e.g. `.data`/`.bss`-
/// sections). Such a smash might still happen though, if the stack pointer
/// grows into the heap, but the heap cannot grow into the stack pointer.
///
/// Its usage is simple: just copy and paste the following in the binary
/// crate you're developing. The memory size of the heap is `65536` or 64K in
/// this example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
/// ```
/// Also please refer to the [crate-level](crate)-documentation for
/// recommendations on the heap size and general usage.
///
/// The allocator core is strictly single-threaded; this wrapper serializes
/// all calls through a spin lock, which makes it usable as the global
/// allocator on multi-threaded targets as well.
pub struct Allocator<const N: usize>(spin::Mutex<SegAllocator<N>>);

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly
    /// when creating the allocator.
    ///
    /// Please see the [crate-level](crate)-documentation for recommendations
    /// on the heap size and general usage.
    ///
    /// # Panics
    /// This function will panic, if the supplied heap size, i.e. `N` is less
    /// than `64` or not divisible by `16`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(spin::Mutex::new(SegAllocator::new()))
    }

    /// Bootstrap the heap eagerly.
    ///
    /// This is entirely optional: the first allocation bootstraps the heap
    /// on demand. Calling it up front merely moves the (tiny) setup cost and
    /// reports whether the heap region is large enough. Repeated calls are
    /// no-ops reporting success.
    pub fn init(&self) -> bool {
        self.0.lock().init()
    }

    /// Run the heap invariant checker.
    ///
    /// Walks the whole heap linearly and all 15 segregated lists, verifying
    /// the block structure, the status bits, the footers of free blocks and
    /// the list membership. The first violation is reported as a
    /// [`CheckError`]; a consistent heap yields `Ok(())`.
    ///
    /// This is a diagnostic for tests and debugging sessions, not something
    /// to call on a hot path: its cost is linear in the heap size.
    pub fn check_heap(&self) -> Result<(), CheckError> {
        self.0.lock().check_heap()
    }
}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        extern "C" {
            fn write(fd: i32, buf: *const u8, count: usize) -> isize;
        }
        let msg = b"DEBUGALLOC entering alloc\n";
        unsafe { write(2, msg.as_ptr(), msg.len()) };
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        let mut guard = self.0.lock();
        let init_ok = guard.init();
        let r: *mut u8 = guard
            .alloc(layout.size())
            .map_or(ptr::null_mut(), |memory| memory.as_mut_ptr().cast());
        if r.is_null() {
            panic!(
                "DEBUGALLOC null N={} size={} align={} init_ok={}",
                N,
                layout.size(),
                layout.align(),
                init_ok
            );
        }
        r
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        extern "C" {
            fn write(fd: i32, buf: *const u8, count: usize) -> isize;
        }
        let msg = b"DEBUGALLOC entering alloc_zeroed\n";
        unsafe { write(2, msg.as_ptr(), msg.len()) };
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        let r: *mut u8 = self
            .0
            .lock()
            .calloc(1, layout.size())
            .map_or(ptr::null_mut(), |memory| memory.as_mut_ptr().cast());
        if r.is_null() {
            panic!(
                "DEBUGALLOC zeroed null N={} size={} align={}",
                N,
                layout.size(),
                layout.align(),
            );
        }
        r
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let freed = self.0.lock().free(ptr);
        debug_assert!(freed.is_ok(), "deallocating an invalid pointer");
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.0
            .lock()
            .realloc(ptr, new_size)
            .map_or(ptr::null_mut(), |memory| memory.as_mut_ptr().cast())
    }
}
