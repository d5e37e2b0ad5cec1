//! The segregated-fit allocator core and its support types.
//!
//! The allocator manages a single grow-only heap region ([`arena`]) carved
//! into blocks framed by boundary tags ([`tag`]). Free blocks are kept in a
//! 15-way segregated index ([`index`]); allocation searches the index, splits
//! oversize blocks and falls back to extending the heap, deallocation merges
//! neighbors eagerly. The whole structure is validated by the invariant
//! checker ([`check`]).
//!
//! Everything in here is single-threaded by design: callers provide their
//! own mutual exclusion (the public [`Allocator`](crate::Allocator) wraps
//! this type in a spin lock).

mod arena;
mod check;
mod index;
mod tag;

pub use arena::ALIGNMENT;
pub use check::CheckError;

use arena::{Arena, HeaderOffset};
use index::SegIndex;
use tag::Tag;

use core::mem::MaybeUninit;
use core::ptr;

/// Size of a header or footer word.
const WORD: usize = 8;

/// Smallest payload: a free block must hold its two list links.
const MIN_PAYLOAD: usize = 2 * WORD;

/// Smallest block: header + minimum payload + footer.
const MIN_BLOCK: usize = MIN_PAYLOAD + 2 * WORD;

/// Round `x` up to the next multiple of the payload alignment.
fn align_up(x: usize) -> usize {
    x.saturating_add(ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// The payload size needed to satisfy a request for `n` bytes.
///
/// An allocated block does not need its footer, so those 8 bytes are lent to
/// the user and only the rest must come out of the payload. The subtraction
/// saturates for tiny requests; the clamp then lifts the result to the
/// minimum payload.
fn required_payload(n: usize) -> usize {
    align_up(n.saturating_sub(WORD)).max(MIN_PAYLOAD)
}

/// An error occurred when calling `free()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// There is a double-free detected. An already freed-up block is freed up
    /// again.
    DoubleFreeDetected,
    /// An invalid pointer was freed up (either a pointer outside of the heap
    /// memory or one that does not anchor an allocated payload).
    AllocationNotFound,
}

/// The allocator core: a heap of boundary-tagged blocks plus the segregated
/// free-list index over it.
///
/// The heap starts out empty and bootstraps itself on first use (or via an
/// explicit [`init`](Self::init)): an 8-byte pad aligns the payloads, then an
/// allocated zero-size prologue block and a lone epilogue header fence off
/// the region in which user blocks live. Requests beyond the current break
/// grow the heap by the minimal aligned increment; memory is never returned.
pub struct SegAllocator<const N: usize> {
    arena: Arena<N>,
    index: SegIndex,
    prologue: Option<HeaderOffset>,
}

impl<const N: usize> SegAllocator<N> {
    /// Create a new, not yet bootstrapped allocator core.
    ///
    /// # Panics
    /// This function panics if the heap size is less than `64` (pad,
    /// sentinels and one minimal block) or not divisible by 16.
    pub const fn new() -> Self {
        assert!(N >= 64, "too small heap memory: minimum size is 64");
        assert!(N % 16 == 0, "memory size has to be divisible by 16");

        Self {
            arena: Arena::new(),
            index: SegIndex::new(),
            prologue: None,
        }
    }

    /// Bootstrap the initial heap layout. Returns `false` if the arena
    /// cannot hold it.
    ///
    /// The first 16-byte-aligned address is found by probing single bytes
    /// off the growth primitive, since it makes no alignment promise on its
    /// very first call. One probe byte plus 31 more yield the layout
    /// `[pad 8][prologue header][prologue footer][epilogue header]`, which
    /// puts every later payload on a 16-byte boundary.
    ///
    /// Calling this on an already bootstrapped allocator does nothing and
    /// reports success.
    pub fn init(&mut self) -> bool {
        if self.prologue.is_some() {
            return true;
        }

        let start = loop {
            let Some(offset) = self.arena.sbrk(1) else {
                return false;
            };
            if self.arena.addr_is_aligned(offset) {
                break offset;
            }
        };
        if self.arena.sbrk(4 * WORD - 1).is_none() {
            return false;
        }

        let prologue = HeaderOffset(start + WORD);
        let sentinel = Tag::new(0, false, false);
        self.arena.set_header(prologue, sentinel);
        self.arena.set_footer(prologue, sentinel);
        let epilogue = self.arena.next_header(prologue);
        self.arena.set_header(epilogue, sentinel);

        self.prologue = Some(prologue);
        true
    }

    /// Allocate a block able to hold `n` contiguous bytes.
    ///
    /// The returned slice is the block's full capacity: the payload plus the
    /// lent footer word, so it may be up to 8 bytes longer than requested.
    /// Returns `None` for a zero-size request or when the heap cannot grow
    /// any further; the heap is unchanged in the latter case.
    pub fn alloc(&mut self, n: usize) -> Option<&mut [MaybeUninit<u8>]> {
        if n == 0 {
            return None;
        }
        if !self.init() {
            return None;
        }

        // one extension always yields a block large enough for the request,
        // so a single retry suffices (no recursion)
        let header = match self.index.find_fit(&self.arena, n) {
            Some(header) => header,
            None => {
                if !self.extend(n) {
                    return None;
                }
                self.index.find_fit(&self.arena, n)?
            }
        };
        let header = self.place(header, n);
        self.debug_check();
        Some(self.arena.capacity_mut(header))
    }

    /// Release the block anchored by `ptr`, a payload address previously
    /// returned by [`alloc`](Self::alloc) and friends.
    ///
    /// The block is marked free, its footer is restored from the header (the
    /// user may have scribbled over the lent footer bytes), the neighbor's
    /// previous-block-free bit is raised and the block is filed back into
    /// the index before merging with any free neighbor.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), FreeError> {
        let h = self.locate(ptr)?;
        let tag = self.arena.header(h);
        if tag.is_free() {
            return Err(FreeError::DoubleFreeDetected);
        }

        let freed = tag.with_free(true);
        self.arena.set_header(h, freed);
        self.arena.set_footer(h, freed);
        let next = self.arena.next_header(h);
        let neighbor = self.arena.header(next).with_prev_free(true);
        self.arena.set_header(next, neighbor);

        self.index.insert(&mut self.arena, h);
        self.coalesce(h);
        self.debug_check();
        Ok(())
    }

    /// Resize the allocation anchored by `ptr` to `n` bytes.
    ///
    /// A null `ptr` allocates, `n == 0` frees. While the block's capacity
    /// covers `n` the pointer is returned unchanged; otherwise a new block
    /// is allocated, the whole old capacity is copied over and the old block
    /// is released.
    pub fn realloc(&mut self, ptr: *mut u8, n: usize) -> Option<&mut [MaybeUninit<u8>]> {
        if ptr.is_null() {
            return self.alloc(n);
        }
        if n == 0 {
            let freed = self.free(ptr);
            debug_assert!(freed.is_ok());
            return None;
        }

        let h = self.locate(ptr).ok()?;
        let capacity = self.arena.header(h).size() + WORD;
        if capacity >= n {
            return Some(self.arena.capacity_mut(h));
        }

        let new_ptr: *mut u8 = self.alloc(n)?.as_mut_ptr().cast();
        // the user may have written into the lent footer bytes, so the whole
        // old capacity travels along
        // SAFETY: the old block is still allocated while the new one is
        // carved, so the ranges are disjoint; the new capacity is at least
        // `n`, which exceeds the old capacity.
        unsafe { ptr::copy_nonoverlapping(ptr.cast_const(), new_ptr, capacity) };
        let freed = self.free(ptr);
        debug_assert!(freed.is_ok());

        let new_header = self.locate(new_ptr).ok()?;
        Some(self.arena.capacity_mut(new_header))
    }

    /// Allocate a zeroed block for `count` items of `n` bytes each.
    ///
    /// Returns `None` when the product overflows or is zero, or when the
    /// allocation itself fails.
    pub fn calloc(&mut self, count: usize, n: usize) -> Option<&mut [MaybeUninit<u8>]> {
        let total = count.checked_mul(n)?;
        let memory = self.alloc(total)?;
        memory[..total].fill(MaybeUninit::new(0));
        Some(memory)
    }

    /// Validate a payload pointer and convert it to its header offset.
    fn locate(&self, ptr: *const u8) -> Result<HeaderOffset, FreeError> {
        let Some(prologue) = self.prologue else {
            return Err(FreeError::AllocationNotFound);
        };
        let offset = self
            .arena
            .offset_of(ptr)
            .ok_or(FreeError::AllocationNotFound)?;
        // payloads are 16-byte aligned and live above the sentinels
        if !self.arena.addr_is_aligned(offset) || offset < prologue.payload() + 2 * WORD {
            return Err(FreeError::AllocationNotFound);
        }

        let h = HeaderOffset(offset - WORD);
        let size = self.arena.header(h).size();
        let end = offset.checked_add(size).and_then(|e| e.checked_add(WORD));
        if size < MIN_PAYLOAD || end.map_or(true, |end| end > self.arena.brk()) {
            return Err(FreeError::AllocationNotFound);
        }
        Ok(h)
    }

    /// Transition the free block at `h` to allocated, splitting off the
    /// tail first if enough remains for a block of its own. Returns the
    /// header of the allocated block.
    fn place(&mut self, h: HeaderOffset, n: usize) -> HeaderOffset {
        let need = required_payload(n);
        let size = self.arena.header(h).size();

        if size - need >= MIN_BLOCK {
            // shrink in place and re-file under the new class before carving
            // the tail, so the index stays size-consistent at every step
            self.index.remove(&mut self.arena, h);
            let shrunk = Tag::new(need, true, false);
            self.arena.set_header(h, shrunk);
            self.arena.set_footer(h, shrunk);
            self.index.insert(&mut self.arena, h);

            let tail = self.arena.next_header(h);
            let carved = Tag::new(size - need - 2 * WORD, true, false);
            self.arena.set_header(tail, carved);
            self.arena.set_footer(tail, carved);
            self.index.insert(&mut self.arena, tail);
        }

        self.index.remove(&mut self.arena, h);
        let allocated = self.arena.header(h).with_free(false);
        self.arena.set_header(h, allocated);
        let next = self.arena.next_header(h);
        let neighbor = self.arena.header(next).with_prev_free(false);
        self.arena.set_header(next, neighbor);
        h
    }

    /// Merge the free block at `h` with its lower neighbor if both are free.
    ///
    /// The 16 merged bytes are `h`'s former header and footer, which become
    /// payload of the combined block. Both blocks leave the index and the
    /// combined block re-enters it under its new class.
    fn coalesce_left(&mut self, h: HeaderOffset) {
        let tag = self.arena.header(h);
        if !tag.is_free() || !tag.prev_free() {
            return;
        }

        let prev = self.arena.prev_header(h);
        self.index.remove(&mut self.arena, h);
        self.index.remove(&mut self.arena, prev);

        let prev_tag = self.arena.header(prev);
        let merged = Tag::new(
            prev_tag.size() + 2 * WORD + tag.size(),
            true,
            prev_tag.prev_free(),
        );
        self.arena.set_header(prev, merged);
        self.arena.set_footer(prev, merged);
        self.index.insert(&mut self.arena, prev);
    }

    /// Merge `h` with its right neighbor, then with its left one. At most
    /// two merges happen per deallocation, which keeps the no-adjacent-free
    /// invariant without any scanning.
    fn coalesce(&mut self, h: HeaderOffset) {
        let next = self.arena.next_header(h);
        self.coalesce_left(next);
        self.coalesce_left(h);
    }

    /// Grow the heap by the smallest aligned increment able to serve a
    /// request for `n` bytes.
    ///
    /// The old epilogue header is recycled as the new block's header; a new
    /// epilogue is written behind the new footer. The fresh block is filed
    /// into the index and merged with a free block ending at the old break.
    fn extend(&mut self, n: usize) -> bool {
        let need = required_payload(n);
        let Some(increment) = need.checked_add(2 * WORD) else {
            return false;
        };
        let Some(payload) = self.arena.sbrk(increment) else {
            return false;
        };

        // the old break is exactly the new block's payload address, with the
        // old epilogue header one word below it
        let h = HeaderOffset(payload - WORD);
        let tag = Tag::new(need, true, self.arena.header(h).prev_free());
        self.arena.set_header(h, tag);
        self.arena.set_footer(h, tag);
        let epilogue = self.arena.next_header(h);
        self.arena.set_header(epilogue, Tag::new(0, false, true));

        self.index.insert(&mut self.arena, h);
        self.coalesce_left(h);
        true
    }

    /// Run the full invariant checker in debug builds; release builds
    /// compile this to nothing.
    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            if let Err(error) = self.check_heap() {
                panic!("heap invariant violated: {error}");
            }
        }
    }
}
