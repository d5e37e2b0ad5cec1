//! The heap invariant checker.
//!
//! [`SegAllocator::check_heap`] walks the whole heap twice: once linearly
//! from the prologue to the epilogue via the block sizes, and once across the
//! 15 segregated lists via the embedded links. Every invariant of the block
//! structure is verified on the way; the first violation is reported as a
//! typed [`CheckError`] so the caller can surface a diagnosis.
//!
//! The checker is pure observation, never recovery. Internal callers invoke
//! it through `debug_assert!`-style guards only, so release builds pay
//! nothing for it.

use super::arena::{Arena, HeaderOffset};
use super::index::{SegIndex, LIST_COUNT};
use super::{SegAllocator, WORD};

use core::fmt;

/// A heap invariant violation diagnosed by [`SegAllocator::check_heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    /// The prologue sentinel is not an allocated zero-size block.
    PrologueCorrupted,
    /// The epilogue sentinel is not an allocated zero-size block.
    EpilogueCorrupted,
    /// A block (or a list link) points outside the managed region.
    BlockOutOfBounds { at: usize },
    /// A previous-block-free bit contradicts the neighbor's free bit.
    PrevFreeBitMismatch { at: usize },
    /// Two adjacent blocks are both free, so coalescing was missed.
    AdjacentFreeBlocks { at: usize },
    /// Header and footer of a free block differ.
    FooterMismatch { at: usize },
    /// A free block is missing from the segregated lists.
    UnindexedFreeBlock { at: usize },
    /// An allocated block is still reachable through a segregated list.
    IndexedAllocatedBlock { at: usize },
    /// A segregated list contains a block that is not free.
    ListedBlockNotFree { at: usize, class: usize },
    /// A back link does not point to the block's list predecessor.
    BrokenBackLink { at: usize },
    /// A block sits in a list that does not match its size class.
    WrongSizeClass { at: usize, class: usize },
    /// The linear walk and the lists disagree about the free block count.
    FreeCountMismatch { heap: usize, lists: usize },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PrologueCorrupted => {
                write!(f, "prologue is not an allocated zero-size block")
            }
            Self::EpilogueCorrupted => {
                write!(f, "epilogue is not an allocated zero-size block")
            }
            Self::BlockOutOfBounds { at } => {
                write!(f, "block at offset {at} reaches past the break")
            }
            Self::PrevFreeBitMismatch { at } => write!(
                f,
                "previous-block-free bit of block at offset {at} contradicts its neighbor"
            ),
            Self::AdjacentFreeBlocks { at } => {
                write!(f, "block at offset {at} and its left neighbor are both free")
            }
            Self::FooterMismatch { at } => {
                write!(f, "header and footer of free block at offset {at} differ")
            }
            Self::UnindexedFreeBlock { at } => write!(
                f,
                "free block at offset {at} is missing from the segregated lists"
            ),
            Self::IndexedAllocatedBlock { at } => write!(
                f,
                "allocated block at offset {at} is reachable through a segregated list"
            ),
            Self::ListedBlockNotFree { at, class } => {
                write!(f, "list {class} contains the non-free block at offset {at}")
            }
            Self::BrokenBackLink { at } => write!(
                f,
                "back link of listed block at offset {at} does not point to its predecessor"
            ),
            Self::WrongSizeClass { at, class } => write!(
                f,
                "block at offset {at} sits in list {class} but its size maps elsewhere"
            ),
            Self::FreeCountMismatch { heap, lists } => write!(
                f,
                "heap walk found {heap} free blocks but the lists hold {lists}"
            ),
        }
    }
}

impl<const N: usize> SegAllocator<N> {
    /// Verify every heap invariant, returning the first violation found.
    ///
    /// On an allocator that has not bootstrapped yet there is nothing to
    /// check and the result is `Ok`.
    pub fn check_heap(&self) -> Result<(), CheckError> {
        let Some(prologue) = self.prologue else {
            return Ok(());
        };

        let tag = self.arena.header(prologue);
        if tag.size() != 0 || tag.is_free() {
            return Err(CheckError::PrologueCorrupted);
        }

        let heap_free_blocks = self.walk_blocks(prologue)?;
        let listed_blocks = self.walk_lists()?;
        if heap_free_blocks != listed_blocks {
            return Err(CheckError::FreeCountMismatch {
                heap: heap_free_blocks,
                lists: listed_blocks,
            });
        }
        Ok(())
    }

    /// Linear walk from the prologue to the epilogue. Returns the number of
    /// free blocks passed on the way.
    fn walk_blocks(&self, prologue: HeaderOffset) -> Result<usize, CheckError> {
        let mut free_blocks = 0;
        let mut prev = prologue;
        let mut current = self.arena.next_header(prologue);
        loop {
            if !header_in_bounds(&self.arena, current) {
                return Err(CheckError::BlockOutOfBounds { at: current.0 });
            }
            let tag = self.arena.header(current);
            let prev_tag = self.arena.header(prev);

            if tag.prev_free() != prev_tag.is_free() {
                return Err(CheckError::PrevFreeBitMismatch { at: current.0 });
            }
            if tag.size() == 0 {
                if tag.is_free() {
                    return Err(CheckError::EpilogueCorrupted);
                }
                return Ok(free_blocks);
            }
            if current.payload() + tag.size() + WORD > self.arena.brk() {
                return Err(CheckError::BlockOutOfBounds { at: current.0 });
            }

            if tag.is_free() {
                free_blocks += 1;
                if prev_tag.is_free() {
                    return Err(CheckError::AdjacentFreeBlocks { at: current.0 });
                }
                if self.arena.footer(current) != tag {
                    return Err(CheckError::FooterMismatch { at: current.0 });
                }
                if !self.indexed(current) {
                    return Err(CheckError::UnindexedFreeBlock { at: current.0 });
                }
            } else if self.indexed(current) {
                return Err(CheckError::IndexedAllocatedBlock { at: current.0 });
            }

            prev = current;
            current = self.arena.next_header(current);
        }
    }

    /// Walk all 15 lists via the embedded links, validating each node.
    /// Returns the total number of listed blocks.
    fn walk_lists(&self) -> Result<usize, CheckError> {
        let mut listed = 0;
        for class in 0..LIST_COUNT {
            let mut prev: Option<HeaderOffset> = None;
            let mut cursor = self.index.head(class);
            while let Some(node) = cursor {
                if node.0 % WORD != 0 || !header_in_bounds(&self.arena, node) {
                    return Err(CheckError::BlockOutOfBounds { at: node.0 });
                }
                let tag = self.arena.header(node);
                if !tag.is_free() {
                    return Err(CheckError::ListedBlockNotFree { at: node.0, class });
                }
                if self.arena.link_prev(node) != prev {
                    return Err(CheckError::BrokenBackLink { at: node.0 });
                }
                if SegIndex::size_class(tag.size()) != class {
                    return Err(CheckError::WrongSizeClass { at: node.0, class });
                }
                listed += 1;
                prev = Some(node);
                cursor = self.arena.link_next(node);
            }
        }
        Ok(listed)
    }

    /// Whether `target` is reachable through any segregated list. Membership
    /// is positional, so this is the authoritative test.
    fn indexed(&self, target: HeaderOffset) -> bool {
        (0..LIST_COUNT).any(|class| {
            let mut cursor = self.index.head(class);
            while let Some(node) = cursor {
                if node == target {
                    return true;
                }
                cursor = self.arena.link_next(node);
            }
            false
        })
    }
}

fn header_in_bounds<const N: usize>(arena: &Arena<N>, h: HeaderOffset) -> bool {
    h.0 + WORD <= arena.brk()
}
