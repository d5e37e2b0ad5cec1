//! The boundary tag word written at both ends of every heap block.
//!
//! A tag is a single 64-bit word with the following bit assignment:
//! ```text
//! 63                                           4   3   2   1   0
//! ┌─────────────────────────────────────────────┬───┬───┬───┬───┐
//! │ payload size in bytes (a multiple of 16)    │ 0 │ 0 │ p │ f │
//! └─────────────────────────────────────────────┴───┴───┴───┴───┘
//! ```
//! Bit 0 (`f`) is set if the block itself is free, bit 1 (`p`) is set if the
//! block *below* it is free. Bits 2 and 3 are reserved and always zero. Since
//! payload sizes are multiples of 16, the low four bits of the size are zero
//! and the flags can live there without a separate field.
//!
//! The same encoding is used for headers and footers, so a free block can
//! mirror its header word into its footer verbatim.

/// A header or footer word: payload size plus the two status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(u64);

impl Tag {
    /// Bit 0: this block is free.
    const FREE: u64 = 1;
    /// Bit 1: the previous (lower-addressed) block is free.
    const PREV_FREE: u64 = 1 << 1;
    /// Bits 4..64: the payload size. Bits 2 and 3 must stay zero.
    const SIZE_MASK: u64 = !0xF;

    /// Compose a tag from its three fields.
    ///
    /// The payload size must be a multiple of 16, otherwise it would collide
    /// with the flag bits.
    pub fn new(size: usize, free: bool, prev_free: bool) -> Self {
        debug_assert!(size % 16 == 0, "payload size not a multiple of 16");

        let mut word = size as u64 & Self::SIZE_MASK;
        if free {
            word |= Self::FREE;
        }
        if prev_free {
            word |= Self::PREV_FREE;
        }
        Self(word)
    }

    /// Reconstruct a tag from a raw word read out of the heap.
    pub fn from_raw(word: u64) -> Self {
        Self(word)
    }

    /// The raw word to be written into the heap.
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// The payload size recorded in this tag (the low four bits are masked).
    pub fn size(self) -> usize {
        (self.0 & Self::SIZE_MASK) as usize
    }

    /// Whether the block carrying this tag is free.
    pub fn is_free(self) -> bool {
        self.0 & Self::FREE != 0
    }

    /// Whether the block below the one carrying this tag is free.
    pub fn prev_free(self) -> bool {
        self.0 & Self::PREV_FREE != 0
    }

    /// This tag with the free bit replaced and all other fields preserved.
    pub fn with_free(self, free: bool) -> Self {
        Self::new(self.size(), free, self.prev_free())
    }

    /// This tag with the previous-block-free bit replaced and all other
    /// fields preserved.
    pub fn with_prev_free(self, prev_free: bool) -> Self {
        Self::new(self.size(), self.is_free(), prev_free)
    }
}
