//! The segregated free-list index.
//!
//! Free blocks are kept in 15 doubly-linked LIFO lists keyed by payload size.
//! Lists 0..=13 each hold exactly one size class (16, 32, …, 224 bytes); the
//! last list absorbs every other size. The links live inside the free blocks
//! themselves (see [`Arena::link_prev`]/[`Arena::link_next`]), so the index
//! itself is nothing but the 15 head offsets.
//!
//! Membership is positional: a block "is in" whatever list is reachable from
//! its size-class head. There is no redundant membership flag to keep in sync.

use super::arena::{Arena, HeaderOffset};
use super::{required_payload, WORD};

/// Number of segregated lists.
pub const LIST_COUNT: usize = 15;

/// The overflow list, holding blocks of every size without an exact class.
pub const OVERFLOW_LIST: usize = LIST_COUNT - 1;

/// Largest payload size with an exact size class.
const LARGEST_CLASS: usize = OVERFLOW_LIST * 16;

/// The 15 list heads of the segregated index.
pub struct SegIndex {
    heads: [Option<HeaderOffset>; LIST_COUNT],
}

impl SegIndex {
    /// An index with all lists empty.
    pub const fn new() -> Self {
        Self {
            heads: [None; LIST_COUNT],
        }
    }

    /// The list a payload of `size` bytes belongs to.
    ///
    /// Exact classes are the multiples of 16 up to 224 and map to list
    /// `size/16 - 1`; everything else lands in the overflow list.
    pub fn size_class(size: usize) -> usize {
        if (16..=LARGEST_CLASS).contains(&size) && size % 16 == 0 {
            size / 16 - 1
        } else {
            OVERFLOW_LIST
        }
    }

    /// The head of list `class`, if the list is non-empty.
    pub fn head(&self, class: usize) -> Option<HeaderOffset> {
        self.heads[class]
    }

    /// Prepend the free block at `h` to the list matching its payload size.
    ///
    /// LIFO order: the most recently inserted block is the first candidate
    /// returned by [`find_fit`](Self::find_fit).
    pub fn insert<const N: usize>(&mut self, arena: &mut Arena<N>, h: HeaderOffset) {
        let class = Self::size_class(arena.header(h).size());
        let head = self.heads[class];

        arena.set_link_prev(h, None);
        arena.set_link_next(h, head);
        if let Some(old_head) = head {
            arena.set_link_prev(old_head, Some(h));
        }
        self.heads[class] = Some(h);
    }

    /// Unlink the free block at `h` from its list in constant time.
    ///
    /// The block's payload size must be unchanged since it was inserted,
    /// otherwise the head fixup would target the wrong list.
    pub fn remove<const N: usize>(&mut self, arena: &mut Arena<N>, h: HeaderOffset) {
        let class = Self::size_class(arena.header(h).size());
        let prev = arena.link_prev(h);
        let next = arena.link_next(h);

        if let Some(next) = next {
            arena.set_link_prev(next, prev);
        }
        match prev {
            Some(prev) => arena.set_link_next(prev, next),
            None => self.heads[class] = next,
        }
    }

    /// Find a free block able to hold `n` user bytes, or `None` for a miss.
    ///
    /// Exact-size classes from the required size upwards are checked first
    /// and answer with their head in constant time. The overflow list is
    /// scanned front-to-back for the first block whose capacity (payload plus
    /// the lent footer word) covers the raw request.
    pub fn find_fit<const N: usize>(&self, arena: &Arena<N>, n: usize) -> Option<HeaderOffset> {
        let need = required_payload(n);
        for class in Self::size_class(need)..OVERFLOW_LIST {
            if let Some(head) = self.heads[class] {
                return Some(head);
            }
        }

        let mut cursor = self.heads[OVERFLOW_LIST];
        while let Some(h) = cursor {
            if arena.header(h).size() + WORD >= n {
                return Some(h);
            }
            cursor = arena.link_next(h);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::tag::Tag;
    use super::{Arena, HeaderOffset, SegIndex, LIST_COUNT, OVERFLOW_LIST};

    /// Write a free block of `size` payload bytes at `offset` and insert it.
    fn carve<const N: usize>(
        index: &mut SegIndex,
        arena: &mut Arena<N>,
        offset: usize,
        size: usize,
    ) -> HeaderOffset {
        let h = HeaderOffset(offset);
        let tag = Tag::new(size, true, false);
        arena.set_header(h, tag);
        arena.set_footer(h, tag);
        index.insert(arena, h);
        h
    }

    fn list<const N: usize>(index: &SegIndex, arena: &Arena<N>, class: usize) -> [Option<HeaderOffset>; 3] {
        let first = index.head(class);
        let second = first.and_then(|h| arena.link_next(h));
        let third = second.and_then(|h| arena.link_next(h));
        [first, second, third]
    }

    #[test]
    fn size_class_mapping() {
        assert_eq!(SegIndex::size_class(16), 0);
        assert_eq!(SegIndex::size_class(32), 1);
        assert_eq!(SegIndex::size_class(224), 13);
        // every non-exact size funnels into the overflow list
        assert_eq!(SegIndex::size_class(0), OVERFLOW_LIST);
        assert_eq!(SegIndex::size_class(240), OVERFLOW_LIST);
        assert_eq!(SegIndex::size_class(4096), OVERFLOW_LIST);
    }

    #[test]
    fn insertion_is_lifo() {
        let mut arena = Arena::<256>::new();
        arena.sbrk(256).unwrap();
        let mut index = SegIndex::new();

        let first = carve(&mut index, &mut arena, 8, 16);
        let second = carve(&mut index, &mut arena, 48, 16);

        assert_eq!(
            list(&index, &arena, 0),
            [Some(second), Some(first), None],
            "the newest block must sit at the head"
        );
        assert_eq!(arena.link_prev(second), None);
        assert_eq!(arena.link_prev(first), Some(second));
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut arena = Arena::<256>::new();
        arena.sbrk(256).unwrap();
        let mut index = SegIndex::new();

        let a = carve(&mut index, &mut arena, 8, 16);
        let b = carve(&mut index, &mut arena, 48, 16);
        let c = carve(&mut index, &mut arena, 88, 16);
        // list is now c -> b -> a

        index.remove(&mut arena, b);
        assert_eq!(list(&index, &arena, 0), [Some(c), Some(a), None]);
        assert_eq!(arena.link_prev(a), Some(c));

        index.remove(&mut arena, c);
        assert_eq!(list(&index, &arena, 0), [Some(a), None, None]);
        assert_eq!(arena.link_prev(a), None);

        index.remove(&mut arena, a);
        assert_eq!(index.head(0), None);
    }

    #[test]
    fn blocks_land_in_their_class() {
        let mut arena = Arena::<1024>::new();
        arena.sbrk(1024).unwrap();
        let mut index = SegIndex::new();

        let exact = carve(&mut index, &mut arena, 8, 64);
        let odd = carve(&mut index, &mut arena, 88, 304);

        assert_eq!(index.head(SegIndex::size_class(64)), Some(exact));
        assert_eq!(index.head(OVERFLOW_LIST), Some(odd));
        for class in (0..LIST_COUNT).filter(|&c| c != 3 && c != OVERFLOW_LIST) {
            assert_eq!(index.head(class), None);
        }
    }

    #[test]
    fn find_fit_escalates_through_the_classes() {
        let mut arena = Arena::<256>::new();
        arena.sbrk(256).unwrap();
        let mut index = SegIndex::new();

        // only a 48-byte block exists; a request needing 16 must reach it
        let block = carve(&mut index, &mut arena, 8, 48);
        assert_eq!(index.find_fit(&arena, 16), Some(block));
        assert_eq!(index.find_fit(&arena, 48), Some(block));
    }

    #[test]
    fn exact_class_hit_beats_the_overflow_list() {
        let mut arena = Arena::<1024>::new();
        arena.sbrk(1024).unwrap();
        let mut index = SegIndex::new();

        let large = carve(&mut index, &mut arena, 8, 512);
        let exact = carve(&mut index, &mut arena, 536, 16);

        assert_eq!(index.find_fit(&arena, 16), Some(exact));
        index.remove(&mut arena, exact);
        assert_eq!(index.find_fit(&arena, 16), Some(large));
    }

    #[test]
    fn overflow_list_is_searched_first_fit_against_capacity() {
        let mut arena = Arena::<2048>::new();
        arena.sbrk(2048).unwrap();
        let mut index = SegIndex::new();

        let small = carve(&mut index, &mut arena, 8, 240);
        let large = carve(&mut index, &mut arena, 264, 512);
        // LIFO: the scan sees `large` first, then `small`

        // capacity of the 240-block is 248, so a request of 248 still fits it,
        // but the first fit in scan order is the 512-block at the head
        assert_eq!(index.find_fit(&arena, 248), Some(large));

        index.remove(&mut arena, large);
        assert_eq!(index.find_fit(&arena, 248), Some(small));
        assert_eq!(index.find_fit(&arena, 249), None);
    }

    #[test]
    fn class_loop_uses_the_adjusted_size_and_the_scan_the_raw_one() {
        let mut arena = Arena::<1024>::new();
        arena.sbrk(1024).unwrap();
        let mut index = SegIndex::new();

        // a request of 232 bytes needs a 224-byte payload once the footer is
        // lent, so it must still be served from exact class 13
        let exact = carve(&mut index, &mut arena, 8, 224);
        assert_eq!(index.find_fit(&arena, 232), Some(exact));
        index.remove(&mut arena, exact);

        // with the class empty the overflow scan measures capacity against
        // the raw request: 240 + 8 >= 232 holds, 240 + 8 >= 249 does not
        let odd = carve(&mut index, &mut arena, 248, 240);
        assert_eq!(index.find_fit(&arena, 232), Some(odd));
        assert_eq!(index.find_fit(&arena, 249), None);
    }
}
