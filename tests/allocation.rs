#![no_std]

const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[global_allocator]
static ALLOCATOR: segalloc::Allocator<HEAP_SIZE> = segalloc::Allocator::new();

extern crate alloc;

#[test]
fn collections_and_formatting_smoke() {
    // generic sanity: node-based and buffer-based containers both live on
    // this heap at once
    let mut translations = alloc::collections::BTreeMap::new();
    translations.insert("hello", "hallo");
    translations.insert("world", "welt");

    let line = alloc::format!(
        "{} -> {}",
        translations["hello"],
        translations["world"]
    );
    assert_eq!(line, "hallo -> welt");
}

#[test]
fn vector_growth_walks_the_size_classes() {
    // a doubling Vec<u8> requests 8, 16, 32, ... bytes: the backing block
    // moves through the exact size classes (16, 32, 64, 128) and on into
    // the overflow list once the payload passes 224
    let mut bytes = alloc::vec::Vec::new();
    for i in 0..512_u32 {
        bytes.push(i as u8);
        assert_eq!(bytes.as_ptr() as usize % 16, 0, "payload must stay aligned");
    }
    assert!(bytes.iter().copied().eq((0..512_u32).map(|i| i as u8)));
    assert_eq!(ALLOCATOR.check_heap(), Ok(()));
}

#[test]
fn sixteen_byte_alignment_is_served() {
    // u128 demands the largest alignment this allocator supports
    let boxed = alloc::boxed::Box::new(0x1234_5678_9abc_def0_u128);
    assert_eq!(core::ptr::addr_of!(*boxed) as usize % 16, 0);
    assert_eq!(*boxed, 0x1234_5678_9abc_def0_u128);
}

#[test]
fn growing_vec_reallocates_in_place_and_beyond() {
    // growing from 1 to 1000 elements exercises the in-place capacity path
    // (payload plus lent footer) as well as the move-and-copy path
    let mut v = alloc::vec::Vec::new();
    for i in 0..1000_u32 {
        v.push(i);
    }
    assert_eq!(v.len(), 1000);
    assert!(v.iter().copied().eq(0..1000));
}

#[test]
fn zeroed_allocation() {
    let zeroes = alloc::vec![0_u8; 4096];
    assert!(zeroes.iter().all(|&byte| byte == 0));
}

#[test]
fn heap_stays_consistent_under_churn() {
    let mut boxes = alloc::vec::Vec::new();
    for size in [1_usize, 7, 16, 24, 25, 100, 300, 1000] {
        boxes.push(alloc::vec![0xAB_u8; size]);
    }
    boxes.truncate(3);
    for size in [48_usize, 224, 500] {
        boxes.push(alloc::vec![0xCD_u8; size]);
    }
    drop(boxes);

    assert_eq!(ALLOCATOR.check_heap(), Ok(()));
}
