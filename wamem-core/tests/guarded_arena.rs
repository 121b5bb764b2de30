//! Integration tests for guarded arenas and file mappings.
//!
//! Faulting accesses are never performed here: whether an address would
//! fault is checked with `sys::probe_readable`.

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tempfile::tempdir;
use wamem_core::arena::{GuardedArena, MapRequest, RawBuffer};
use wamem_core::sys;
use wamem_core::{Arena, ArenaConfig, MappingId, PAGE_SIZE};

const BUDGET: usize = 65536;

fn guarded() -> GuardedArena {
    GuardedArena::new(&ArenaConfig::compact(), BUDGET).unwrap()
}

fn read(arena: &GuardedArena, offset: usize, len: usize) -> Vec<u8> {
    // SAFETY: callers only read committed or mapped ranges.
    unsafe { std::slice::from_raw_parts(arena.data().add(offset).as_mut_ptr(), len).to_vec() }
}

#[test]
fn test_map_read_unmap_returns_range_to_guard() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("F");
    fs::write(&path, vec![0xAB; 4096]).unwrap();

    let arena = guarded();
    let id = arena.map_file(&MapRequest::new(&path, 0, 4096)).unwrap();
    assert_eq!(read(&arena, 0, 1), [0xAB]);
    assert!(read(&arena, 0, 4096).iter().all(|b| *b == 0xAB));

    arena.unmap_file(id).unwrap();
    assert!(!sys::probe_readable(arena.data(), 1));
    assert_eq!(arena.mapping_count(), 0);
}

#[test]
fn test_overlapping_mapping_is_fatal_and_leaves_table_intact() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::write(&a, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]).unwrap();
    fs::write(&b, [0x70, 0x80, 0x90, 0xa0, 0xb0, 0xc0]).unwrap();

    let arena = guarded();
    let first = arena.map_file(&MapRequest::new(&a, 0, 6)).unwrap();

    // Same page, different file.
    let result = catch_unwind(AssertUnwindSafe(|| {
        arena.map_file(&MapRequest::new(&b, 0, 6)).unwrap();
    }));
    assert!(result.is_err());
    assert_eq!(arena.mapping_count(), 1);
    assert_eq!(arena.mappings()[0].id, first);
    assert_eq!(read(&arena, 0, 6), [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    // Adjacent mapping starting on the next page is fine.
    let second = arena.map_file(&MapRequest::new(&b, PAGE_SIZE, 6)).unwrap();
    assert_eq!(second, MappingId::new(1));
    assert_eq!(read(&arena, 0, 6), [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
    assert_eq!(read(&arena, PAGE_SIZE, 6), [0x70, 0x80, 0x90, 0xa0, 0xb0, 0xc0]);
}

#[test]
fn test_disjoint_mappings_read_their_own_file_ranges() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let content_a: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let content_b: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i % 13) as u8).collect();
    fs::write(&a, &content_a).unwrap();
    fs::write(&b, &content_b).unwrap();

    let arena = guarded();
    arena
        .map_file(&MapRequest::new(&a, 0, 2 * PAGE_SIZE).file_offset(PAGE_SIZE as u64))
        .unwrap();
    arena
        .map_file(&MapRequest::new(&b, 4 * PAGE_SIZE, 2 * PAGE_SIZE))
        .unwrap();

    assert_eq!(read(&arena, 0, 2 * PAGE_SIZE), content_a[PAGE_SIZE..]);
    assert_eq!(read(&arena, 4 * PAGE_SIZE, 2 * PAGE_SIZE), content_b);
    assert!(!sys::probe_readable(arena.data().add(2 * PAGE_SIZE), 1));
}

#[test]
fn test_writable_mapping_persists_to_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rw");
    fs::write(&path, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]).unwrap();

    let arena = guarded();
    let id = arena
        .map_file(&MapRequest::new(&path, 2 * PAGE_SIZE, 6).writable(true))
        .unwrap();
    unsafe { *arena.data().add(2 * PAGE_SIZE).as_mut_ptr() = 0x42 };
    arena.unmap_file(id).unwrap();

    assert_eq!(fs::read(&path).unwrap(), [0x42, 0x20, 0x30, 0x40, 0x50, 0x60]);
}

#[test]
fn test_heap_is_committed_read_write() {
    let arena = guarded();
    let heap = arena.heap();
    assert_eq!(heap.len(), arena.size() - BUDGET);

    for offset in [BUDGET, BUDGET + PAGE_SIZE, arena.size() - PAGE_SIZE] {
        let addr = arena.data().add(offset);
        assert!(sys::probe_readable(addr, PAGE_SIZE));
        unsafe {
            assert_eq!(*addr.as_mut_ptr(), 0);
            *addr.as_mut_ptr() = 0x5a;
            assert_eq!(*addr.as_mut_ptr(), 0x5a);
        }
    }

    // Both guards and the mapping budget stay inaccessible.
    assert!(!sys::probe_readable(arena.data(), 1));
    assert!(!sys::probe_readable(arena.data().add(BUDGET - 1), 1));
    assert!(!sys::probe_readable(arena.data().add(arena.size()), 1));
    assert!(!sys::probe_readable(arena.reservation().base(), 1));
}

#[test]
fn test_missing_backing_file_is_a_system_call_error() {
    let dir = tempdir().unwrap();
    let arena = guarded();
    let err = arena
        .map_file(&MapRequest::new(dir.path().join("missing"), 0, 10))
        .unwrap_err();
    assert_eq!(err.code(), "E001");
    assert_eq!(arena.mapping_count(), 0);
}

#[test]
fn test_drop_with_live_mappings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, [1u8; PAGE_SIZE]).unwrap();

    let arena = guarded();
    arena.map_file(&MapRequest::new(&path, 0, PAGE_SIZE)).unwrap();
    arena
        .map_file(&MapRequest::new(&path, PAGE_SIZE, PAGE_SIZE))
        .unwrap();
    let range = arena.reservation().range();
    drop(arena);

    assert!(!sys::probe_readable(range.start(), 1));
    // The file itself is untouched.
    assert_eq!(fs::read(&path).unwrap(), vec![1u8; PAGE_SIZE]);
}

#[test]
fn test_lent_guarded_arena_outlives_owner_handle() {
    let arena = Arc::new(Arena::guarded(&ArenaConfig::compact(), BUDGET).unwrap());
    let weak = Arc::downgrade(&arena);
    let buffer = RawBuffer::lend(arena);

    assert_eq!(buffer.len, ArenaConfig::compact().layout.data_window_size);
    unsafe { *buffer.data.add(BUDGET) = 9 };
    assert!(weak.upgrade().is_some());

    buffer.release();
    assert!(weak.upgrade().is_none());
}
