//! Integration tests for COW arenas with real page faults.
//!
//! All tests in this binary share one dispatcher, installed on first use.

use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use wamem_core::arena::CowArena;
use wamem_core::sys;
use wamem_core::{Address, Arena, ArenaConfig, CowRegistry, Fallback, FaultDispatcher, PAGE_SIZE};

fn dispatcher() -> &'static FaultDispatcher {
    static DISPATCHER: OnceLock<&'static FaultDispatcher> = OnceLock::new();
    DISPATCHER.get_or_init(|| {
        let registry = Arc::new(CowRegistry::with_capacity(32));
        FaultDispatcher::install(registry, Fallback::Previous).unwrap()
    })
}

fn cow() -> CowArena {
    CowArena::new(&ArenaConfig::compact(), dispatcher().registry()).unwrap()
}

fn touch(addr: Address, value: u8) {
    // SAFETY: `addr` lies in a COW window served by the dispatcher.
    unsafe { addr.as_mut_ptr().write_volatile(value) }
}

fn peek(addr: Address) -> u8 {
    // SAFETY: as for `touch`.
    unsafe { addr.as_mut_ptr().read_volatile() }
}

#[test]
fn test_first_write_commits_page_transparently() {
    let arena = cow();
    let before = dispatcher().stats().claimed;

    for page in [0, 1, 7, 100] {
        touch(arena.data().add(page * PAGE_SIZE + 3), page as u8 + 1);
    }

    assert_eq!(arena.committed_pages(), 4);
    assert!(dispatcher().stats().claimed >= before + 4);
    for page in [0, 1, 7, 100] {
        assert_eq!(peek(arena.data().add(page * PAGE_SIZE + 3)), page as u8 + 1);
        // The rest of a committed page is zero.
        assert_eq!(peek(arena.data().add(page * PAGE_SIZE)), 0);
    }
    assert!(!sys::probe_readable(arena.data().add(2 * PAGE_SIZE), 1));
}

#[test]
fn test_committed_page_never_faults_again() {
    let arena = cow();
    let addr = arena.data().add(10 * PAGE_SIZE);

    touch(addr, 1);
    for i in 0..PAGE_SIZE {
        touch(addr.add(i), (i % 256) as u8);
    }
    assert_eq!(peek(addr.add(PAGE_SIZE - 1)), ((PAGE_SIZE - 1) % 256) as u8);
    assert_eq!(arena.committed_pages(), 1);
}

#[test]
fn test_two_arenas_commit_independently() {
    let x = cow();
    let y = cow();

    touch(x.data(), 0x7f);
    assert_eq!(x.committed_pages(), 1);
    assert_eq!(y.committed_pages(), 0);
    assert!(!sys::probe_readable(y.data(), 1));

    // Same relative offset in Y still takes a fresh commit.
    touch(y.data(), 0x01);
    assert_eq!(y.committed_pages(), 1);
    assert_eq!(peek(x.data()), 0x7f);
    assert_eq!(peek(y.data()), 0x01);
}

#[test]
fn test_arena_does_not_claim_foreign_faults() {
    let a = cow();
    let b = cow();

    assert!(!a.try_handle_fault(b.data().add(PAGE_SIZE)));
    assert!(!a.try_handle_fault(a.data().add(a.size())));
    assert!(!a.try_handle_fault(Address::new(a.data().as_usize() - 1)));
    assert!(b.try_handle_fault(b.data().add(PAGE_SIZE)));
    assert_eq!(a.committed_pages(), 0);
}

#[test]
fn test_concurrent_faults_on_one_arena() {
    const THREADS: usize = 4;
    const PAGES: usize = 64;

    let arena = Arc::new(Arena::cow(&ArenaConfig::compact(), dispatcher().registry()).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let arena = Arc::clone(&arena);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for p in 0..PAGES {
                    let page = p * THREADS + t;
                    touch(arena.data().add(page * PAGE_SIZE), t as u8 + 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for page in 0..THREADS * PAGES {
        assert_eq!(peek(arena.data().add(page * PAGE_SIZE)), (page % THREADS) as u8 + 1);
    }
    let cow = arena.as_cow().unwrap();
    assert_eq!(cow.committed_pages(), (THREADS * PAGES) as u64);
}

#[test]
fn test_faults_race_with_arena_churn() {
    let long_lived = cow();
    let data = long_lived.data();

    let churn = thread::spawn(|| {
        for _ in 0..20 {
            let short = cow();
            touch(short.data(), 1);
            drop(short);
        }
    });
    for page in 0..200 {
        touch(data.add(page * PAGE_SIZE), 2);
    }
    churn.join().unwrap();

    assert_eq!(long_lived.committed_pages(), 200);
}

#[test]
fn test_default_layout_cow_arena() {
    let arena = CowArena::new(&ArenaConfig::default(), dispatcher().registry()).unwrap();
    assert_eq!(arena.size(), 65536 * 65535);

    let last = arena.data().add(arena.size() - 1);
    touch(last, 0xee);
    assert_eq!(peek(last), 0xee);
    assert_eq!(arena.committed_pages(), 1);
    assert!(!sys::probe_readable(arena.data().add(arena.size()), 1));
}

#[test]
fn test_dispatcher_is_installed_once() {
    let installed = dispatcher();
    let err = FaultDispatcher::install(Arc::new(CowRegistry::default()), Fallback::None).unwrap_err();
    assert_eq!(err.code(), "E202");
    assert!(std::ptr::eq(FaultDispatcher::installed().unwrap(), installed));
    assert_eq!(installed.registry().capacity(), 32);
}
