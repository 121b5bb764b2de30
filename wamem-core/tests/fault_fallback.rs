//! Faults no COW arena claims: delegation to the fallback consumer, and
//! termination with a diagnostic when nobody resolves them.
//!
//! Every faulting half runs in a child copy of this test binary, one test
//! per child, so each child installs its own dispatcher.

use libc::{c_int, c_void, siginfo_t};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wamem_core::arena::GuardedArena;
use wamem_core::{ArenaConfig, CowRegistry, Fallback, FaultDispatcher, PAGE_SIZE};

const CHILD_ENV: &str = "WAMEM_FAULT_CHILD";

/// Page the fixing fallback makes readable.
static GUARD_PAGE: AtomicUsize = AtomicUsize::new(0);

fn is_child(test: &str) -> bool {
    std::env::var(CHILD_ENV).is_ok_and(|name| name == test)
}

fn run_child(test: &str) -> Output {
    Command::new(std::env::current_exe().unwrap())
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, test)
        .output()
        .unwrap()
}

fn assert_died_unclaimed(output: &Output) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.signal(), Some(libc::SIGSEGV), "stderr: {stderr}");
    assert!(stderr.contains("wamem: unclaimed SIGSEGV at 0x"), "stderr: {stderr}");
    assert!(!stderr.contains("from a guard page"), "stderr: {stderr}");
}

/// Read the first byte of a fresh guarded arena's mapping budget.
fn read_guard(fallback: Fallback) -> u8 {
    let dispatcher =
        FaultDispatcher::install(Arc::new(CowRegistry::with_capacity(1)), fallback).unwrap();
    let arena = GuardedArena::new(&ArenaConfig::compact(), 64 * 1024).unwrap();
    GUARD_PAGE.store(arena.data().as_usize(), Ordering::SeqCst);

    let value = unsafe { arena.data().as_mut_ptr().read_volatile() };
    let stats = dispatcher.stats();
    assert_eq!(stats.claimed, 0);
    assert_eq!(stats.delegated, 1);
    assert_eq!(stats.unclaimed, 0);
    value
}

fn make_guard_readable(_: c_int, _: *mut siginfo_t, _: *mut c_void) -> bool {
    let page = GUARD_PAGE.load(Ordering::SeqCst);
    page != 0
        && unsafe { libc::mprotect(page as *mut c_void, PAGE_SIZE, libc::PROT_READ) } == 0
}

fn decline(_: c_int, _: *mut siginfo_t, _: *mut c_void) -> bool {
    false
}

#[test]
fn test_unclaimed_fault_terminates_process() {
    const TEST: &str = "test_unclaimed_fault_terminates_process";
    if is_child(TEST) {
        let value = read_guard(Fallback::None);
        panic!("read {value} from a guard page");
    }
    assert_died_unclaimed(&run_child(TEST));
}

#[test]
fn test_previous_fallback_reports_unclaimed_fault() {
    const TEST: &str = "test_previous_fallback_reports_unclaimed_fault";
    if is_child(TEST) {
        // The previous action is std's stack-overflow handler or the
        // default; neither resolves a fault in a mapping guard.
        let value = read_guard(Fallback::Previous);
        panic!("read {value} from a guard page");
    }
    assert_died_unclaimed(&run_child(TEST));
}

#[test]
fn test_fallback_handler_resolves_fault() {
    const TEST: &str = "test_fallback_handler_resolves_fault";
    if is_child(TEST) {
        let value = read_guard(Fallback::Handler(make_guard_readable));
        assert_eq!(value, 0);
        println!("resumed after fallback");
        return;
    }

    let output = run_child(TEST);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout: {stdout} stderr: {stderr}");
    assert!(stdout.contains("resumed after fallback"), "stdout: {stdout}");
    assert!(!stderr.contains("wamem: unclaimed"), "stderr: {stderr}");
}

#[test]
fn test_declining_fallback_handler_is_fatal() {
    const TEST: &str = "test_declining_fallback_handler_is_fatal";
    if is_child(TEST) {
        let value = read_guard(Fallback::Handler(decline));
        panic!("read {value} from a guard page");
    }
    assert_died_unclaimed(&run_child(TEST));
}
