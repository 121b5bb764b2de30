//! Registry of live COW arena windows.
//!
//! Lookups happen inside the fault handler, so the read path is a plain walk
//! over a fixed slot array with atomic loads: no allocation, no locks.
//! Writers (arena construction and destruction) serialize on a short mutex.
//!
//! A slot is published by storing its length and then its start; it is
//! retired by clearing the start and then waiting until every handler that
//! may have read the old start has left the registry. After
//! [`CowRegistry::deregister`] returns, no handler can commit a page into
//! the retired window, so its reservation can be released.

use crate::config::ArenaConfig;
use crate::error::{Result, VmError};
use crate::sys::{Protection, raw};
use crate::types::{Address, AddressRange, PAGE_SIZE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::{fmt, thread};

/// Handle to an occupied registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CowSlot(usize);

impl CowSlot {
    /// Index into the registry's slot array.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot_{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Window start; 0 while the slot is free.
    start: AtomicUsize,
    len: AtomicUsize,
    commits: AtomicU64,
}

impl Slot {
    /// Commit the page containing `addr` if it lies in this slot's window.
    fn try_commit(&self, addr: Address) -> bool {
        let start = self.start.load(Ordering::SeqCst);
        if start == 0 {
            return false;
        }
        let window = AddressRange::new(Address::new(start), self.len.load(Ordering::SeqCst));
        if !commit_page(window, addr) {
            return false;
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Make the page containing `addr` readable and writable if `addr` lies in
/// `window`. Async-signal-safe.
fn commit_page(window: AddressRange, addr: Address) -> bool {
    if !window.contains(addr) {
        return false;
    }
    // SAFETY: the page lies in a registered window whose reservation stays
    // mapped until its slot is retired, and retirement waits for us.
    unsafe { raw::protect(addr.page_base(), PAGE_SIZE, Protection::ReadWrite) }
}

/// Decrements the reader count when a lookup leaves the registry.
struct ReaderGuard<'a>(&'a AtomicUsize);

impl<'a> ReaderGuard<'a> {
    fn enter(readers: &'a AtomicUsize) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        Self(readers)
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-capacity set of live COW windows.
#[derive(Debug)]
pub struct CowRegistry {
    slots: Box<[Slot]>,
    writer: Mutex<()>,
    active_readers: AtomicUsize,
    live: AtomicUsize,
}

impl CowRegistry {
    /// Create a registry able to track `capacity` arenas at once.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            writer: Mutex::new(()),
            active_readers: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Create a registry sized by `config.registry_capacity`.
    pub fn from_config(config: &ArenaConfig) -> Self {
        Self::with_capacity(config.registry_capacity)
    }

    /// Maximum number of live arenas.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live arenas.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Publish `window` so faults inside it are resolved.
    pub fn register(&self, window: AddressRange) -> Result<CowSlot> {
        let wraps = window.start().as_usize().checked_add(window.len()).is_none();
        if window.start().is_null() || window.is_empty() || wraps {
            return Err(VmError::InvalidLayout {
                cause: format!(
                    "cannot register window at {} with length {}",
                    window.start(),
                    window.len()
                ),
            });
        }

        let _writer = self.writer.lock();
        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.start.load(Ordering::SeqCst) == 0)
        else {
            tracing::warn!(capacity = self.capacity(), window = %window, "COW registry is full");
            return Err(VmError::RegistryFull {
                capacity: self.capacity(),
            });
        };

        let slot = &self.slots[index];
        slot.commits.store(0, Ordering::Relaxed);
        slot.len.store(window.len(), Ordering::SeqCst);
        slot.start.store(window.start().as_usize(), Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(slot = index, window = %window, live, "Registered COW window");
        Ok(CowSlot(index))
    }

    /// Retire a slot, waiting out any handler still looking at it.
    pub fn deregister(&self, slot: CowSlot) {
        let _writer = self.writer.lock();
        let Some(entry) = self.slots.get(slot.0) else {
            return;
        };
        if entry.start.swap(0, Ordering::SeqCst) == 0 {
            return;
        }

        while self.active_readers.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
            thread::yield_now();
        }
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;

        tracing::debug!(
            slot = %slot,
            commits = entry.commits.load(Ordering::Relaxed),
            live,
            "Deregistered COW window"
        );
    }

    /// Resolve a fault at `addr` against every live window.
    ///
    /// Returns `true` once a window claims the address and its page has been
    /// committed. Safe to call from a signal handler.
    pub fn try_handle_fault(&self, addr: Address) -> bool {
        let _reader = ReaderGuard::enter(&self.active_readers);
        self.slots.iter().any(|slot| slot.try_commit(addr))
    }

    /// Resolve a fault at `addr` against one slot only.
    pub fn try_handle_fault_in(&self, slot: CowSlot, addr: Address) -> bool {
        let _reader = ReaderGuard::enter(&self.active_readers);
        self.slots.get(slot.0).is_some_and(|s| s.try_commit(addr))
    }

    /// The window registered in `slot`, if it is live.
    pub fn window(&self, slot: CowSlot) -> Option<AddressRange> {
        let entry = self.slots.get(slot.0)?;
        let start = entry.start.load(Ordering::SeqCst);
        (start != 0).then(|| AddressRange::new(Address::new(start), entry.len.load(Ordering::SeqCst)))
    }

    /// Pages committed through `slot` since it was registered.
    pub fn committed_pages(&self, slot: CowSlot) -> u64 {
        self.slots
            .get(slot.0)
            .map_or(0, |s| s.commits.load(Ordering::Relaxed))
    }
}

impl Default for CowRegistry {
    fn default() -> Self {
        Self::from_config(&ArenaConfig::default())
    }
}
