//! Copy-on-write arena: every page of the data window starts inaccessible
//! and is committed read-write by the fault dispatcher on first touch.

use super::reservation::Reservation;
use crate::config::ArenaConfig;
use crate::error::Result;
use crate::fault::{CowRegistry, CowSlot, FaultDispatcher};
use crate::types::{Address, ArenaId};
use std::sync::Arc;

/// A lazily committed arena registered with a [`CowRegistry`].
#[derive(Debug)]
pub struct CowArena {
    id: ArenaId,
    slot: CowSlot,
    registry: Arc<CowRegistry>,
    reservation: Reservation,
}

impl CowArena {
    /// Reserve a window and register it with `registry`.
    ///
    /// Touching the window only works once a [`FaultDispatcher`] consulting
    /// the same registry is installed.
    pub fn new(config: &ArenaConfig, registry: &Arc<CowRegistry>) -> Result<Self> {
        let reservation = Reservation::reserve(&config.layout)?;
        let slot = registry.register(reservation.data_window())?;
        let id = ArenaId::new();

        let dispatched = FaultDispatcher::installed()
            .is_some_and(|d| Arc::ptr_eq(d.registry(), registry));
        if !dispatched {
            tracing::warn!(
                arena = %id,
                "COW arena created without a fault dispatcher for its registry; first touch will crash"
            );
        }
        tracing::info!(
            arena = %id,
            slot = %slot,
            data = %reservation.data(),
            size = reservation.layout().data_window_size,
            "Created COW arena"
        );

        Ok(Self {
            id,
            slot,
            registry: Arc::clone(registry),
            reservation,
        })
    }

    /// Arena identifier.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Start of the data window.
    pub fn data(&self) -> Address {
        self.reservation.data()
    }

    /// Size of the data window.
    pub fn size(&self) -> usize {
        self.reservation.layout().data_window_size
    }

    /// Registry slot held by this arena.
    pub fn slot(&self) -> CowSlot {
        self.slot
    }

    /// Commit the page containing `addr` if it lies in this arena's window.
    pub fn try_handle_fault(&self, addr: Address) -> bool {
        self.registry.try_handle_fault_in(self.slot, addr)
    }

    /// Pages committed in this arena so far.
    pub fn committed_pages(&self) -> u64 {
        self.registry.committed_pages(self.slot)
    }
}

impl Drop for CowArena {
    fn drop(&mut self) {
        let committed = self.registry.committed_pages(self.slot);
        // Deregistration waits for in-flight handlers, so the reservation
        // can be released right after.
        self.registry.deregister(self.slot);
        tracing::info!(
            arena = %self.id,
            committed_pages = committed,
            "Releasing COW arena"
        );
    }
}
