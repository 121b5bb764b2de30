//! Guarded arena: file mappings below the budget, committed heap above it.
//!
//! ```text
//! data                       data + budget                      data + window
//!  ├──────────────────────────┼──────────────────────────────────┤
//!  │ file mappings / PROT_NONE │ heap (committed read-write)      │
//! ```

use super::mapping::{FileMapping, MapRequest, MappingTable};
use super::reservation::Reservation;
use crate::config::ArenaConfig;
use crate::error::{Result, VmError, mapping_args};
use crate::sys;
use crate::types::{Address, AddressRange, ArenaId, MappingId, PAGE_SIZE, page_align_up};
use parking_lot::Mutex;

/// A reservation whose high sub-range is eagerly committed and whose low
/// sub-range holds file mappings.
#[derive(Debug)]
pub struct GuardedArena {
    id: ArenaId,
    reservation_budget: usize,
    // Declared before `reservation`: the table is dropped first and never
    // touches the OS, then the single reservation unmap removes every file
    // mapping along with the rest of the range.
    mappings: Mutex<MappingTable>,
    reservation: Reservation,
}

impl GuardedArena {
    /// Reserve address space and commit the heap above `reservation_budget`.
    pub fn new(config: &ArenaConfig, reservation_budget: usize) -> Result<Self> {
        let window = config.layout.data_window_size;
        if reservation_budget >= window || reservation_budget % PAGE_SIZE != 0 {
            return Err(VmError::InvalidBudget {
                budget: reservation_budget,
                window,
            });
        }

        let reservation = Reservation::reserve(&config.layout)?;
        let heap_len = window - reservation_budget;
        reservation.commit(reservation_budget, heap_len, true)?;
        if config.lock_heap {
            reservation.lock(reservation_budget, heap_len)?;
        }

        let id = ArenaId::new();
        tracing::info!(
            arena = %id,
            data = %reservation.data(),
            budget = reservation_budget,
            heap = heap_len,
            locked = config.lock_heap,
            "Created guarded arena"
        );

        Ok(Self {
            id,
            reservation_budget,
            mappings: Mutex::new(MappingTable::new()),
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

    /// Bytes at the bottom of the window set aside for file mappings.
    pub fn reservation_budget(&self) -> usize {
        self.reservation_budget
    }

    /// The committed heap sub-range.
    pub fn heap(&self) -> AddressRange {
        AddressRange::new(
            self.data().add(self.reservation_budget),
            self.size() - self.reservation_budget,
        )
    }

    /// The underlying reservation.
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    fn validate(&self, req: &MapRequest) -> Result<AddressRange> {
        if req.length == 0 {
            return Err(VmError::EmptyMapping {
                path: req.path.clone(),
            });
        }
        if req.offset % PAGE_SIZE != 0 {
            return Err(VmError::MisalignedMapping {
                what: "offset",
                value: req.offset,
                page_size: PAGE_SIZE,
            });
        }
        if req.file_offset % PAGE_SIZE as u64 != 0 {
            return Err(VmError::MisalignedMapping {
                what: "file offset",
                value: req.file_offset as usize,
                page_size: PAGE_SIZE,
            });
        }

        // Bound the request in offset space before any address is formed.
        let rounded = page_align_up(req.length).filter(|len| {
            req.offset
                .checked_add(*len)
                .is_some_and(|end| end <= self.reservation_budget)
        });
        let Some(len) = rounded else {
            return Err(VmError::MappingOutOfBounds {
                offset: req.offset,
                len: req.length,
                budget: self.reservation_budget,
            });
        };
        Ok(AddressRange::new(self.data().add(req.offset), len))
    }

    /// Map a file into the mapping budget and return its id.
    ///
    /// # Panics
    ///
    /// Panics with an [`OverlapViolation`](super::OverlapViolation) if the
    /// page-rounded range intersects a live mapping of this arena. The table
    /// is checked before anything is opened or mapped.
    pub fn map_file(&self, req: &MapRequest) -> Result<MappingId> {
        let range = self.validate(req)?;
        let mut table = self.mappings.lock();
        table.assert_disjoint(&range, &req.path);

        let file = sys::open(&req.path, req.writable, req.create)?;
        if req.exclusive_lock {
            sys::lock_exclusive(&file, &req.path)?;
        }

        let actual = sys::stat(&file)?.len();
        let required = req.required_file_len();
        if actual < required {
            if !req.create {
                return Err(VmError::BackingFileTooShort {
                    path: req.path.clone(),
                    required,
                    actual,
                });
            }
            sys::truncate(&file, required)?;
        }

        self.reservation
            .map_file(req.offset, req.length, req.writable, &file, req.file_offset)?;
        // The mapping keeps the file contents reachable; the descriptor (and
        // any advisory lock on it) is not needed past this point.
        sys::close(file)?;

        let id = table.insert(range, req.length, req.writable, req.path.clone());
        tracing::debug!(
            arena = %self.id,
            mapping = %id,
            address = %range.start(),
            len = req.length,
            writable = req.writable,
            path = %req.path.display(),
            "Mapped file"
        );
        Ok(id)
    }

    /// Remove a mapping and return its range to the no-access guard state.
    ///
    /// Unknown ids are ignored. If the range cannot be decommitted the
    /// mapping stays in the table, since it is still live in the OS.
    pub fn unmap_file(&self, id: MappingId) -> Result<()> {
        self.unmap_with(id, |offset, len| self.reservation.decommit(offset, len))
    }

    fn unmap_with(
        &self,
        id: MappingId,
        decommit: impl FnOnce(usize, usize) -> Result<()>,
    ) -> Result<()> {
        let mut table = self.mappings.lock();
        let Some(range) = table.get(id).map(|m| m.range) else {
            tracing::trace!(arena = %self.id, mapping = %id, "Unmap of unknown mapping ignored");
            return Ok(());
        };

        decommit(range.start().offset_from(self.data()), range.len()).map_err(|e| match e {
            VmError::SystemCall {
                primitive, source, ..
            } => VmError::SystemCall {
                primitive,
                args: format!("{} at {}", mapping_args(id), range),
                source,
            },
            other => other,
        })?;
        table.remove(id);

        tracing::debug!(arena = %self.id, mapping = %id, range = %range, "Unmapped file");
        Ok(())
    }

    /// Snapshot of the live mappings, ordered by id.
    pub fn mappings(&self) -> Vec<FileMapping> {
        self.mappings.lock().iter().cloned().collect()
    }

    /// Number of live mappings.
    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }
}

impl Drop for GuardedArena {
    fn drop(&mut self) {
        let outstanding = self.mappings.get_mut().clear();
        tracing::info!(
            arena = %self.id,
            outstanding_mappings = outstanding,
            "Releasing guarded arena"
        );
    }
}
