//! Simple arena: an ordinary zeroed heap allocation, no guards.

use crate::error::{Result, VmError};
use crate::types::{Address, ArenaId, PAGE_SIZE};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A fixed-size, eagerly committed arena backed by the global allocator.
#[derive(Debug)]
pub struct SimpleArena {
    id: ArenaId,
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the arena owns its allocation and only hands out addresses.
unsafe impl Send for SimpleArena {}
// SAFETY: no method mutates through `&self`.
unsafe impl Sync for SimpleArena {}

impl SimpleArena {
    /// Allocate `size` zeroed bytes, page aligned.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(VmError::InvalidLayout {
                cause: "simple arena size must be non-zero".to_string(),
            });
        }
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|e| VmError::InvalidLayout {
            cause: format!("simple arena of {size} bytes: {e}"),
        })?;

        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        let id = ArenaId::new();
        tracing::info!(arena = %id, data = %Address::from_ptr(raw), size, "Created simple arena");
        Ok(Self { id, ptr, layout })
    }

    /// Arena identifier.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Start of the allocation.
    pub fn data(&self) -> Address {
        Address::from_ptr(self.ptr.as_ptr())
    }

    /// Size requested at construction.
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for SimpleArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        tracing::debug!(arena = %self.id, "Released simple arena");
    }
}
