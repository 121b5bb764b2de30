//! Address-space reservation with a guarded data window.
//!
//! A reservation never hands out references into its range, only
//! [`Address`]es, so changing what backs a sub-range cannot invalidate
//! anything the borrow checker tracks. Raw-pointer users of the data
//! window are on their own, exactly as with any other shared memory.

use crate::config::Layout;
use crate::error::{Result, VmError};
use crate::sys::{self, Protection};
use crate::types::{Address, AddressRange, page_align_up};
use std::fs::File;

/// One large no-access virtual range with a data window inside it.
///
/// Released with a single unmap when dropped. Not `Clone`: exactly one
/// owner, exactly one release.
#[derive(Debug)]
pub struct Reservation {
    base: Address,
    data: Address,
    layout: Layout,
}

impl Reservation {
    /// Reserve address space for `layout` at an OS-chosen base.
    pub fn reserve(layout: &Layout) -> Result<Self> {
        layout.validate()?;
        let base = sys::reserve(layout.reservation_size)?;
        let data = base.add(layout.negative_guard_size);

        tracing::debug!(
            base = %base,
            data = %data,
            reservation = layout.reservation_size,
            window = layout.data_window_size,
            "Reserved address space"
        );

        Ok(Self {
            base,
            data,
            layout: *layout,
        })
    }

    /// Start of the reserved range.
    pub fn base(&self) -> Address {
        self.base
    }

    /// Start of the data window.
    pub fn data(&self) -> Address {
        self.data
    }

    /// The geometry this reservation was created with.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The whole reserved range.
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.base, self.layout.reservation_size)
    }

    /// The data window.
    pub fn data_window(&self) -> AddressRange {
        AddressRange::new(self.data, self.layout.data_window_size)
    }

    /// Resolve `[offset, offset + len)` of the data window to addresses.
    fn window_range(&self, offset: usize, len: usize) -> Result<AddressRange> {
        let window = self.layout.data_window_size;
        let fits = page_align_up(len)
            .and_then(|rounded| offset.checked_add(rounded))
            .is_some_and(|end| end <= window);
        if !fits || len == 0 || offset % crate::types::PAGE_SIZE != 0 {
            return Err(VmError::OutOfWindow {
                offset,
                len,
                window,
            });
        }
        Ok(AddressRange::new(self.data.add(offset), len))
    }

    /// Back `[data + offset, data + offset + len)` with fresh zero-filled
    /// memory, read-write or read-only.
    pub fn commit(&self, offset: usize, len: usize, writable: bool) -> Result<()> {
        let range = self.window_range(offset, len)?;
        // SAFETY: the range is inside our own reservation.
        unsafe { sys::map_anonymous_fixed(range.start(), len, Protection::committed(writable))? };
        tracing::trace!(address = %range.start(), len, writable, "Committed range");
        Ok(())
    }

    /// Return `[data + offset, data + offset + len)` to the no-access guard
    /// state, discarding whatever backed it.
    pub fn decommit(&self, offset: usize, len: usize) -> Result<()> {
        let range = self.window_range(offset, len)?;
        // SAFETY: the range is inside our own reservation.
        unsafe { sys::map_anonymous_fixed(range.start(), len, Protection::None)? };
        tracing::trace!(address = %range.start(), len, "Decommitted range");
        Ok(())
    }

    /// Change the protection of an already backed sub-range.
    pub fn protect(&self, offset: usize, len: usize, prot: Protection) -> Result<()> {
        let range = self.window_range(offset, len)?;
        // SAFETY: the range is inside our own reservation.
        unsafe { sys::protect(range.start(), len, prot) }
    }

    /// Pin a sub-range in physical memory.
    pub fn lock(&self, offset: usize, len: usize) -> Result<()> {
        let range = self.window_range(offset, len)?;
        sys::lock_range(range.start(), len)
    }

    /// Back a sub-range with a shared mapping of `file`.
    pub(crate) fn map_file(
        &self,
        offset: usize,
        len: usize,
        writable: bool,
        file: &File,
        file_offset: u64,
    ) -> Result<()> {
        let range = self.window_range(offset, len)?;
        // SAFETY: the range is inside our own reservation.
        unsafe {
            sys::map_file_fixed(
                range.start(),
                len,
                Protection::committed(writable),
                file,
                file_offset,
            )
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // SAFETY: we own the whole range and nothing in this crate can
        // reach it after the owner is gone.
        match unsafe { sys::unmap(self.base, self.layout.reservation_size) } {
            Ok(()) => tracing::debug!(base = %self.base, "Released reservation"),
            Err(e) => tracing::error!(base = %self.base, error = %e, "Failed to release reservation"),
        }
    }
}
