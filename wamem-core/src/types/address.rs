//! Address arithmetic over reserved memory.
//!
//! Addresses are plain integers. They are only turned into pointers at the
//! few places where memory is actually touched or handed to the OS, so all
//! layout arithmetic (base + offset, page rounding, overlap tests) stays in
//! the integer domain.

use std::fmt;

/// Granularity of commits and fault resolution.
pub const PAGE_SIZE: usize = 4096;

/// Round `value` down to a page boundary.
#[must_use]
pub const fn page_align_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// Round `value` up to a page boundary, or `None` if that overflows.
#[must_use]
pub const fn page_align_up(value: usize) -> Option<usize> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// A virtual address.
///
/// This is deliberately not a pointer: holding an `Address` grants no access
/// to the memory behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Create an address from a raw integer.
    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Create an address from a pointer.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Get the raw address value.
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// View the address as a mutable byte pointer.
    #[must_use]
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Check if this is the null address.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Add a byte offset.
    #[must_use]
    pub const fn add(&self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    /// Distance in bytes from `base` to this address.
    #[must_use]
    pub const fn offset_from(&self, base: Self) -> usize {
        self.0 - base.0
    }

    /// The base address of the page containing this address.
    #[must_use]
    pub const fn page_base(&self) -> Self {
        Self(page_align_down(self.0))
    }

    /// Check if the address lies on a page boundary.
    #[must_use]
    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

/// A half-open range `[start, start + len)` of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: Address,
    len: usize,
}

impl AddressRange {
    /// Create a new range.
    #[must_use]
    pub const fn new(start: Address, len: usize) -> Self {
        Self { start, len }
    }

    /// First address of the range.
    #[must_use]
    pub const fn start(&self) -> Address {
        self.start
    }

    /// One past the last address of the range.
    #[must_use]
    pub const fn end(&self) -> Address {
        self.start.add(self.len)
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the range is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if `addr` lies inside the range.
    #[must_use]
    pub const fn contains(&self, addr: Address) -> bool {
        addr.0 >= self.start.0 && addr.0 - self.start.0 < self.len
    }

    /// Check if two ranges share at least one byte.
    ///
    /// Ranges that merely touch (one ends where the other starts) do not
    /// overlap.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.0 < other.end().0 && other.start.0 < self.end().0
    }

    /// The same range with its length rounded up to whole pages.
    ///
    /// `None` if the rounded range would wrap the address space.
    #[must_use]
    pub const fn page_rounded(&self) -> Option<Self> {
        let Some(len) = page_align_up(self.len) else {
            return None;
        };
        if self.start.0.checked_add(len).is_none() {
            return None;
        }
        Some(Self {
            start: self.start,
            len,
        })
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}
