//! Core types for wamem.
//!
//! This module provides the fundamental value types used throughout the crate:
//! - `Address`: Opaque virtual address (integer domain, never a reference)
//! - `AddressRange`: Half-open `[start, start + len)` range of addresses
//! - `ArenaId`: Unique identifier of an arena, used for log correlation
//! - `MappingId`: Per-arena sequential identifier of a file mapping

mod address;
mod ids;

pub use address::{Address, AddressRange, PAGE_SIZE, page_align_down, page_align_up};
pub use ids::{ArenaId, MappingId};
