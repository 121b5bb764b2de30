//! Prelude for convenient imports.
//!
//! ```ignore
//! use wamem_core::prelude::*;
//! ```

// Core types
pub use crate::types::{Address, AddressRange, ArenaId, MappingId, PAGE_SIZE};

// Error handling
pub use crate::error::{Result, ResultExt, VmError};

// Configuration
pub use crate::config::{ArenaConfig, Layout};

// Arenas
pub use crate::arena::{
    Arena, ArenaMode, CowArena, FileMapping, GuardedArena, MapRequest, RawBuffer, SimpleArena,
};

// Fault handling
pub use crate::fault::{CowRegistry, Fallback, FaultDispatcher, FaultStats};
