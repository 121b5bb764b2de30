//! wamem Core Library
//!
//! Guarded linear memory arenas carved out of large virtual address
//! reservations.
//!
//! # Overview
//!
//! Every guarded or COW arena owns one reservation: a big no-access range
//! with a data window inside it. Accesses that run off either end of the
//! window hit a guard and fault instead of corrupting neighbouring memory.
//!
//! # Key Components
//!
//! - **Arena**: simple, guarded (heap + file mappings) and copy-on-write
//!   variants behind one [`Arena`] enum
//! - **Fault**: the COW registry and the process-wide fault dispatcher
//! - **Sys**: checked wrappers around the OS primitives
//! - **Types**: addresses, ranges and identifiers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wamem_core::prelude::*;
//!
//! # fn main() -> wamem_core::Result<()> {
//! let registry = Arc::new(CowRegistry::default());
//! FaultDispatcher::install(Arc::clone(&registry), Fallback::Previous)?;
//!
//! let arena = Arena::cow(&ArenaConfig::default(), &registry)?;
//! // First touch commits the page.
//! unsafe { arena.data().as_mut_ptr().write(1) };
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(all(unix, target_pointer_width = "64")))]
compile_error!("wamem requires a 64-bit unix target");

pub mod arena;
pub mod config;
pub mod error;
pub mod fault;
pub mod prelude;
pub mod sys;
pub mod types;

// Re-export key types at crate root for convenience
pub use arena::{Arena, ArenaMode, MapRequest, RawBuffer};
pub use config::{ArenaConfig, Layout};
pub use error::{Result, VmError};
pub use fault::{CowRegistry, Fallback, FaultDispatcher};
pub use types::{Address, AddressRange, ArenaId, MappingId, PAGE_SIZE};
