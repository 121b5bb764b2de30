//! Linear memory arenas.
//!
//! An [`Arena`] is one of three closed variants:
//!
//! - [`SimpleArena`]: a zeroed heap allocation of the requested size.
//! - [`GuardedArena`]: a [`Reservation`] whose window is split into a file
//!   mapping budget and an eagerly committed heap.
//! - [`CowArena`]: a [`Reservation`] whose window is committed one page at a
//!   time by the fault dispatcher.
//!
//! Guarded and COW arenas always expose the full data window of their
//! layout; out-of-bounds accesses land in a no-access guard and fault.

mod buffer;
mod cow;
mod guarded;
mod mapping;
mod reservation;
mod simple;

pub use buffer::{RawBuffer, ReleaseFn, release_arena};
pub use cow::CowArena;
pub use guarded::GuardedArena;
pub use mapping::{FileMapping, MapRequest, MappingTable, OverlapViolation};
pub use reservation::Reservation;
pub use simple::SimpleArena;

use crate::config::ArenaConfig;
use crate::error::{Result, VmError};
use crate::fault::CowRegistry;
use crate::types::{Address, ArenaId, MappingId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which kind of arena to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ArenaMode {
    /// Plain heap allocation of `size` bytes.
    Simple {
        /// Bytes to allocate.
        size: usize,
    },
    /// File mappings below `reservation_budget`, committed heap above it.
    Guarded {
        /// Bytes at the bottom of the window reserved for file mappings.
        reservation_budget: usize,
    },
    /// Pages committed on first touch.
    Cow,
}

impl ArenaMode {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple { .. } => "simple",
            Self::Guarded { .. } => "guarded",
            Self::Cow => "cow",
        }
    }
}

impl fmt::Display for ArenaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple { size } => write!(f, "simple({size})"),
            Self::Guarded { reservation_budget } => write!(f, "guarded({reservation_budget})"),
            Self::Cow => f.write_str("cow"),
        }
    }
}

/// An arena of any mode.
#[derive(Debug)]
pub enum Arena {
    /// See [`SimpleArena`].
    Simple(SimpleArena),
    /// See [`GuardedArena`].
    Guarded(GuardedArena),
    /// See [`CowArena`].
    Cow(CowArena),
}

impl Arena {
    /// Create an arena of the given mode.
    ///
    /// `registry` is only used by COW arenas.
    pub fn create(mode: ArenaMode, config: &ArenaConfig, registry: &Arc<CowRegistry>) -> Result<Self> {
        tracing::debug!(mode = %mode, "Creating arena");
        match mode {
            ArenaMode::Simple { size } => Self::simple(size),
            ArenaMode::Guarded { reservation_budget } => Self::guarded(config, reservation_budget),
            ArenaMode::Cow => Self::cow(config, registry),
        }
    }

    /// Create a simple arena.
    pub fn simple(size: usize) -> Result<Self> {
        SimpleArena::new(size).map(Self::Simple)
    }

    /// Create a guarded arena.
    pub fn guarded(config: &ArenaConfig, reservation_budget: usize) -> Result<Self> {
        GuardedArena::new(config, reservation_budget).map(Self::Guarded)
    }

    /// Create a COW arena registered with `registry`.
    pub fn cow(config: &ArenaConfig, registry: &Arc<CowRegistry>) -> Result<Self> {
        CowArena::new(config, registry).map(Self::Cow)
    }

    /// Arena identifier.
    pub fn id(&self) -> ArenaId {
        match self {
            Self::Simple(a) => a.id(),
            Self::Guarded(a) => a.id(),
            Self::Cow(a) => a.id(),
        }
    }

    /// Start of the usable memory.
    pub fn data(&self) -> Address {
        match self {
            Self::Simple(a) => a.data(),
            Self::Guarded(a) => a.data(),
            Self::Cow(a) => a.data(),
        }
    }

    /// Usable bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Simple(a) => a.size(),
            Self::Guarded(a) => a.size(),
            Self::Cow(a) => a.size(),
        }
    }

    /// Mode name.
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Guarded(_) => "guarded",
            Self::Cow(_) => "cow",
        }
    }

    /// The guarded arena, if this is one.
    pub fn as_guarded(&self) -> Option<&GuardedArena> {
        match self {
            Self::Guarded(a) => Some(a),
            _ => None,
        }
    }

    /// The COW arena, if this is one.
    pub fn as_cow(&self) -> Option<&CowArena> {
        match self {
            Self::Cow(a) => Some(a),
            _ => None,
        }
    }

    fn guarded_or_err(&self) -> Result<&GuardedArena> {
        self.as_guarded().ok_or(VmError::NotGuarded {
            mode: self.mode_name(),
        })
    }

    /// Map a file. Only guarded arenas support this.
    pub fn map_file(&self, req: &MapRequest) -> Result<MappingId> {
        self.guarded_or_err()?.map_file(req)
    }

    /// Unmap a file. Only guarded arenas support this.
    pub fn unmap_file(&self, id: MappingId) -> Result<()> {
        self.guarded_or_err()?.unmap_file(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    #[test]
    fn create_each_mode() {
        let config = ArenaConfig::compact();
        let registry = Arc::new(CowRegistry::with_capacity(2));
        let window = config.layout.data_window_size;

        let simple = Arena::create(ArenaMode::Simple { size: 10 }, &config, &registry).unwrap();
        assert_eq!(simple.size(), 10);
        assert_eq!(simple.mode_name(), "simple");

        let guarded = Arena::create(
            ArenaMode::Guarded {
                reservation_budget: 16 * PAGE_SIZE,
            },
            &config,
            &registry,
        )
        .unwrap();
        assert_eq!(guarded.size(), window);
        assert!(guarded.as_guarded().is_some());

        let cow = Arena::create(ArenaMode::Cow, &config, &registry).unwrap();
        assert_eq!(cow.size(), window);
        assert!(cow.as_cow().is_some());
        assert_eq!(registry.live_count(), 1);
        assert_ne!(guarded.data(), cow.data());
    }

    #[test]
    fn mapping_requires_guarded() {
        let arena = Arena::simple(PAGE_SIZE).unwrap();
        let err = arena
            .map_file(&MapRequest::new("/dev/null", 0, 1))
            .unwrap_err();
        assert_eq!(err.code(), "E105");
        assert!(err.to_string().contains("simple"));
        assert_eq!(arena.unmap_file(MappingId::new(0)).unwrap_err().code(), "E105");
    }

    #[test]
    fn mode_serde() {
        let mode: ArenaMode = serde_yaml::from_str("mode: guarded\nreservation_budget: 65536\n").unwrap();
        assert_eq!(
            mode,
            ArenaMode::Guarded {
                reservation_budget: 65536
            }
        );
        assert_eq!(mode.name(), "guarded");
        assert_eq!(ArenaMode::Cow.to_string(), "cow");
    }
}
