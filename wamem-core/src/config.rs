//! Arena layout and configuration.
//!
//! ```text
//! base                data                         data + window      base + reservation
//!  │ negative guard    │ data window                  │ trailing guard    │
//!  ├───────────────────┼──────────────────────────────┼───────────────────┤
//!  │ PROT_NONE         │ mode dependent               │ PROT_NONE         │
//! ```

use crate::error::{Result, VmError};
use crate::types::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

const GIB: usize = 1024 * 1024 * 1024;

/// Size of one wasm page.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Total size of every reservation: 10 GiB.
pub const RESERVATION_SIZE: usize = 10 * GIB;

/// Guard placed before the data window: 2 GiB.
pub const NEGATIVE_GUARD_SIZE: usize = 2 * GIB;

/// Size of the data window: one wasm page short of 4 GiB, the largest
/// buffer engines accept for an imported memory.
pub const DATA_WINDOW_SIZE: usize = WASM_PAGE_SIZE * (65536 - 1);

/// Default number of COW arenas a registry can track.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Geometry of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Total reserved bytes.
    pub reservation_size: usize,
    /// Bytes between the reservation base and the data window.
    pub negative_guard_size: usize,
    /// Bytes in the data window.
    pub data_window_size: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            reservation_size: RESERVATION_SIZE,
            negative_guard_size: NEGATIVE_GUARD_SIZE,
            data_window_size: DATA_WINDOW_SIZE,
        }
    }
}

impl Layout {
    /// Create a validated layout.
    pub fn new(
        reservation_size: usize,
        negative_guard_size: usize,
        data_window_size: usize,
    ) -> Result<Self> {
        let layout = Self {
            reservation_size,
            negative_guard_size,
            data_window_size,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// A small layout (64 MiB reservation, 16 MiB guard, 32 MiB window) for
    /// tests and tools that create many arenas.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            reservation_size: 64 * 1024 * 1024,
            negative_guard_size: 16 * 1024 * 1024,
            data_window_size: 32 * 1024 * 1024,
        }
    }

    /// Load a layout from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| VmError::ConfigLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            VmError::ConfigLoad { cause, .. } => VmError::ConfigLoad {
                path: path.to_path_buf(),
                cause,
            },
            other => other,
        })
    }

    /// Parse a layout from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let layout: Self = serde_yaml::from_str(text).map_err(|e| VmError::ConfigLoad {
            path: "<inline>".into(),
            cause: e.to_string(),
        })?;
        layout.validate()?;
        Ok(layout)
    }

    /// Check alignment and containment of the data window.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("reservation_size", self.reservation_size),
            ("negative_guard_size", self.negative_guard_size),
            ("data_window_size", self.data_window_size),
        ];
        for (name, value) in fields {
            if value % PAGE_SIZE != 0 {
                return Err(VmError::InvalidLayout {
                    cause: format!("{name} {value} is not a multiple of {PAGE_SIZE}"),
                });
            }
        }

        if self.data_window_size == 0 {
            return Err(VmError::InvalidLayout {
                cause: "data_window_size must be non-zero".to_string(),
            });
        }

        let end = self
            .negative_guard_size
            .checked_add(self.data_window_size)
            .ok_or_else(|| VmError::InvalidLayout {
                cause: "negative guard plus data window overflows".to_string(),
            })?;
        if end > self.reservation_size {
            return Err(VmError::InvalidLayout {
                cause: format!(
                    "negative guard {} plus data window {} exceeds reservation {}",
                    self.negative_guard_size, self.data_window_size, self.reservation_size
                ),
            });
        }
        Ok(())
    }

    /// Bytes of trailing guard after the data window.
    #[must_use]
    pub fn trailing_guard_size(&self) -> usize {
        self.reservation_size - self.negative_guard_size - self.data_window_size
    }
}

/// Configuration for arena creation.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Reservation geometry for guarded and COW arenas.
    pub layout: Layout,
    /// Pin the committed heap of guarded arenas in physical memory.
    pub lock_heap: bool,
    /// Slots in registries built from this configuration.
    pub registry_capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            lock_heap: false,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

impl ArenaConfig {
    /// Configuration with the compact layout, for tests.
    pub fn compact() -> Self {
        Self::default().with_layout(Layout::compact())
    }

    /// Use a custom layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Pin the guarded heap after committing it.
    pub fn with_locked_heap(mut self, lock: bool) -> Self {
        self.lock_heap = lock;
        self
    }

    /// Set the COW registry capacity.
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }
}

/// Round a requested simple-arena size to what will be usable.
///
/// Simple arenas are heap allocations and keep the exact size; this is
/// only used to report how many pages the request spans.
#[must_use]
pub fn pages_spanned(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        let layout = Layout::default();
        layout.validate().unwrap();
        assert_eq!(layout.data_window_size, 65535 * 65536);
        assert_eq!(
            layout.trailing_guard_size(),
            RESERVATION_SIZE - NEGATIVE_GUARD_SIZE - DATA_WINDOW_SIZE
        );
    }

    #[test]
    fn compact_layout_is_valid() {
        Layout::compact().validate().unwrap();
    }

    #[test]
    fn rejects_unaligned_fields() {
        let err = Layout::new(1 << 20, 100, 1 << 16).unwrap_err();
        assert_eq!(err.code(), "E003");
        assert!(err.to_string().contains("negative_guard_size"));
    }

    #[test]
    fn rejects_window_past_reservation() {
        let err = Layout::new(1 << 20, 1 << 19, 1 << 20).unwrap_err();
        assert!(err.to_string().contains("exceeds reservation"));
    }

    #[test]
    fn rejects_empty_window() {
        assert!(Layout::new(1 << 20, 0, 0).is_err());
    }

    #[test]
    fn yaml_fills_defaults() {
        let layout = Layout::from_yaml_str("data_window_size: 1048576\n").unwrap();
        assert_eq!(layout.data_window_size, 1 << 20);
        assert_eq!(layout.reservation_size, RESERVATION_SIZE);
    }

    #[test]
    fn yaml_errors_carry_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.yaml");
        std::fs::write(&path, "reservation_size: [").unwrap();
        let err = Layout::from_yaml_file(&path).unwrap_err();
        assert_eq!(err.code(), "E301");
        assert!(err.to_string().contains("layout.yaml"));
    }

    #[test]
    fn config_builder() {
        let config = ArenaConfig::default()
            .with_layout(Layout::compact())
            .with_locked_heap(true)
            .with_registry_capacity(8);
        assert_eq!(config.layout, Layout::compact());
        assert!(config.lock_heap);
        assert_eq!(config.registry_capacity, 8);
        assert_eq!(
            ArenaConfig::default().registry_capacity,
            DEFAULT_REGISTRY_CAPACITY
        );
        assert_eq!(pages_spanned(1), 1);
        assert_eq!(pages_spanned(PAGE_SIZE + 1), 2);
    }
}
