//! Error types for wamem.
//!
//! Every failure in this crate is unrecoverable for the arena it concerns:
//! there is no retry policy anywhere, so callers are expected to treat an
//! `Err` from construction or mapping as fatal for that arena. The error
//! carries enough context (primitive name, arguments, addresses) to make
//! the diagnostic actionable.
//!
//! Two conditions from the taxonomy are deliberately *not* variants here:
//! overlapping file mappings panic with an
//! [`OverlapViolation`](crate::arena::OverlapViolation), and unclaimed page
//! faults terminate the process from inside the fault dispatcher.

use crate::types::{Address, MappingId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for wamem operations.
#[derive(Error, Debug)]
pub enum VmError {
    // =========================================================================
    // Address Space Errors (E001-E099)
    // =========================================================================
    /// A checked OS primitive returned its error sentinel.
    #[error("E001: {primitive}({args}) failed: {source}")]
    SystemCall {
        /// Name of the failing primitive (e.g. `mmap`, `open`).
        primitive: &'static str,
        /// Rendered arguments of the failing call.
        args: String,
        /// The OS error, including the raw errno.
        #[source]
        source: io::Error,
    },

    /// The OS could not satisfy an address-space reservation.
    #[error("E002: Address space reservation of {size} bytes could not be satisfied: {source}")]
    ReservationExhausted {
        /// Number of bytes requested.
        size: usize,
        /// The OS error reported by the reservation call.
        #[source]
        source: io::Error,
    },

    /// Invalid arena size or layout parameters.
    #[error("E003: Invalid layout: {cause}")]
    InvalidLayout {
        /// Description of the layout problem.
        cause: String,
    },

    /// Guarded arena budget does not leave room for the heap.
    #[error(
        "E004: Reservation budget {budget} must be page aligned and below the data window size {window}"
    )]
    InvalidBudget {
        /// The requested budget.
        budget: usize,
        /// The data window size of the layout.
        window: usize,
    },

    /// A range falls outside the data window of a reservation.
    #[error("E005: Range at offset {offset} with length {len} exceeds data window of {window} bytes")]
    OutOfWindow {
        /// Offset from the data window start.
        offset: usize,
        /// Length of the range.
        len: usize,
        /// The data window size.
        window: usize,
    },

    // =========================================================================
    // File Mapping Errors (E101-E199)
    // =========================================================================
    /// File mapping does not fit in the sub-range reserved for mappings.
    #[error(
        "E101: Mapping at offset {offset} with length {len} exceeds the mapping budget of {budget} bytes"
    )]
    MappingOutOfBounds {
        /// Offset from the data window start.
        offset: usize,
        /// Page-rounded length of the mapping.
        len: usize,
        /// The arena's reservation budget.
        budget: usize,
    },

    /// Mapping offsets must be page aligned.
    #[error("E102: Mapping {what} {value:#x} is not aligned to the {page_size}-byte page size")]
    MisalignedMapping {
        /// Which offset was misaligned (`offset` or `file offset`).
        what: &'static str,
        /// The offending value.
        value: usize,
        /// The page size.
        page_size: usize,
    },

    /// Zero-length mapping request.
    #[error("E103: Mapping of {path} has zero length")]
    EmptyMapping {
        /// The backing file.
        path: PathBuf,
    },

    /// The backing file is shorter than the requested mapping.
    #[error("E104: Backing file {path} has {actual} bytes, mapping needs {required}")]
    BackingFileTooShort {
        /// The backing file.
        path: PathBuf,
        /// Bytes needed (`file_offset + length`).
        required: u64,
        /// Actual file length.
        actual: u64,
    },

    /// File-mapping operations require a guarded arena.
    #[error("E105: File mappings are only supported by guarded arenas, not {mode} arenas")]
    NotGuarded {
        /// The mode of the arena the operation was attempted on.
        mode: &'static str,
    },

    /// The backing file is locked by someone else.
    #[error("E106: Backing file {path} is locked: {source}")]
    BackingFileLocked {
        /// The backing file.
        path: PathBuf,
        /// The lock error.
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Fault Dispatch Errors (E201-E299)
    // =========================================================================
    /// No free slot left in the COW registry.
    #[error("E201: COW registry is full ({capacity} arenas)")]
    RegistryFull {
        /// The registry capacity.
        capacity: usize,
    },

    /// The process-wide fault dispatcher is already installed.
    #[error("E202: Fault dispatcher is already installed for this process")]
    DispatcherInstalled,

    /// Installing a signal handler failed.
    #[error("E203: Failed to install handler for {signal}: {source}")]
    SignalInstall {
        /// Signal name.
        signal: &'static str,
        /// The OS error.
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Configuration Errors (E301-E399)
    // =========================================================================
    /// Layout configuration file could not be read or parsed.
    #[error("E301: Failed to load layout from {path}: {cause}")]
    ConfigLoad {
        /// The configuration file.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },
}

impl VmError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SystemCall { .. } => "E001",
            Self::ReservationExhausted { .. } => "E002",
            Self::InvalidLayout { .. } => "E003",
            Self::InvalidBudget { .. } => "E004",
            Self::OutOfWindow { .. } => "E005",
            Self::MappingOutOfBounds { .. } => "E101",
            Self::MisalignedMapping { .. } => "E102",
            Self::EmptyMapping { .. } => "E103",
            Self::BackingFileTooShort { .. } => "E104",
            Self::NotGuarded { .. } => "E105",
            Self::BackingFileLocked { .. } => "E106",
            Self::RegistryFull { .. } => "E201",
            Self::DispatcherInstalled => "E202",
            Self::SignalInstall { .. } => "E203",
            Self::ConfigLoad { .. } => "E301",
        }
    }

    /// The raw OS error code, if this error came from the OS.
    #[must_use]
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::SystemCall { source, .. }
            | Self::ReservationExhausted { source, .. }
            | Self::BackingFileLocked { source, .. }
            | Self::SignalInstall { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Check if this error is about the caller's arguments rather than the OS.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLayout { .. }
                | Self::InvalidBudget { .. }
                | Self::OutOfWindow { .. }
                | Self::MappingOutOfBounds { .. }
                | Self::MisalignedMapping { .. }
                | Self::EmptyMapping { .. }
                | Self::NotGuarded { .. }
        )
    }
}

/// Result type alias using `VmError`.
pub type Result<T> = std::result::Result<T, VmError>;

/// Extension trait for attaching primitive context to raw `io::Error`s.
pub trait ResultExt<T> {
    /// Wrap an I/O failure as a [`VmError::SystemCall`].
    fn syscall(self, primitive: &'static str, args: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, io::Error> {
    fn syscall(self, primitive: &'static str, args: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| VmError::SystemCall {
            primitive,
            args: args(),
            source,
        })
    }
}

/// Render a `(address, len)` pair the way syscall diagnostics print them.
pub(crate) fn range_args(address: Address, len: usize) -> String {
    format!("{address}, {len}")
}

/// Render a mapping id for diagnostics.
pub(crate) fn mapping_args(id: MappingId) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = VmError::SystemCall {
            primitive: "mmap",
            args: "0x0, 4096".to_string(),
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert_eq!(err.code(), "E001");
        assert_eq!(err.os_error(), Some(libc::ENOMEM));

        let err = VmError::RegistryFull { capacity: 4 };
        assert_eq!(err.code(), "E201");
        assert_eq!(err.os_error(), None);
    }

    #[test]
    fn error_display() {
        let err = VmError::SystemCall {
            primitive: "mprotect",
            args: range_args(Address::new(0x1000), 4096),
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("E001"));
        assert!(msg.contains("mprotect(0x00001000, 4096)"));
    }

    #[test]
    fn usage_errors() {
        assert!(VmError::NotGuarded { mode: "cow" }.is_usage_error());
        assert!(!VmError::DispatcherInstalled.is_usage_error());
    }

    #[test]
    fn syscall_context_is_attached() {
        let res: std::result::Result<(), io::Error> =
            Err(io::Error::from_raw_os_error(libc::ENOENT));
        let err = res.syscall("open", || "\"/nope\"".to_string()).unwrap_err();
        match err {
            VmError::SystemCall { primitive, args, .. } => {
                assert_eq!(primitive, "open");
                assert_eq!(args, "\"/nope\"");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mapping_args(MappingId::new(3)), "mapping_3");
    }
}
