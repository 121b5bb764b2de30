//! File-mapping bookkeeping for guarded arenas.
//!
//! Tracks the file-backed sub-ranges of one arena's mapping budget. Entries
//! are plain records: the OS-level mappings they describe are installed and
//! removed by the owning [`GuardedArena`](super::GuardedArena).

use crate::types::{AddressRange, MappingId};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A request to map a file into a guarded arena.
#[derive(Debug, Clone)]
pub struct MapRequest {
    /// Backing file.
    pub path: PathBuf,
    /// Offset from the arena's data window start. Page aligned.
    pub offset: usize,
    /// Bytes to map.
    pub length: usize,
    /// Map read-write and share writes with the file.
    pub writable: bool,
    /// Offset into the backing file. Page aligned.
    pub file_offset: u64,
    /// Create the file, and grow it to cover the mapping, if needed.
    pub create: bool,
    /// Hold an exclusive advisory lock on the file while mapping it.
    pub exclusive_lock: bool,
}

impl MapRequest {
    /// Map `length` bytes of `path` at arena `offset`, read-only.
    pub fn new(path: impl Into<PathBuf>, offset: usize, length: usize) -> Self {
        Self {
            path: path.into(),
            offset,
            length,
            writable: false,
            file_offset: 0,
            create: false,
            exclusive_lock: false,
        }
    }

    /// Map read-write.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Start at `file_offset` in the backing file.
    pub fn file_offset(mut self, file_offset: u64) -> Self {
        self.file_offset = file_offset;
        self
    }

    /// Create or grow the backing file as needed. Implies writable access to
    /// the file, not to the mapping.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Lock the backing file exclusively while the mapping is established.
    pub fn exclusive_lock(mut self, lock: bool) -> Self {
        self.exclusive_lock = lock;
        self
    }

    /// Bytes the backing file must hold for the mapping to be valid.
    pub fn required_file_len(&self) -> u64 {
        self.file_offset + self.length as u64
    }
}

/// A live file mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    /// Identifier assigned by the owning arena.
    pub id: MappingId,
    /// Absolute addresses covered, rounded up to whole pages.
    pub range: AddressRange,
    /// Bytes requested by the caller.
    pub length: usize,
    /// Whether the mapping is writable.
    pub writable: bool,
    /// The backing file.
    pub path: PathBuf,
}

impl FileMapping {
    /// Offset of the mapping from `data`.
    pub fn offset_from(&self, data: crate::types::Address) -> usize {
        self.range.start().offset_from(data)
    }
}

/// Two mappings of the same arena would share pages.
///
/// Never returned as an error: establishing the second mapping would
/// silently replace part of the first, so it is a programming error and
/// panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapViolation {
    /// The range being mapped.
    pub requested: AddressRange,
    /// The backing file of the new mapping.
    pub path: PathBuf,
    /// The live mapping it collides with.
    pub existing: MappingId,
    /// Range of the live mapping.
    pub existing_range: AddressRange,
}

impl fmt::Display for OverlapViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overlapping file mapping: {} for {} intersects {} at {}",
            self.requested,
            self.path.display(),
            self.existing,
            self.existing_range
        )
    }
}

/// The live mappings of one arena, keyed by id.
#[derive(Debug, Default)]
pub struct MappingTable {
    entries: BTreeMap<MappingId, FileMapping>,
    next_id: MappingId,
}

impl MappingTable {
    /// Create an empty table; the first id handed out is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a live mapping intersecting `range`.
    pub fn find_overlap(&self, range: &AddressRange) -> Option<&FileMapping> {
        self.entries.values().find(|m| m.range.overlaps(range))
    }

    /// Panic if `range` intersects any live mapping.
    pub fn assert_disjoint(&self, range: &AddressRange, path: &Path) {
        if let Some(existing) = self.find_overlap(range) {
            let violation = OverlapViolation {
                requested: *range,
                path: path.to_path_buf(),
                existing: existing.id,
                existing_range: existing.range,
            };
            tracing::error!(%violation, "Refusing to establish mapping");
            panic!("{violation}");
        }
    }

    /// Record a mapping under the next id.
    pub fn insert(
        &mut self,
        range: AddressRange,
        length: usize,
        writable: bool,
        path: PathBuf,
    ) -> MappingId {
        let id = self.next_id;
        self.next_id = id.next();
        self.entries.insert(
            id,
            FileMapping {
                id,
                range,
                length,
                writable,
                path,
            },
        );
        id
    }

    /// Forget a mapping; `None` if the id is not live.
    pub fn remove(&mut self, id: MappingId) -> Option<FileMapping> {
        self.entries.remove(&id)
    }

    /// Look up a live mapping.
    pub fn get(&self, id: MappingId) -> Option<&FileMapping> {
        self.entries.get(&id)
    }

    /// Live mappings ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &FileMapping> {
        self.entries.values()
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no mapping is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning how many were live.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, PAGE_SIZE};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn range(start: usize, len: usize) -> AddressRange {
        AddressRange::new(Address::new(start), len)
    }

    #[test]
    fn ids_are_sequential() {
        let mut table = MappingTable::new();
        let a = table.insert(range(0x1000, PAGE_SIZE), 10, false, "a".into());
        let b = table.insert(range(0x2000, PAGE_SIZE), 10, false, "b".into());
        assert_eq!(a, MappingId::new(0));
        assert_eq!(b, MappingId::new(1));

        table.remove(a);
        let c = table.insert(range(0x1000, PAGE_SIZE), 10, false, "c".into());
        assert_eq!(c, MappingId::new(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_unknown_is_none() {
        let mut table = MappingTable::new();
        assert!(table.remove(MappingId::new(42)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn overlap_detection() {
        let mut table = MappingTable::new();
        let id = table.insert(range(0x1000, 2 * PAGE_SIZE), 8000, true, "a".into());

        assert_eq!(
            table.find_overlap(&range(0x2000, PAGE_SIZE)).map(|m| m.id),
            Some(id)
        );
        assert!(table.find_overlap(&range(0x3000, PAGE_SIZE)).is_none());
        assert!(table.find_overlap(&range(0x0, PAGE_SIZE)).is_none());
    }

    #[test]
    fn overlap_panics_without_mutation() {
        let mut table = MappingTable::new();
        table.insert(range(0x1000, PAGE_SIZE), 6, false, "a".into());

        let result = catch_unwind(AssertUnwindSafe(|| {
            table.assert_disjoint(&range(0x1000, PAGE_SIZE), Path::new("b"));
        }));
        let payload = result.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.contains("overlapping file mapping"));
        assert!(message.contains("mapping_0"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn request_builder() {
        let req = MapRequest::new("/tmp/file", 0x1000, 6)
            .writable(true)
            .file_offset(8192)
            .create(true)
            .exclusive_lock(true);
        assert!(req.writable && req.create && req.exclusive_lock);
        assert_eq!(req.required_file_len(), 8198);
    }

    #[test]
    fn clear_reports_count() {
        let mut table = MappingTable::new();
        table.insert(range(0x1000, PAGE_SIZE), 1, false, "a".into());
        table.insert(range(0x2000, PAGE_SIZE), 1, false, "b".into());
        assert_eq!(table.clear(), 2);
        assert!(table.iter().next().is_none());
    }
}
