//! Source locations.

use serde::{Deserialize, Serialize};

use crate::FileId;

/// A `(file, line, column)` triple, totally ordered lexicographically.
///
/// Lines and columns are 1-based; the on-disk symbol maps are keyed by
/// `Location`, so the archived representation stores the raw file id.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(PartialEq, Eq, PartialOrd, Ord))]
pub struct Location {
    file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[inline]
    pub const fn new(file_id: FileId, line: u32, column: u32) -> Self {
        Self {
            file_id: file_id.to_raw(),
            line,
            column,
        }
    }

    #[inline]
    pub const fn file_id(&self) -> FileId {
        FileId::from_raw(self.file_id)
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.file_id != 0
    }

    /// The smallest location in `file` (used as a range-scan anchor).
    #[inline]
    pub const fn start_of(file_id: FileId) -> Self {
        Self {
            file_id: file_id.to_raw(),
            line: 0,
            column: 0,
        }
    }
}

impl ArchivedLocation {
    #[inline]
    pub fn to_location(&self) -> Location {
        Location {
            file_id: self.file_id,
            line: self.line,
            column: self.column,
        }
    }
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = Location::new(FileId::from_raw(1), 10, 2);
        let b = Location::new(FileId::from_raw(1), 10, 3);
        let c = Location::new(FileId::from_raw(1), 11, 1);
        let d = Location::new(FileId::from_raw(2), 1, 1);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn invalid_file_is_invalid_location() {
        assert!(!Location::new(FileId::NONE, 1, 1).is_valid());
        assert!(Location::new(FileId::from_raw(3), 1, 1).is_valid());
    }
}
