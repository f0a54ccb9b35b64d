//! On-disk storage for crux: validated, mmap-backed `rkyv` archives.
//!
//! Every artifact (per-file symbol tables and persisted project state)
//! shares one container format: a fixed 64-byte header followed by an
//! `rkyv` archive of the payload type. Readers validate the header (magic,
//! artifact kind, schema version, engine version, endianness, pointer
//! width), verify a truncated blake3 hash of the payload, and then run
//! `rkyv` byte validation before handing out a zero-copy view.
//!
//! Writers are atomic: serialize, write header + payload to `<path>.tmp`,
//! fsync, rename.

mod header;
mod persisted;
mod write;

pub use header::{ArtifactKind, StorageHeader, HEADER_LEN};
pub use persisted::{CheckableArchived, PersistedArchive, StorageError};
pub use write::write_archive_atomic;
