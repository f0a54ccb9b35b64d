use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crux_core::FileId;

/// Allocates stable `FileId`s for paths and supports reverse lookup.
///
/// Ids start at 1; `FileId::NONE` is never handed out. The registry is
/// shared between the main loop and indexer workers, so lookups go through
/// an internal mutex.
#[derive(Debug, Default)]
pub struct PathRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    path_to_id: HashMap<PathBuf, FileId>,
    id_to_path: Vec<PathBuf>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable id for `path`, allocating a new one if necessary.
    pub fn insert_file(&self, path: impl AsRef<Path>) -> FileId {
        let path = path.as_ref();
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.path_to_id.get(path) {
            return id;
        }

        let raw = u32::try_from(inner.id_to_path.len() + 1).expect("too many file ids allocated");
        let id = FileId::from_raw(raw);
        inner.id_to_path.push(path.to_path_buf());
        inner.path_to_id.insert(path.to_path_buf(), id);
        id
    }

    /// Registers `path` under a pre-existing id (used by project restore).
    ///
    /// Ids between the current high-water mark and `id` are reserved so a
    /// later `insert_file` never collides with a restored id.
    pub fn restore_file(&self, path: impl AsRef<Path>, id: FileId) {
        assert!(id.is_valid());
        let path = path.as_ref();
        let mut inner = self.inner.lock();
        let index = (id.to_raw() - 1) as usize;
        if inner.id_to_path.len() <= index {
            inner.id_to_path.resize(index + 1, PathBuf::new());
        }
        inner.id_to_path[index] = path.to_path_buf();
        inner.path_to_id.insert(path.to_path_buf(), id);
    }

    /// Returns the id for `path` if it has been interned.
    pub fn file_id(&self, path: impl AsRef<Path>) -> Option<FileId> {
        self.inner.lock().path_to_id.get(path.as_ref()).copied()
    }

    /// Returns the path for `id`.
    pub fn path(&self, id: FileId) -> Option<PathBuf> {
        if !id.is_valid() {
            return None;
        }
        let inner = self.inner.lock();
        inner
            .id_to_path
            .get((id.to_raw() - 1) as usize)
            .filter(|p| !p.as_os_str().is_empty())
            .cloned()
    }
}
