//! Query-scoped access to the on-disk file maps.
//!
//! File maps are memory-mapped; keeping every map of a large project
//! resident would exhaust address space. A [`QueryScope`] lives for one
//! query and caches opened maps in an LRU bounded by
//! `ProjectConfig::max_open_file_maps`, preserving locality across the
//! multi-file walks a single query performs.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crux_core::{FileId, LocationListTable, SymbolTable};
use crux_storage::{ArtifactKind, PersistedArchive, StorageError};

pub const FILE_MAP_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileMapKind {
    Symbols,
    SymbolNames,
    Targets,
    Usrs,
}

/// On-disk short name of a map kind.
pub fn file_map_name(kind: FileMapKind) -> &'static str {
    match kind {
        FileMapKind::Symbols => "symbols",
        FileMapKind::SymbolNames => "symnames",
        FileMapKind::Targets => "targets",
        FileMapKind::Usrs => "usrs",
    }
}

pub(crate) fn artifact_kind(kind: FileMapKind) -> ArtifactKind {
    match kind {
        FileMapKind::Symbols => ArtifactKind::Symbols,
        FileMapKind::SymbolNames => ArtifactKind::SymbolNames,
        FileMapKind::Targets => ArtifactKind::Targets,
        FileMapKind::Usrs => ArtifactKind::Usrs,
    }
}

/// `<data_dir>/<file_id>/<map-name>`
pub(crate) fn file_map_path(data_dir: &Path, file_id: FileId, kind: FileMapKind) -> PathBuf {
    data_dir
        .join(file_id.to_raw().to_string())
        .join(file_map_name(kind))
}

pub type SymbolMap = PersistedArchive<SymbolTable>;
pub type NameMap = PersistedArchive<LocationListTable>;

pub struct QueryScope {
    data_dir: PathBuf,
    symbols: HashMap<FileId, Arc<SymbolMap>>,
    symbol_names: HashMap<FileId, Arc<NameMap>>,
    targets: HashMap<FileId, Arc<NameMap>>,
    usrs: HashMap<FileId, Arc<NameMap>>,
    /// LRU order, least-recent first.
    order: VecDeque<(FileMapKind, FileId)>,
    max: usize,
    total_opened: usize,
    load_failures: Vec<FileId>,
}

impl QueryScope {
    pub(crate) fn new(data_dir: PathBuf, max: usize) -> Self {
        Self {
            data_dir,
            symbols: HashMap::new(),
            symbol_names: HashMap::new(),
            targets: HashMap::new(),
            usrs: HashMap::new(),
            order: VecDeque::new(),
            max: max.max(1),
            total_opened: 0,
            load_failures: Vec::new(),
        }
    }

    /// Number of maps currently held open.
    pub fn open_count(&self) -> usize {
        self.order.len()
    }

    /// Number of maps opened over the scope's lifetime (evictions included).
    pub fn total_opened(&self) -> usize {
        self.total_opened
    }

    /// File ids whose maps failed to load within this scope; the project
    /// marks them for re-index when the scope closes.
    pub(crate) fn take_load_failures(&mut self) -> Vec<FileId> {
        std::mem::take(&mut self.load_failures)
    }

    pub fn open_symbols(&mut self, file_id: FileId) -> Result<Arc<SymbolMap>, StorageError> {
        if let Some(map) = self.symbols.get(&file_id).cloned() {
            self.poke(FileMapKind::Symbols, file_id);
            return Ok(map);
        }
        let map = Arc::new(self.load::<SymbolTable>(FileMapKind::Symbols, file_id)?);
        self.symbols.insert(file_id, map.clone());
        self.inserted(FileMapKind::Symbols, file_id);
        Ok(map)
    }

    pub fn open_symbol_names(&mut self, file_id: FileId) -> Result<Arc<NameMap>, StorageError> {
        if let Some(map) = self.symbol_names.get(&file_id).cloned() {
            self.poke(FileMapKind::SymbolNames, file_id);
            return Ok(map);
        }
        let map = Arc::new(self.load::<LocationListTable>(FileMapKind::SymbolNames, file_id)?);
        self.symbol_names.insert(file_id, map.clone());
        self.inserted(FileMapKind::SymbolNames, file_id);
        Ok(map)
    }

    pub fn open_targets(&mut self, file_id: FileId) -> Result<Arc<NameMap>, StorageError> {
        if let Some(map) = self.targets.get(&file_id).cloned() {
            self.poke(FileMapKind::Targets, file_id);
            return Ok(map);
        }
        let map = Arc::new(self.load::<LocationListTable>(FileMapKind::Targets, file_id)?);
        self.targets.insert(file_id, map.clone());
        self.inserted(FileMapKind::Targets, file_id);
        Ok(map)
    }

    pub fn open_usrs(&mut self, file_id: FileId) -> Result<Arc<NameMap>, StorageError> {
        if let Some(map) = self.usrs.get(&file_id).cloned() {
            self.poke(FileMapKind::Usrs, file_id);
            return Ok(map);
        }
        let map = Arc::new(self.load::<LocationListTable>(FileMapKind::Usrs, file_id)?);
        self.usrs.insert(file_id, map.clone());
        self.inserted(FileMapKind::Usrs, file_id);
        Ok(map)
    }

    fn load<T>(
        &mut self,
        kind: FileMapKind,
        file_id: FileId,
    ) -> Result<PersistedArchive<T>, StorageError>
    where
        T: rkyv::Archive,
        rkyv::Archived<T>: crux_storage::CheckableArchived,
    {
        let path = file_map_path(&self.data_dir, file_id, kind);
        match PersistedArchive::<T>::open(&path, artifact_kind(kind), FILE_MAP_SCHEMA_VERSION) {
            Ok(map) => Ok(map),
            Err(err) => {
                tracing::error!(
                    target = "crux.project",
                    path = %path.display(),
                    file_id = file_id.to_raw(),
                    error = %err,
                    "failed to open file map"
                );
                self.load_failures.push(file_id);
                Err(err)
            }
        }
    }

    fn inserted(&mut self, kind: FileMapKind, file_id: FileId) {
        self.total_opened += 1;
        self.order.push_back((kind, file_id));
        if self.order.len() > self.max {
            if let Some((evict_kind, evict_id)) = self.order.pop_front() {
                self.evict(evict_kind, evict_id);
            }
        }
        debug_assert!(self.order.len() <= self.max);
    }

    fn poke(&mut self, kind: FileMapKind, file_id: FileId) {
        if let Some(pos) = self.order.iter().position(|&entry| entry == (kind, file_id)) {
            self.order.remove(pos);
            self.order.push_back((kind, file_id));
        }
    }

    fn evict(&mut self, kind: FileMapKind, file_id: FileId) {
        let removed = match kind {
            FileMapKind::Symbols => self.symbols.remove(&file_id).is_some(),
            FileMapKind::SymbolNames => self.symbol_names.remove(&file_id).is_some(),
            FileMapKind::Targets => self.targets.remove(&file_id).is_some(),
            FileMapKind::Usrs => self.usrs.remove(&file_id).is_some(),
        };
        debug_assert!(removed);
    }

    /// Total mapped payload bytes currently held open.
    pub fn resident_bytes(&self) -> usize {
        self.symbols.values().map(|m| m.payload_len()).sum::<usize>()
            + self
                .symbol_names
                .values()
                .map(|m| m.payload_len())
                .sum::<usize>()
            + self.targets.values().map(|m| m.payload_len()).sum::<usize>()
            + self.usrs.values().map(|m| m.payload_len()).sum::<usize>()
    }

    #[cfg(test)]
    fn cached_entry_count(&self) -> usize {
        self.symbols.len() + self.symbol_names.len() + self.targets.len() + self.usrs.len()
    }
}

impl Drop for QueryScope {
    fn drop(&mut self) {
        tracing::debug!(
            target = "crux.project",
            total_opened = self.total_opened,
            "query scope closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crux_core::{Location, Symbol, SymbolFlags, SymbolKind};
    use crux_storage::write_archive_atomic;
    use pretty_assertions::assert_eq;

    fn write_symbols(data_dir: &Path, file_raw: u32) {
        let file = FileId::from_raw(file_raw);
        let at = Location::new(file, 1, 1);
        let mut symbols = BTreeMap::new();
        symbols.insert(
            at,
            Symbol {
                location: at,
                kind: SymbolKind::Function,
                flags: SymbolFlags::DEFINITION,
                usr: format!("c:@F@f{file_raw}"),
                name: format!("f{file_raw}"),
                length: 2,
                end_line: 3,
                end_column: 1,
                base_usrs: Vec::new(),
            },
        );
        write_archive_atomic(
            &file_map_path(data_dir, file, FileMapKind::Symbols),
            ArtifactKind::Symbols,
            FILE_MAP_SCHEMA_VERSION,
            &SymbolTable::from_symbols(symbols),
        )
        .unwrap();
    }

    fn scope_invariant(scope: &QueryScope) {
        assert_eq!(scope.open_count(), scope.cached_entry_count());
        assert!(scope.open_count() <= scope.max);
    }

    #[test]
    fn lru_evicts_oldest_past_max() {
        let temp = tempfile::tempdir().unwrap();
        for raw in 1..=3 {
            write_symbols(temp.path(), raw);
        }

        let mut scope = QueryScope::new(temp.path().to_path_buf(), 2);
        scope.open_symbols(FileId::from_raw(1)).unwrap();
        scope.open_symbols(FileId::from_raw(2)).unwrap();
        scope.open_symbols(FileId::from_raw(3)).unwrap();

        assert_eq!(scope.total_opened(), 3);
        assert_eq!(scope.open_count(), 2);
        assert!(!scope.symbols.contains_key(&FileId::from_raw(1)));
        scope_invariant(&scope);
    }

    #[test]
    fn reopen_keeps_entry_live() {
        let temp = tempfile::tempdir().unwrap();
        for raw in 1..=3 {
            write_symbols(temp.path(), raw);
        }

        let mut scope = QueryScope::new(temp.path().to_path_buf(), 2);
        scope.open_symbols(FileId::from_raw(1)).unwrap();
        scope.open_symbols(FileId::from_raw(2)).unwrap();
        // Re-touching 1 makes 2 the eviction candidate.
        scope.open_symbols(FileId::from_raw(1)).unwrap();
        scope.open_symbols(FileId::from_raw(3)).unwrap();

        assert!(scope.symbols.contains_key(&FileId::from_raw(1)));
        assert!(!scope.symbols.contains_key(&FileId::from_raw(2)));
        assert!(scope.symbols.contains_key(&FileId::from_raw(3)));
        // Only three distinct opens: the re-touch was a cache hit.
        assert_eq!(scope.total_opened(), 3);
        scope_invariant(&scope);
    }

    #[test]
    fn load_failure_leaves_scope_unchanged() {
        let temp = tempfile::tempdir().unwrap();
        let mut scope = QueryScope::new(temp.path().to_path_buf(), 2);

        assert!(scope.open_symbols(FileId::from_raw(9)).is_err());
        assert_eq!(scope.open_count(), 0);
        assert_eq!(scope.total_opened(), 0);
        assert_eq!(scope.take_load_failures(), vec![FileId::from_raw(9)]);
        scope_invariant(&scope);
    }
}
