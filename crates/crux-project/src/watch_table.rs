//! Directory → watch-mode bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crux_vfs::FileWatcher;

/// Why a directory is being watched. A directory may carry several bits; the
/// watcher registration is dropped when the last bit is cleared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WatchModes(u8);

impl WatchModes {
    pub const NONE: Self = Self(0);
    pub const FILE_MANAGER: Self = Self(1 << 0);
    pub const SOURCE_FILE: Self = Self(1 << 1);
    pub const DEPENDENCY: Self = Self(1 << 2);
    pub const COMPILATION_DATABASE: Self = Self(1 << 3);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    entries: HashMap<PathBuf, WatchModes>,
}

impl WatchTable {
    /// ORs `mode` into the directory's bitset; registers the OS watch on the
    /// first bit. Watcher failures are logged and the bookkeeping proceeds,
    /// so a later `unwatch` stays balanced.
    pub fn watch(&mut self, watcher: &mut dyn FileWatcher, dir: &Path, mode: WatchModes) {
        debug_assert!(!mode.is_empty());
        let entry = self.entries.entry(dir.to_path_buf()).or_default();
        let newly_watched = entry.is_empty();
        *entry = entry.with(mode);

        if newly_watched {
            if let Err(err) = watcher.watch_dir(dir) {
                tracing::warn!(
                    target = "crux.project",
                    dir = %dir.display(),
                    error = %err,
                    "failed to register directory watch"
                );
            }
        }
    }

    /// Clears `mode`; unregisters and drops the entry when no bits remain.
    pub fn unwatch(&mut self, watcher: &mut dyn FileWatcher, dir: &Path, mode: WatchModes) {
        let Some(entry) = self.entries.get_mut(dir) else {
            return;
        };
        *entry = entry.without(mode);
        if entry.is_empty() {
            self.entries.remove(dir);
            if let Err(err) = watcher.unwatch_dir(dir) {
                tracing::warn!(
                    target = "crux.project",
                    dir = %dir.display(),
                    error = %err,
                    "failed to unregister directory watch"
                );
            }
        }
    }

    /// Clears the masked bits across all entries, unregistering emptied
    /// paths.
    pub fn clear(&mut self, watcher: &mut dyn FileWatcher, mask: WatchModes) {
        let dirs: Vec<PathBuf> = self.entries.keys().cloned().collect();
        for dir in dirs {
            self.unwatch(watcher, &dir, mask);
        }
    }

    pub fn modes(&self, dir: &Path) -> WatchModes {
        self.entries.get(dir).copied().unwrap_or_default()
    }

    pub fn entries(&self) -> &HashMap<PathBuf, WatchModes> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_vfs::ManualFileWatcher;
    use pretty_assertions::assert_eq;

    #[test]
    fn bits_accumulate_and_clear() {
        let mut watcher = ManualFileWatcher::new();
        let mut table = WatchTable::default();
        let dir = Path::new("/src");

        table.watch(&mut watcher, dir, WatchModes::SOURCE_FILE);
        table.watch(&mut watcher, dir, WatchModes::DEPENDENCY);
        assert_eq!(
            table.modes(dir),
            WatchModes::SOURCE_FILE.with(WatchModes::DEPENDENCY)
        );
        // One OS registration per directory.
        assert_eq!(watcher.watch_calls().len(), 1);

        table.unwatch(&mut watcher, dir, WatchModes::SOURCE_FILE);
        assert_eq!(table.modes(dir), WatchModes::DEPENDENCY);
        assert!(watcher.unwatch_calls().is_empty());

        table.unwatch(&mut watcher, dir, WatchModes::DEPENDENCY);
        assert!(table.modes(dir).is_empty());
        assert!(!table.entries().contains_key(dir));
        assert_eq!(watcher.unwatch_calls().len(), 1);
    }

    #[test]
    fn clear_strips_masked_bits_everywhere() {
        let mut watcher = ManualFileWatcher::new();
        let mut table = WatchTable::default();

        table.watch(&mut watcher, Path::new("/a"), WatchModes::SOURCE_FILE);
        table.watch(&mut watcher, Path::new("/b"), WatchModes::DEPENDENCY);
        table.watch(
            &mut watcher,
            Path::new("/b"),
            WatchModes::COMPILATION_DATABASE,
        );

        table.clear(&mut watcher, WatchModes::DEPENDENCY);
        assert!(table.entries().contains_key(Path::new("/a")));
        assert_eq!(
            table.modes(Path::new("/b")),
            WatchModes::COMPILATION_DATABASE
        );

        table.clear(
            &mut watcher,
            WatchModes::SOURCE_FILE.with(WatchModes::COMPILATION_DATABASE),
        );
        assert!(table.entries().is_empty());
    }
}
