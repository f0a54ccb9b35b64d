//! Filesystem integration for crux.
//!
//! This crate owns:
//! - Stable `FileId` allocation and reverse mapping (`PathRegistry`).
//! - The normalized file-change event model.
//! - The pluggable [`FileWatcher`] interface, a deterministic
//!   [`ManualFileWatcher`] for tests, and a `notify`-backed OS watcher
//!   behind the `watch-notify` feature.

mod change;
mod path_interner;
mod watch;

pub use change::{FileChange, FileChangeKind, WatchEvent};
pub use crux_core::FileId;
pub use path_interner::PathRegistry;
pub use watch::{FileWatcher, ManualFileWatcher, ManualFileWatcherHandle, WatchMessage};

#[cfg(feature = "watch-notify")]
pub use watch::NotifyFileWatcher;
