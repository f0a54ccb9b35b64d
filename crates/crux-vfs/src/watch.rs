//! File watching.
//!
//! `crux-vfs` owns all operating-system integration for file watching.
//! Higher layers depend only on the [`FileWatcher`] trait and the stable
//! [`WatchEvent`] / [`FileChange`] model.
//!
//! OS watchers are push-based internally; changes are exposed as an event
//! stream (`crossbeam_channel`) returned by [`FileWatcher::receiver`], so
//! consumers can integrate watching into their own event loops without a
//! particular async runtime. Watchers can surface errors asynchronously;
//! these are delivered on the same stream (see [`WatchMessage`]).
//!
//! Backends are allowed to be lossy and the OS can coalesce/reorder events.
//! If a backend drops events due to overflow/backpressure it emits
//! [`WatchEvent::Rescan`] so consumers can fall back to a full rescan.
//!
//! Tests should not rely on real OS watcher timing; use the deterministic
//! [`ManualFileWatcher`] and inject events directly.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

use crate::change::WatchEvent;

/// Message type delivered by a [`FileWatcher`].
pub type WatchMessage = io::Result<WatchEvent>;

/// Event-driven watcher abstraction.
///
/// Consumers register directories with [`watch_dir`](FileWatcher::watch_dir)
/// and consume events from [`receiver`](FileWatcher::receiver). Events are
/// hints; the filesystem remains authoritative.
pub trait FileWatcher: Send {
    /// Begin watching `dir` (non-recursive). Idempotent per directory.
    fn watch_dir(&mut self, dir: &Path) -> io::Result<()>;

    /// Stop watching `dir`.
    fn unwatch_dir(&mut self, dir: &Path) -> io::Result<()>;

    /// Returns the receiver used to consume watcher events.
    fn receiver(&self) -> &channel::Receiver<WatchMessage>;

    /// Retrieves all currently pending events, if any.
    ///
    /// Convenience wrapper over [`FileWatcher::receiver`] that drains any
    /// available messages without blocking.
    fn poll(&mut self) -> io::Result<Vec<WatchEvent>> {
        let mut out = Vec::new();
        for msg in self.receiver().try_iter() {
            match msg {
                Ok(event) => out.push(event),
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn watch_dir(&mut self, dir: &Path) -> io::Result<()> {
        self.as_mut().watch_dir(dir)
    }

    fn unwatch_dir(&mut self, dir: &Path) -> io::Result<()> {
        self.as_mut().unwatch_dir(dir)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        self.as_ref().receiver()
    }
}

const MANUAL_WATCH_QUEUE_CAPACITY: usize = 1024;

/// Deterministic watcher implementation for tests.
///
/// This watcher does not interact with the OS. Callers inject events
/// manually via [`ManualFileWatcher::push`] or a [`ManualFileWatcherHandle`].
///
/// Event delivery uses a bounded in-memory queue; injection is non-blocking
/// and returns `io::ErrorKind::WouldBlock` if the queue is full.
#[derive(Debug)]
pub struct ManualFileWatcher {
    tx: channel::Sender<WatchMessage>,
    rx: channel::Receiver<WatchMessage>,
    watch_calls: Vec<PathBuf>,
    unwatch_calls: Vec<PathBuf>,
    watched: HashMap<PathBuf, ()>,
}

/// Cloneable handle for injecting events into a [`ManualFileWatcher`] after
/// it has been moved into the project.
#[derive(Debug, Clone)]
pub struct ManualFileWatcherHandle {
    tx: channel::Sender<WatchMessage>,
}

impl ManualFileWatcherHandle {
    /// Inject a synthetic watcher event.
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        match self.tx.try_send(Ok(event)) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "watch queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "watch receiver dropped",
            )),
        }
    }

    /// Inject an asynchronous watcher error.
    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        match self.tx.try_send(Err(error)) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "watch queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "watch receiver dropped",
            )),
        }
    }
}

impl Default for ManualFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(MANUAL_WATCH_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            watch_calls: Vec::new(),
            unwatch_calls: Vec::new(),
            watched: HashMap::new(),
        }
    }

    /// Returns a cloneable handle that can inject events after the watcher
    /// has been moved into the project.
    pub fn handle(&self) -> ManualFileWatcherHandle {
        ManualFileWatcherHandle {
            tx: self.tx.clone(),
        }
    }

    /// Inject a synthetic watcher event.
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.handle().push(event)
    }

    /// Directories passed to [`FileWatcher::watch_dir`] (in call order).
    pub fn watch_calls(&self) -> &[PathBuf] {
        &self.watch_calls
    }

    /// Directories passed to [`FileWatcher::unwatch_dir`] (in call order).
    pub fn unwatch_calls(&self) -> &[PathBuf] {
        &self.unwatch_calls
    }

    /// Returns the set of currently watched directories (sorted for
    /// determinism).
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.watched.keys().cloned().collect();
        dirs.sort();
        dirs
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch_dir(&mut self, dir: &Path) -> io::Result<()> {
        let dir = dir.to_path_buf();
        self.watch_calls.push(dir.clone());
        self.watched.insert(dir, ());
        Ok(())
    }

    fn unwatch_dir(&mut self, dir: &Path) -> io::Result<()> {
        let dir = dir.to_path_buf();
        self.unwatch_calls.push(dir.clone());
        self.watched.remove(&dir);
        Ok(())
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        &self.rx
    }
}

#[cfg(feature = "watch-notify")]
mod notify_impl {
    use super::*;

    use crate::change::FileChange;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use notify::{EventKind, RecursiveMode, Watcher};

    const RAW_QUEUE_CAPACITY: usize = 4096;
    const EVENTS_QUEUE_CAPACITY: usize = 1024;
    const OVERFLOW_RETRY_INTERVAL: Duration = Duration::from_millis(50);

    fn notify_error_to_io(err: notify::Error) -> io::Error {
        io::Error::other(err)
    }

    fn notify_event_requests_rescan(event: &notify::Event) -> bool {
        // `notify` signals dropped events / overflows by marking the event
        // with `Flag::Rescan`. Some backends also emit a path-less
        // `EventKind::Other`.
        matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
            || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
    }

    fn normalize(event: notify::Event) -> Vec<FileChange> {
        match event.kind {
            EventKind::Create(_) => event
                .paths
                .into_iter()
                .map(|path| FileChange::Created { path })
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .into_iter()
                .map(|path| FileChange::Deleted { path })
                .collect(),
            // Renames arrive as remove/create pairs on the backends we care
            // about; everything else is treated as a modification.
            _ => event
                .paths
                .into_iter()
                .map(|path| FileChange::Modified { path })
                .collect(),
        }
    }

    fn try_send_or_overflow<T>(tx: &channel::Sender<T>, overflowed: &AtomicBool, msg: T) {
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(channel::TrySendError::Full(_)) => {
                overflowed.store(true, Ordering::Release);
            }
            Err(channel::TrySendError::Disconnected(_)) => {
                // The watcher is shutting down; dropping the message is fine.
            }
        }
    }

    fn run_drain_loop(
        raw_rx: channel::Receiver<notify::Result<notify::Event>>,
        events_tx: channel::Sender<WatchMessage>,
        stop_rx: channel::Receiver<()>,
        overflowed: Arc<AtomicBool>,
    ) {
        loop {
            // If either queue overflowed, the only safe recovery strategy is a
            // full rescan.
            if overflowed.load(Ordering::Acquire) {
                while raw_rx.try_recv().is_ok() {}
                match events_tx.try_send(Ok(WatchEvent::Rescan)) {
                    Ok(()) => overflowed.store(false, Ordering::Release),
                    Err(channel::TrySendError::Full(_)) => {}
                    Err(channel::TrySendError::Disconnected(_)) => break,
                }
            }

            let tick = if overflowed.load(Ordering::Acquire) {
                channel::after(OVERFLOW_RETRY_INTERVAL)
            } else {
                channel::after(Duration::from_secs(3600))
            };

            channel::select! {
                recv(stop_rx) -> _ => break,
                recv(raw_rx) -> msg => {
                    let Ok(res) = msg else { break };
                    match res {
                        Ok(event) => {
                            if notify_event_requests_rescan(&event) {
                                overflowed.store(true, Ordering::Release);
                                continue;
                            }
                            let changes = normalize(event);
                            if !changes.is_empty() {
                                if let Err(err) = events_tx.try_send(Ok(WatchEvent::Changes { changes })) {
                                    if matches!(err, channel::TrySendError::Full(_)) {
                                        overflowed.store(true, Ordering::Release);
                                    } else {
                                        break;
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            // Many notify backends use errors to signal lost
                            // events, so also request a rescan.
                            overflowed.store(true, Ordering::Release);
                            if events_tx.try_send(Err(notify_error_to_io(err))).is_err() {
                                continue;
                            }
                        }
                    }
                }
                recv(tick) -> _ => {}
            }
        }
    }

    /// OS file watcher backed by `notify`, with bounded internal queues to
    /// avoid unbounded memory growth under event storms.
    pub struct NotifyFileWatcher {
        watcher: notify::RecommendedWatcher,
        events_rx: channel::Receiver<WatchMessage>,
        stop_tx: channel::Sender<()>,
        thread: Option<std::thread::JoinHandle<()>>,
        watched: HashMap<PathBuf, ()>,
    }

    impl NotifyFileWatcher {
        pub fn new() -> io::Result<Self> {
            let (raw_tx, raw_rx) =
                channel::bounded::<notify::Result<notify::Event>>(RAW_QUEUE_CAPACITY);
            let (events_tx, events_rx) = channel::bounded::<WatchMessage>(EVENTS_QUEUE_CAPACITY);
            let (stop_tx, stop_rx) = channel::bounded::<()>(0);

            let overflowed = Arc::new(AtomicBool::new(false));

            let raw_tx_cb = raw_tx.clone();
            let overflowed_cb = Arc::clone(&overflowed);
            let watcher = notify::recommended_watcher(move |res| {
                try_send_or_overflow(&raw_tx_cb, overflowed_cb.as_ref(), res);
            })
            .map_err(notify_error_to_io)?;

            let thread_overflowed = Arc::clone(&overflowed);
            let thread = std::thread::spawn(move || {
                run_drain_loop(raw_rx, events_tx, stop_rx, thread_overflowed)
            });

            Ok(Self {
                watcher,
                events_rx,
                stop_tx,
                thread: Some(thread),
                watched: HashMap::new(),
            })
        }
    }

    impl Drop for NotifyFileWatcher {
        fn drop(&mut self) {
            let _ = self.stop_tx.send(());
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    tracing::debug!(
                        target = "crux.vfs",
                        "file watcher drain thread panicked (best effort join)"
                    );
                }
            }
        }
    }

    impl FileWatcher for NotifyFileWatcher {
        fn watch_dir(&mut self, dir: &Path) -> io::Result<()> {
            if self.watched.contains_key(dir) {
                return Ok(());
            }
            self.watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(notify_error_to_io)?;
            self.watched.insert(dir.to_path_buf(), ());
            Ok(())
        }

        fn unwatch_dir(&mut self, dir: &Path) -> io::Result<()> {
            if self.watched.remove(dir).is_none() {
                return Ok(());
            }
            self.watcher.unwatch(dir).map_err(notify_error_to_io)
        }

        fn receiver(&self) -> &channel::Receiver<WatchMessage> {
            &self.events_rx
        }
    }
}

#[cfg(feature = "watch-notify")]
pub use notify_impl::NotifyFileWatcher;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::FileChange;
    use pretty_assertions::assert_eq;

    #[test]
    fn manual_watcher_records_watch_calls() {
        let mut watcher = ManualFileWatcher::new();
        watcher.watch_dir(Path::new("/src")).unwrap();
        watcher.watch_dir(Path::new("/include")).unwrap();
        watcher.unwatch_dir(Path::new("/src")).unwrap();

        assert_eq!(watcher.watched_dirs(), vec![PathBuf::from("/include")]);
        assert_eq!(watcher.watch_calls().len(), 2);
        assert_eq!(watcher.unwatch_calls(), &[PathBuf::from("/src")]);
    }

    #[test]
    fn manual_watcher_delivers_injected_events() {
        let mut watcher = ManualFileWatcher::new();
        let handle = watcher.handle();

        handle
            .push(WatchEvent::Changes {
                changes: vec![FileChange::Modified {
                    path: "/src/a.c".into(),
                }],
            })
            .unwrap();
        handle.push(WatchEvent::Rescan).unwrap();

        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], WatchEvent::Rescan);
    }

    #[test]
    fn watcher_errors_are_surfaced_through_poll() {
        let mut watcher = ManualFileWatcher::new();
        watcher
            .push(WatchEvent::Changes { changes: vec![] })
            .unwrap();
        watcher
            .handle()
            .push_error(io::Error::other("backend lost"))
            .unwrap();

        assert!(watcher.poll().is_err());
    }
}
