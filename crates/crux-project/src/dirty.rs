//! The debounced set of files awaiting re-index.
//!
//! The project owns no timer thread; [`DirtySet`] tracks a deadline and the
//! embedding drive loop fires `Project::on_dirty_timeout` when it elapses.
//! Tests fire the timeout explicitly.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crux_core::FileId;

#[derive(Debug)]
pub struct DirtySet {
    pending: BTreeSet<FileId>,
    deadline: Option<Instant>,
    debounce: Duration,
}

impl DirtySet {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: BTreeSet::new(),
            deadline: None,
            debounce,
        }
    }

    /// Inserts `file` and (re-)arms the debounce deadline.
    pub fn insert(&mut self, file: FileId) {
        self.pending.insert(file);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    pub fn extend(&mut self, files: impl IntoIterator<Item = FileId>) {
        let mut inserted = false;
        for file in files {
            self.pending.insert(file);
            inserted = true;
        }
        if inserted {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    pub fn remove(&mut self, file: FileId) {
        self.pending.remove(&file);
        if self.pending.is_empty() {
            self.deadline = None;
        }
    }

    pub fn pending(&self) -> &BTreeSet<FileId> {
        &self.pending
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Re-arms the deadline for the already-pending entries (used after a
    /// merge completes so a dirty signal raised mid-job is not dropped).
    pub fn rearm(&mut self) {
        if !self.pending.is_empty() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Takes the pending set and disarms the deadline.
    pub fn take_pending(&mut self) -> BTreeSet<FileId> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    /// Takes the pending set if the deadline has passed `now`.
    pub fn fire_due(&mut self, now: Instant) -> Option<BTreeSet<FileId>> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.take_pending()),
            _ => None,
        }
    }
}
