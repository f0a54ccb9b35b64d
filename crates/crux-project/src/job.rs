//! Indexer jobs and the shared job table.
//!
//! Indexer backends run jobs on their own workers. They interact with the
//! project through the [`JobTable`] (`visit_file` / `release_file_ids`,
//! guarded by one mutex) and deliver a terminal [`FinishedJob`] message over
//! the project's result channel; the main loop applies it via
//! `Project::on_job_finished`. Cancellation is cooperative through each
//! job's token.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel as channel;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crux_core::{FileId, SourceKey};
use crux_vfs::PathRegistry;

use crate::diagnostics::{Diagnostics, FixIt};
use crate::source::Source;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Why a job was submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobFlavor {
    /// First-time compile of a source.
    Compile,
    /// Re-index after a file mutation.
    Dirty,
    /// Explicit `reindex` request.
    Reindex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Aborted,
    Complete,
}

/// One in-flight unit of indexing work, keyed by its source key.
#[derive(Debug)]
pub struct IndexerJob {
    id: u64,
    pub source: Source,
    pub flavor: JobFlavor,
    state: Mutex<JobState>,
    token: CancellationToken,
}

impl IndexerJob {
    pub fn new(source: Source, flavor: JobFlavor) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            source,
            flavor,
            state: Mutex::new(JobState::Pending),
            token: CancellationToken::new(),
        })
    }

    /// Process-unique id; distinguishes superseded jobs sharing a source key.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn source_key(&self) -> SourceKey {
        self.source.key()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
        self.set_state(JobState::Aborted);
    }
}

/// Everything an indexer backend reports for one job.
///
/// The per-file symbol maps have already been written to disk by the
/// backend; this message carries the metadata the project merges.
#[derive(Debug, Default)]
pub struct IndexResult {
    pub source_key: SourceKey,
    pub visited: HashSet<FileId>,
    /// For each included file, its own includes.
    pub dependencies: HashMap<FileId, Vec<FileId>>,
    pub fix_its: BTreeMap<FileId, Vec<FixIt>>,
    pub diagnostics: Diagnostics,
    /// True when the job stopped early (cancellation or front-end failure);
    /// the project releases the job's visited ids and keeps prior state.
    pub aborted: bool,
}

/// Terminal message from a backend worker to the project's main loop.
#[derive(Debug)]
pub struct FinishedJob {
    pub job: Arc<IndexerJob>,
    pub result: IndexResult,
}

/// Shared state between the main loop and backend workers.
///
/// Everything lives behind one mutex: the visited-file table and the active
/// job table that `visit_file` consults to attribute claims.
#[derive(Debug, Default)]
pub struct JobTable {
    inner: Mutex<JobTableInner>,
}

#[derive(Debug, Default)]
struct JobTableInner {
    visited_files: HashMap<FileId, PathBuf>,
    active: HashMap<SourceKey, Arc<IndexerJob>>,
    visited_by_job: HashMap<u64, HashSet<FileId>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims first-visit rights on `file_id` for the active job keyed by
    /// `key`. Returns false when another job already visited the file.
    pub fn visit_file(&self, file_id: FileId, path: &Path, key: SourceKey) -> bool {
        debug_assert!(file_id.is_valid());
        let mut inner = self.inner.lock();
        if inner.visited_files.contains_key(&file_id) {
            return false;
        }
        inner.visited_files.insert(file_id, path.to_path_buf());
        if key.is_valid() {
            if let Some(job) = inner.active.get(&key) {
                let id = job.id();
                inner.visited_by_job.entry(id).or_default().insert(file_id);
            }
        }
        true
    }

    /// Returns each file id to the pool; called when a job aborts or its
    /// result is discarded.
    pub fn release_file_ids(&self, file_ids: &HashSet<FileId>) {
        if file_ids.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for file_id in file_ids {
            inner.visited_files.remove(file_id);
        }
    }

    /// Snapshot of the visited-file table.
    pub fn visited_files(&self) -> HashMap<FileId, PathBuf> {
        self.inner.lock().visited_files.clone()
    }

    pub fn is_visited(&self, file_id: FileId) -> bool {
        self.inner.lock().visited_files.contains_key(&file_id)
    }

    /// Restores a visited entry from persisted state.
    pub(crate) fn restore_visited(&self, file_id: FileId, path: PathBuf) {
        self.inner.lock().visited_files.insert(file_id, path);
    }

    pub(crate) fn insert_active(
        &self,
        key: SourceKey,
        job: Arc<IndexerJob>,
    ) -> Option<Arc<IndexerJob>> {
        self.inner.lock().active.insert(key, job)
    }

    pub(crate) fn active_job(&self, key: SourceKey) -> Option<Arc<IndexerJob>> {
        self.inner.lock().active.get(&key).cloned()
    }

    /// Removes the active entry for `key` if it is still `job_id`'s slot.
    pub(crate) fn remove_active(&self, key: SourceKey, job_id: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.active.get(&key).is_some_and(|job| job.id() == job_id) {
            inner.active.remove(&key);
            true
        } else {
            false
        }
    }

    pub(crate) fn take_visited(&self, job_id: u64) -> HashSet<FileId> {
        self.inner
            .lock()
            .visited_by_job
            .remove(&job_id)
            .unwrap_or_default()
    }

    pub fn is_active(&self, key: SourceKey) -> bool {
        !key.is_valid() || self.inner.lock().active.contains_key(&key)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub(crate) fn active_jobs(&self) -> Vec<Arc<IndexerJob>> {
        self.inner.lock().active.values().cloned().collect()
    }
}

/// What a backend worker needs to run one job.
#[derive(Clone)]
pub struct BackendContext {
    pub table: Arc<JobTable>,
    pub registry: Arc<PathRegistry>,
    pub results: channel::Sender<FinishedJob>,
    /// Root under which per-file symbol maps are written
    /// (`<data_dir>/<file_id>/<map-name>`).
    pub data_dir: PathBuf,
}

/// The indexer front-end collaborator.
///
/// `run` must not block the caller: implementations hand the job to their
/// own workers, claim visited files through `ctx.table`, write the per-file
/// symbol maps under `ctx.data_dir`, and finally send a [`FinishedJob`] on
/// `ctx.results`. A cancelled job must still send a result with
/// `aborted = true` (or release its visited ids itself).
pub trait IndexerBackend: Send + Sync {
    fn run(&self, job: Arc<IndexerJob>, ctx: BackendContext);
}

/// Deterministic backend for tests and embedders that drive indexing
/// manually: `run` only records the job, and the caller completes it by
/// sending a [`FinishedJob`] through the recorded context.
#[derive(Default)]
pub struct ManualIndexerBackend {
    queued: Mutex<Vec<(Arc<IndexerJob>, BackendContext)>>,
}

impl ManualIndexerBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes all jobs recorded since the last call, in submission order.
    pub fn take_jobs(&self) -> Vec<(Arc<IndexerJob>, BackendContext)> {
        std::mem::take(&mut *self.queued.lock())
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().len()
    }
}

impl IndexerBackend for ManualIndexerBackend {
    fn run(&self, job: Arc<IndexerJob>, ctx: BackendContext) {
        job.set_state(JobState::Running);
        self.queued.lock().push((job, ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(raw: u32) -> FileId {
        FileId::from_raw(raw)
    }

    #[test]
    fn visit_file_claims_once_until_released() {
        let table = JobTable::new();
        let key = SourceKey::from_raw(0x11);

        assert!(table.visit_file(file(100), Path::new("/src/h.h"), key));
        assert!(!table.visit_file(file(100), Path::new("/src/h.h"), key));

        let ids: HashSet<FileId> = [file(100)].into_iter().collect();
        table.release_file_ids(&ids);
        assert!(table.visit_file(file(100), Path::new("/src/h.h"), key));
    }

    #[test]
    fn visits_are_attributed_to_the_active_job() {
        let table = JobTable::new();
        let job = IndexerJob::new(
            Source::new("/src/a.c", vec![], "clang"),
            JobFlavor::Compile,
        );
        let key = job.source_key();
        table.insert_active(key, job.clone());

        table.visit_file(file(1), Path::new("/src/a.c"), key);
        table.visit_file(file(2), Path::new("/src/h.h"), key);

        let visited = table.take_visited(job.id());
        assert_eq!(visited.len(), 2);
        assert!(visited.contains(&file(1)));
    }

    #[test]
    fn remove_active_checks_job_identity() {
        let table = JobTable::new();
        let source = Source::new("/src/a.c", vec![], "clang");
        let old = IndexerJob::new(source.clone(), JobFlavor::Compile);
        let new = IndexerJob::new(source, JobFlavor::Dirty);
        let key = old.source_key();

        table.insert_active(key, old.clone());
        table.insert_active(key, new.clone());

        assert!(!table.remove_active(key, old.id()));
        assert!(table.is_active(key));
        assert!(table.remove_active(key, new.id()));
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn cancelled_job_reports_aborted_state() {
        let job = IndexerJob::new(Source::new("/src/a.c", vec![], "clang"), JobFlavor::Dirty);
        assert_eq!(job.state(), JobState::Pending);
        assert!(!job.is_cancelled());

        job.cancel();
        assert!(job.is_cancelled());
        assert_eq!(job.state(), JobState::Aborted);
    }
}
