//! The project facade: lifecycle, job merging, dirty propagation, watching
//! and the query surface.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use crossbeam_channel as channel;
use serde::Serialize;
use thiserror::Error;

use crux_core::{
    match_symbol_name, CaseSensitivity, FileId, Location, LocationListTable, MatchKind, SourceKey,
    Symbol, SymbolKind, SymbolTable,
};
use crux_storage::{ArtifactKind, PersistedArchive, StorageError};
use crux_vfs::{FileChangeKind, FileWatcher, PathRegistry, WatchEvent};

use crate::config::ProjectConfig;
use crate::dependency::{DependencyGraph, DependencyMode};
use crate::diagnostics::{
    format_fix_its, merge_diagnostics, merge_fix_its, Diagnostic, Diagnostics, FixIt,
};
use crate::dirty::DirtySet;
use crate::file_maps::{
    artifact_kind, file_map_path, FileMapKind, QueryScope, FILE_MAP_SCHEMA_VERSION,
};
use crate::job::{
    BackendContext, FinishedJob, IndexResult, IndexerBackend, IndexerJob, JobFlavor, JobState,
    JobTable,
};
use crate::persist::{
    load_state, save_state, DependencyRecord, PathRecord, ProjectState, SourcesState, StampRecord,
    PROJECT_STATE_FILENAME, PROJECT_STATE_SCHEMA_VERSION, SOURCES_STATE_FILENAME,
    SOURCES_STATE_SCHEMA_VERSION,
};
use crate::source::{parse_compile_commands, CompilationDatabaseInfo, Source, Sources};
use crate::watch_table::{WatchModes, WatchTable};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no compilation database configured")]
    NoCompilationDatabase,
}

/// Query behavior modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const NONE: Self = Self(0);
    pub const REVERSE_SORT: Self = Self(1 << 0);
    pub const STRIP_PATH: Self = Self(1 << 1);
    pub const CASE_INSENSITIVE: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortedSymbol {
    pub location: Location,
    pub kind: SymbolKind,
    pub is_definition: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateMode {
    /// Compare the on-disk mtime against the persisted stamp.
    StatOnly,
    /// Additionally open all four file maps.
    Validate,
}

/// Picks the preferred target out of a candidate set: same-usr definitions
/// beat declarations beat everything else; ties break on location.
pub fn best_target(targets: &BTreeSet<Symbol>) -> Option<Symbol> {
    targets
        .iter()
        .min_by_key(|symbol| {
            let rank = if symbol.is_definition() {
                0
            } else if symbol.is_declaration() {
                1
            } else {
                2
            };
            (rank, symbol.location)
        })
        .cloned()
}

struct ReindexWaiter {
    remaining: HashSet<u64>,
    started: usize,
    tx: channel::Sender<usize>,
}

pub struct Project {
    root: PathBuf,
    data_dir: PathBuf,
    config: ProjectConfig,
    registry: Arc<PathRegistry>,
    backend: Arc<dyn IndexerBackend>,
    watcher: Box<dyn FileWatcher>,

    job_tx: channel::Sender<FinishedJob>,
    job_rx: channel::Receiver<FinishedJob>,

    sources: Sources,
    comp_db: Option<CompilationDatabaseInfo>,
    dependencies: DependencyGraph,
    table: Arc<JobTable>,
    dirty_set: DirtySet,
    watch_table: WatchTable,
    suspended: BTreeSet<FileId>,
    fix_its: BTreeMap<FileId, Vec<FixIt>>,
    diagnostics: Diagnostics,
    stamps: HashMap<FileId, u64>,

    scope: Option<QueryScope>,
    scope_refs: usize,

    waiters: Vec<ReindexWaiter>,
    job_counter: usize,
    jobs_started: usize,
    first_job_at: Option<Instant>,
}

impl Project {
    pub fn new(
        root: impl Into<PathBuf>,
        config: ProjectConfig,
        registry: Arc<PathRegistry>,
        backend: Arc<dyn IndexerBackend>,
        watcher: Box<dyn FileWatcher>,
    ) -> Self {
        let root = root.into();
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| root.join(".crux"));
        let (job_tx, job_rx) = channel::unbounded();
        let dirty_set = DirtySet::new(config.dirty_debounce());

        Self {
            root,
            data_dir,
            config,
            registry,
            backend,
            watcher,
            job_tx,
            job_rx,
            sources: Sources::new(),
            comp_db: None,
            dependencies: DependencyGraph::new(),
            table: Arc::new(JobTable::new()),
            dirty_set,
            watch_table: WatchTable::default(),
            suspended: BTreeSet::new(),
            fix_its: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
            stamps: HashMap::new(),
            scope: None,
            scope_refs: 0,
            waiters: Vec::new(),
            job_counter: 0,
            jobs_started: 0,
            first_job_at: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PathRegistry> {
        &self.registry
    }

    /// Loads persisted state, primes watchers and schedules dirty jobs for
    /// files whose on-disk stamp no longer matches. Corrupt or mismatched
    /// state degrades to an empty project plus a full re-index; only an
    /// unusable data directory fails project start.
    pub fn init(&mut self) -> Result<(), ProjectError> {
        fs::create_dir_all(&self.data_dir)?;

        let mut cold_start = false;
        match load_state::<SourcesState>(
            &self.data_dir,
            SOURCES_STATE_FILENAME,
            ArtifactKind::SourcesState,
            SOURCES_STATE_SCHEMA_VERSION,
        ) {
            Some(state) if state.keys_consistent() => {
                let (sources, comp_db) = state.into_parts(&self.registry);
                self.sources = sources;
                self.comp_db = comp_db;
            }
            Some(_) => {
                tracing::warn!(
                    target = "crux.project",
                    root = %self.root.display(),
                    "persisted source keys are stale; discarding sources state"
                );
                cold_start = true;
            }
            None => cold_start = true,
        }

        match load_state::<ProjectState>(
            &self.data_dir,
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
        ) {
            Some(state) if !cold_start => {
                for record in &state.paths {
                    self.registry
                        .restore_file(&record.path, FileId::from_raw(record.file_id));
                }
                for record in &state.dependencies {
                    let includer = FileId::from_raw(record.file_id);
                    self.dependencies.insert_or_get(includer);
                    for include in &record.includes {
                        self.dependencies.link(includer, FileId::from_raw(*include));
                    }
                }
                for record in &state.visited {
                    self.table.restore_visited(
                        FileId::from_raw(record.file_id),
                        PathBuf::from(&record.path),
                    );
                }
                for record in &state.stamps {
                    self.stamps
                        .insert(FileId::from_raw(record.file_id), record.last_modified_millis);
                }
                self.dirty_set
                    .extend(state.dirty.iter().map(|&raw| FileId::from_raw(raw)));
            }
            _ => {
                // Full re-index of everything we know how to compile.
                let files: Vec<FileId> = self.sources.keys().copied().collect();
                self.dirty_set.extend(files);
            }
        }

        // Stale sources: anything whose stamp no longer matches the disk.
        let known: BTreeSet<FileId> = self
            .sources
            .keys()
            .copied()
            .chain(self.stamps.keys().copied())
            .collect();
        for file in known {
            if !self.validate(file, ValidateMode::StatOnly) {
                self.dirty_set.insert(file);
            }
        }

        // Prime watchers.
        let source_files: Vec<FileId> = self.sources.keys().copied().collect();
        for file in source_files {
            self.watch_file(file);
        }
        let dependency_files: Vec<FileId> = self.dependencies.files().collect();
        for file in dependency_files {
            self.watch_file(file);
        }
        if let Some(info) = self.comp_db.clone() {
            self.watch_table.watch(
                &mut *self.watcher,
                &info.dir,
                WatchModes::COMPILATION_DATABASE,
            );
        }

        tracing::info!(
            target = "crux.project",
            root = %self.root.display(),
            sources = self.sources.len(),
            nodes = self.dependencies.len(),
            dirty = self.dirty_set.pending().len(),
            "project initialized"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Writes `sources.bin` and `project.bin` atomically. Skipped while jobs
    /// are active: result merging must complete first, otherwise persisted
    /// dependencies diverge from the on-disk symbol maps.
    pub fn save(&mut self) -> Result<(), ProjectError> {
        self.save_now(false)
    }

    fn save_now(&mut self, force: bool) -> Result<(), ProjectError> {
        if !force && self.is_indexing() {
            tracing::debug!(
                target = "crux.project",
                active = self.table.active_count(),
                "save deferred while jobs are active"
            );
            return Ok(());
        }

        let sources_state = SourcesState::from_parts(&self.sources, self.comp_db.as_ref());
        save_state(
            &self.data_dir,
            SOURCES_STATE_FILENAME,
            ArtifactKind::SourcesState,
            SOURCES_STATE_SCHEMA_VERSION,
            &sources_state,
        )?;

        // Snapshot the visited table under its lock.
        let visited = self.table.visited_files();

        let mut referenced: BTreeSet<FileId> = self.sources.keys().copied().collect();
        referenced.extend(self.dependencies.files());
        referenced.extend(visited.keys().copied());
        referenced.extend(self.stamps.keys().copied());

        let mut paths = Vec::new();
        for file in &referenced {
            if let Some(path) = self.registry.path(*file) {
                paths.push(PathRecord {
                    file_id: file.to_raw(),
                    path: path.to_string_lossy().into_owned(),
                });
            }
        }

        let mut dependencies: Vec<DependencyRecord> = self
            .dependencies
            .iter()
            .map(|(file, node)| DependencyRecord {
                file_id: file.to_raw(),
                includes: node.includes.iter().map(|id| id.to_raw()).collect(),
            })
            .collect();
        dependencies.sort_by_key(|record| record.file_id);

        let mut visited_records: Vec<PathRecord> = visited
            .iter()
            .map(|(file, path)| PathRecord {
                file_id: file.to_raw(),
                path: path.to_string_lossy().into_owned(),
            })
            .collect();
        visited_records.sort_by_key(|record| record.file_id);

        let mut stamps: Vec<StampRecord> = self
            .stamps
            .iter()
            .map(|(file, &last_modified_millis)| StampRecord {
                file_id: file.to_raw(),
                last_modified_millis,
            })
            .collect();
        stamps.sort_by_key(|record| record.file_id);

        let project_state = ProjectState {
            paths,
            dependencies,
            visited: visited_records,
            dirty: self.dirty_set.pending().iter().map(|id| id.to_raw()).collect(),
            stamps,
        };
        save_state(
            &self.data_dir,
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
            &project_state,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Submits `source` for indexing. An active job with the same source key
    /// is superseded: cancelled now, its eventual result discarded.
    pub fn index(&mut self, source: Source, flavor: JobFlavor) -> Arc<IndexerJob> {
        let key = source.key();
        let file_id = self.registry.insert_file(&source.path);

        let entry = self.sources.entry(file_id).or_default();
        if !entry.iter().any(|existing| existing.key() == key) {
            entry.push(source.clone());
        }

        let job = IndexerJob::new(source, flavor);
        if let Some(old) = self.table.insert_active(key, job.clone()) {
            tracing::debug!(
                target = "crux.project",
                source_key = ?key,
                superseded = old.id(),
                by = job.id(),
                "superseding active job"
            );
            old.cancel();
        }

        self.watch_file(file_id);
        self.job_counter += 1;
        self.jobs_started += 1;
        if self.first_job_at.is_none() {
            self.first_job_at = Some(Instant::now());
        }

        job.set_state(JobState::Running);
        self.backend.run(job.clone(), self.backend_context());
        job
    }

    fn backend_context(&self) -> BackendContext {
        BackendContext {
            table: self.table.clone(),
            registry: self.registry.clone(),
            results: self.job_tx.clone(),
            data_dir: self.data_dir.clone(),
        }
    }

    /// Worker-side claim of first-visit rights; see [`JobTable::visit_file`].
    pub fn visit_file(&self, file_id: FileId, path: &Path, key: SourceKey) -> bool {
        self.table.visit_file(file_id, path, key)
    }

    pub fn release_file_ids(&self, file_ids: &HashSet<FileId>) {
        self.table.release_file_ids(file_ids)
    }

    pub fn visited_files(&self) -> HashMap<FileId, PathBuf> {
        self.table.visited_files()
    }

    /// Applies one job's result. Runs on the main loop.
    pub fn on_job_finished(&mut self, job: Arc<IndexerJob>, result: IndexResult) {
        let key = job.source_key();
        let current = self.table.active_job(key);
        let superseded = current.map(|active| active.id()) != Some(job.id());

        if superseded || result.aborted {
            let mut release = self.table.take_visited(job.id());
            release.extend(result.visited.iter().copied());
            self.table.release_file_ids(&release);
            if !superseded {
                self.table.remove_active(key, job.id());
            }
            tracing::debug!(
                target = "crux.project",
                job = job.id(),
                source_key = ?key,
                superseded,
                aborted = result.aborted,
                released = release.len(),
                "discarding job result"
            );
            self.finish_job_bookkeeping(job.id());
            return;
        }

        job.set_state(JobState::Complete);

        // Merge the reported include graph; every visited file gets a node.
        for (includer, includes) in &result.dependencies {
            self.dependencies
                .set_includes(*includer, includes.iter().copied());
        }
        for file in &result.visited {
            self.dependencies.insert_or_get(*file);
        }

        // Stamp and watch everything the job touched.
        for file in &result.visited {
            if let Some(path) = self.registry.path(*file) {
                if let Some(mtime) = mtime_millis(&path) {
                    self.stamps.insert(*file, mtime);
                }
            }
            self.watch_file(*file);
        }

        merge_fix_its(&mut self.fix_its, result.fix_its, &result.visited);
        let changed = merge_diagnostics(&mut self.diagnostics, result.diagnostics, &result.visited);
        if !changed.is_empty() {
            tracing::debug!(
                target = "crux.project",
                job = job.id(),
                files = changed.len(),
                "diagnostics updated"
            );
        }

        self.table.remove_active(key, job.id());
        self.take_visited_tracking(job.id());
        self.finish_job_bookkeeping(job.id());
    }

    fn take_visited_tracking(&self, job_id: u64) {
        // The per-job attribution set has served its purpose once the job
        // completed; visited files themselves stay claimed.
        let _ = self.table.take_visited(job_id);
    }

    fn finish_job_bookkeeping(&mut self, job_id: u64) {
        for waiter in &mut self.waiters {
            waiter.remaining.remove(&job_id);
        }
        self.waiters.retain(|waiter| {
            if waiter.remaining.is_empty() {
                let _ = waiter.tx.send(waiter.started);
                false
            } else {
                true
            }
        });

        // A dirty signal raised while this job ran must not be dropped:
        // re-arm the debounce for whatever is still pending.
        self.dirty_set.rearm();

        if self.table.active_count() == 0 {
            let elapsed = self
                .first_job_at
                .take()
                .map(|start| start.elapsed())
                .unwrap_or_default();
            tracing::info!(
                target = "crux.project",
                jobs = self.job_counter,
                elapsed_ms = elapsed.as_millis() as u64,
                "all jobs finished"
            );
            self.job_counter = 0;
            if !self.dirty_set.is_armed() && self.config.save_on_idle {
                if let Err(err) = self.save() {
                    tracing::warn!(
                        target = "crux.project",
                        error = %err,
                        "failed to save project state"
                    );
                }
            }
        }
    }

    /// Applies every queued backend result.
    pub fn drain_job_events(&mut self) -> usize {
        let rx = self.job_rx.clone();
        let mut applied = 0;
        while let Ok(FinishedJob { job, result }) = rx.try_recv() {
            self.on_job_finished(job, result);
            applied += 1;
        }
        applied
    }

    pub fn is_active_job(&self, key: SourceKey) -> bool {
        self.table.is_active(key)
    }

    pub fn is_indexing(&self) -> bool {
        self.table.active_count() > 0
    }

    pub fn jobs_started(&self) -> usize {
        self.jobs_started
    }

    // ------------------------------------------------------------------
    // Dirty propagation
    // ------------------------------------------------------------------

    /// Marks `file_id` as mutated and arms the debounce timer.
    pub fn dirty(&mut self, file_id: FileId) {
        self.dirty_set.insert(file_id);
    }

    /// The deadline the drive loop should wake at, if any.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.dirty_set.deadline()
    }

    pub fn pending_dirty(&self) -> &BTreeSet<FileId> {
        self.dirty_set.pending()
    }

    /// Fires the debounce timer regardless of its deadline. Returns the
    /// number of jobs started.
    pub fn on_dirty_timeout(&mut self) -> usize {
        let pending = self.dirty_set.take_pending();
        if pending.is_empty() {
            return 0;
        }
        let expanded = self.expand_dirty(&pending);
        self.start_dirty_jobs(&expanded, JobFlavor::Dirty, None)
    }

    /// Fires the debounce timer if its deadline has passed `now`.
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        match self.dirty_set.fire_due(now) {
            Some(pending) if !pending.is_empty() => {
                let expanded = self.expand_dirty(&pending);
                self.start_dirty_jobs(&expanded, JobFlavor::Dirty, None)
            }
            _ => 0,
        }
    }

    /// `∪ dependencies(f, DependsOnArg) ∪ {f}` over the pending set.
    fn expand_dirty(&self, pending: &BTreeSet<FileId>) -> BTreeSet<FileId> {
        let mut expanded = BTreeSet::new();
        for &file in pending {
            expanded.extend(
                self.dependencies
                    .dependencies(file, DependencyMode::DependsOnArg),
            );
            expanded.insert(file);
        }
        expanded
    }

    fn start_dirty_jobs(
        &mut self,
        files: &BTreeSet<FileId>,
        flavor: JobFlavor,
        wait: Option<channel::Sender<usize>>,
    ) -> usize {
        let mut job_ids = HashSet::new();
        let mut started = 0;
        for &file in files {
            if self.suspended.contains(&file) {
                continue;
            }
            let Some(list) = self.sources.get(&file).cloned() else {
                continue;
            };
            for source in list {
                let job = self.index(source, flavor);
                job_ids.insert(job.id());
                started += 1;
            }
        }

        if let Some(tx) = wait {
            if job_ids.is_empty() {
                let _ = tx.send(0);
            } else {
                self.waiters.push(ReindexWaiter {
                    remaining: job_ids,
                    started,
                    tx,
                });
            }
        }
        started
    }

    /// Synchronous re-index request. Matches sources by path, expands the
    /// dependent closure and submits jobs; `wait` (if given) receives the
    /// started count once the last of those jobs settles.
    pub fn reindex(&mut self, pattern: &str, wait: Option<channel::Sender<usize>>) -> usize {
        let matched: BTreeSet<FileId> = self
            .sources
            .iter()
            .filter(|(_, list)| {
                pattern.is_empty()
                    || list
                        .iter()
                        .any(|source| path_matches(pattern, &source.path))
            })
            .map(|(&file, _)| file)
            .collect();
        let expanded = self.expand_dirty(&matched);
        self.start_dirty_jobs(&expanded, JobFlavor::Reindex, wait)
    }

    /// Removes every source whose path matches `pattern`: active jobs are
    /// cancelled, symbol maps erased from disk, the graph unlinked. Returns
    /// the number of removed sources.
    pub fn remove_sources(&mut self, pattern: &str) -> usize {
        let matched: Vec<FileId> = self
            .sources
            .iter()
            .filter(|(_, list)| {
                list.iter()
                    .any(|source| path_matches(pattern, &source.path))
            })
            .map(|(&file, _)| file)
            .collect();

        let mut removed = 0;
        for file in matched {
            removed += self.remove_file(file);
        }
        removed
    }

    fn remove_file(&mut self, file: FileId) -> usize {
        let mut removed = 0;
        if let Some(list) = self.sources.remove(&file) {
            removed = list.len();
            for source in &list {
                if let Some(job) = self.table.active_job(source.key()) {
                    job.cancel();
                    self.table.remove_active(source.key(), job.id());
                }
            }
        }

        let map_dir = self.file_map_dir(file);
        if let Err(err) = fs::remove_dir_all(&map_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    target = "crux.project",
                    dir = %map_dir.display(),
                    error = %err,
                    "failed to erase symbol maps"
                );
            }
        }

        self.dependencies.remove(file);
        self.dirty_set.remove(file);
        self.stamps.remove(&file);
        self.fix_its.remove(&file);
        self.diagnostics.remove(&file);
        removed
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    pub fn watch(&mut self, dir: &Path, mode: WatchModes) {
        self.watch_table.watch(&mut *self.watcher, dir, mode);
    }

    pub fn unwatch(&mut self, dir: &Path, mode: WatchModes) {
        self.watch_table.unwatch(&mut *self.watcher, dir, mode);
    }

    pub fn clear_watch(&mut self, mask: WatchModes) {
        self.watch_table.clear(&mut *self.watcher, mask);
    }

    pub fn watched_paths(&self) -> HashMap<PathBuf, WatchModes> {
        self.watch_table.entries().clone()
    }

    fn watch_file(&mut self, file_id: FileId) {
        let Some(path) = self.registry.path(file_id) else {
            return;
        };
        let Some(dir) = path.parent() else {
            return;
        };
        let mode = if self.sources.contains_key(&file_id) {
            WatchModes::SOURCE_FILE
        } else {
            WatchModes::DEPENDENCY
        };
        self.watch_table.watch(&mut *self.watcher, dir, mode);
    }

    /// Dispatches one watcher event.
    pub fn on_watch_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Rescan => self.revalidate_known_files(),
            WatchEvent::Changes { changes } => {
                for change in changes {
                    let path = change.path().to_path_buf();
                    match change.kind() {
                        FileChangeKind::Created | FileChangeKind::Modified => {
                            self.on_file_added_or_modified(&path)
                        }
                        FileChangeKind::Deleted => self.on_file_removed(&path),
                    }
                }
            }
        }
    }

    /// Drains and dispatches every pending watcher event.
    pub fn drain_watcher_events(&mut self) -> usize {
        let events = match self.watcher.poll() {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(
                    target = "crux.project",
                    error = %err,
                    "file watcher reported an error"
                );
                return 0;
            }
        };
        let count = events.len();
        for event in events {
            self.on_watch_event(event);
        }
        count
    }

    pub fn on_file_added(&mut self, path: &Path) {
        self.on_file_added_or_modified(path);
    }

    pub fn on_file_modified(&mut self, path: &Path) {
        self.on_file_added_or_modified(path);
    }

    fn on_file_added_or_modified(&mut self, path: &Path) {
        if let Some(info) = &self.comp_db {
            if info.file_path() == path {
                if let Err(err) = self.reload_compilation_database() {
                    tracing::warn!(
                        target = "crux.project",
                        error = %err,
                        "failed to reload compilation database"
                    );
                }
                return;
            }
        }

        let Some(file_id) = self.registry.file_id(path) else {
            return;
        };
        if self.suspended.contains(&file_id) {
            return;
        }
        if self.sources.contains_key(&file_id) || self.dependencies.contains(file_id) {
            self.dirty(file_id);
        }
    }

    pub fn on_file_removed(&mut self, path: &Path) {
        let Some(file_id) = self.registry.file_id(path) else {
            return;
        };

        // Dependents must re-parse against the missing file before the node
        // disappears.
        let dependents = self
            .dependencies
            .dependencies(file_id, DependencyMode::DependsOnArg);
        for dependent in dependents {
            if !self.suspended.contains(&dependent) {
                self.dirty_set.insert(dependent);
            }
        }

        if self.sources.contains_key(&file_id) {
            self.remove_file(file_id);
        }
    }

    fn revalidate_known_files(&mut self) {
        let known: Vec<FileId> = self.stamps.keys().copied().collect();
        for file in known {
            if !self.validate(file, ValidateMode::StatOnly) {
                self.dirty_set.insert(file);
            }
        }
    }

    // ------------------------------------------------------------------
    // Compilation database
    // ------------------------------------------------------------------

    pub fn set_compilation_database_info(
        &mut self,
        dir: PathBuf,
        path_environment: Vec<String>,
        index_flags: u32,
    ) {
        let info = CompilationDatabaseInfo {
            last_modified_millis: mtime_millis(&dir.join("compile_commands.json")).unwrap_or(0),
            dir,
            path_environment,
            index_flags,
        };
        self.watch_table.watch(
            &mut *self.watcher,
            &info.dir,
            WatchModes::COMPILATION_DATABASE,
        );
        self.comp_db = Some(info);
    }

    pub fn compilation_database_info(&self) -> Option<&CompilationDatabaseInfo> {
        self.comp_db.as_ref()
    }

    /// Diff-then-apply reload of `compile_commands.json`: removed sources
    /// are dropped, added or changed sources are marked dirty, unchanged
    /// sources are left alone.
    pub fn reload_compilation_database(&mut self) -> Result<(), ProjectError> {
        let Some(info) = self.comp_db.clone() else {
            return Err(ProjectError::NoCompilationDatabase);
        };
        let db_path = info.file_path();
        let json = fs::read_to_string(&db_path)?;
        let commands = parse_compile_commands(&json)?;

        let mut desired: Sources = Sources::new();
        for command in &commands {
            let Some(source) = command.to_source() else {
                continue;
            };
            let file_id = self.registry.insert_file(&source.path);
            desired.entry(file_id).or_default().push(source);
        }

        let current_files: Vec<FileId> = self.sources.keys().copied().collect();
        let mut removed = 0;
        for file in current_files {
            if !desired.contains_key(&file) {
                removed += self.remove_file(file);
            }
        }

        let mut changed = 0;
        for (file, list) in desired {
            let keys: BTreeSet<SourceKey> = list.iter().map(|s| s.key()).collect();
            let current_keys: BTreeSet<SourceKey> = self
                .sources
                .get(&file)
                .map(|existing| existing.iter().map(|s| s.key()).collect())
                .unwrap_or_default();
            if keys != current_keys {
                self.sources.insert(file, list);
                self.dirty_set.insert(file);
                changed += 1;
            }
        }

        if let Some(info) = &mut self.comp_db {
            info.last_modified_millis = mtime_millis(&db_path).unwrap_or(0);
        }

        tracing::info!(
            target = "crux.project",
            path = %db_path.display(),
            changed,
            removed,
            "compilation database reloaded"
        );
        Ok(())
    }

    /// Emits the sources as a `compile_commands.json` document.
    pub fn to_compilation_database(&self) -> Result<String, ProjectError> {
        #[derive(Serialize)]
        struct Entry<'a> {
            directory: String,
            file: String,
            arguments: Vec<&'a str>,
        }

        let mut entries = Vec::new();
        for list in self.sources.values() {
            for source in list {
                let mut arguments: Vec<&str> = Vec::with_capacity(source.args.len() + 1);
                arguments.push(source.compiler.as_str());
                arguments.extend(source.args.iter().map(String::as_str));
                entries.push(Entry {
                    directory: self.root.to_string_lossy().into_owned(),
                    file: source.path.to_string_lossy().into_owned(),
                    arguments,
                });
            }
        }
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    // ------------------------------------------------------------------
    // Sources, suspension, dependency accessors
    // ------------------------------------------------------------------

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn sources_for(&self, file_id: FileId) -> &[Source] {
        self.sources
            .get(&file_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_source(&self, file_id: FileId) -> bool {
        self.sources.contains_key(&file_id)
    }

    pub fn is_indexed(&self, file_id: FileId) -> bool {
        self.sources.contains_key(&file_id) || self.table.is_visited(file_id)
    }

    /// Does this project contain `pattern`? `Some(indexed)` when matched.
    pub fn match_path(&self, pattern: &str) -> Option<bool> {
        let source_hit = self.sources.values().flatten().any(|source| {
            path_matches(pattern, &source.path)
        });
        if source_hit {
            return Some(true);
        }
        let visited = self.table.visited_files();
        if visited.values().any(|path| path_matches(pattern, path)) {
            return Some(false);
        }
        if path_matches(pattern, &self.root) {
            return Some(false);
        }
        None
    }

    pub fn toggle_suspend_file(&mut self, file_id: FileId) -> bool {
        if self.suspended.remove(&file_id) {
            false
        } else {
            self.suspended.insert(file_id);
            true
        }
    }

    pub fn is_suspended(&self, file_id: FileId) -> bool {
        self.suspended.contains(&file_id)
    }

    pub fn clear_suspended_files(&mut self) {
        self.suspended.clear();
    }

    pub fn suspended_files(&self) -> &BTreeSet<FileId> {
        &self.suspended
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub fn dependencies(&self, file_id: FileId, mode: DependencyMode) -> BTreeSet<FileId> {
        self.dependencies.dependencies(file_id, mode)
    }

    pub fn depends_on(&self, source: FileId, header: FileId) -> bool {
        self.dependencies.depends_on(source, header)
    }

    pub fn dump_dependencies(&self, file_id: Option<FileId>) -> String {
        self.dependencies.dump(&self.registry, file_id)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    pub fn validate(&self, file_id: FileId, mode: ValidateMode) -> bool {
        let Some(path) = self.registry.path(file_id) else {
            return false;
        };
        let Some(&stamp) = self.stamps.get(&file_id) else {
            return false;
        };
        let Some(current) = mtime_millis(&path) else {
            return false;
        };
        if current != stamp {
            return false;
        }

        if matches!(mode, ValidateMode::Validate) {
            let symbols_path = file_map_path(&self.data_dir, file_id, FileMapKind::Symbols);
            if PersistedArchive::<SymbolTable>::open(
                &symbols_path,
                ArtifactKind::Symbols,
                FILE_MAP_SCHEMA_VERSION,
            )
            .is_err()
            {
                return false;
            }
            for kind in [
                FileMapKind::SymbolNames,
                FileMapKind::Targets,
                FileMapKind::Usrs,
            ] {
                let path = file_map_path(&self.data_dir, file_id, kind);
                if PersistedArchive::<LocationListTable>::open(
                    &path,
                    artifact_kind(kind),
                    FILE_MAP_SCHEMA_VERSION,
                )
                .is_err()
                {
                    return false;
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Query scope
    // ------------------------------------------------------------------

    /// Opens the file-map scope for a query session. Queries call this
    /// implicitly; embedders may bracket several queries in one scope.
    pub fn begin_scope(&mut self) {
        if self.scope_refs == 0 {
            self.scope = Some(QueryScope::new(
                self.data_dir.clone(),
                self.config.max_open_file_maps,
            ));
        }
        self.scope_refs += 1;
    }

    pub fn end_scope(&mut self) {
        debug_assert!(self.scope_refs > 0);
        self.scope_refs = self.scope_refs.saturating_sub(1);
        if self.scope_refs == 0 {
            if let Some(mut scope) = self.scope.take() {
                // A failed map load marks the file for re-index.
                for file in scope.take_load_failures() {
                    self.dirty_set.insert(file);
                }
            }
        }
    }

    pub fn scope(&self) -> Option<&QueryScope> {
        self.scope.as_ref()
    }

    fn with_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.begin_scope();
        let result = f(self);
        self.end_scope();
        result
    }

    fn scope_mut(&mut self) -> &mut QueryScope {
        self.scope
            .as_mut()
            .expect("query scope is active during queries")
    }

    /// Warms the file maps of `file_id` ahead of an expected query burst.
    pub fn prepare(&mut self, file_id: FileId) {
        self.with_scope(|project| {
            let scope = project.scope_mut();
            let _ = scope.open_symbols(file_id);
            let _ = scope.open_symbol_names(file_id);
            let _ = scope.open_targets(file_id);
            let _ = scope.open_usrs(file_id);
        });
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The symbol at (or covering) `loc`.
    pub fn find_symbol(&mut self, loc: Location) -> Option<Symbol> {
        self.find_symbol_with_index(loc).map(|(symbol, _)| symbol)
    }

    /// Like [`Project::find_symbol`], also yielding the index within the
    /// file's symbol list.
    pub fn find_symbol_with_index(&mut self, loc: Location) -> Option<(Symbol, usize)> {
        self.with_scope(|project| project.find_symbol_inner(loc))
    }

    fn find_symbol_inner(&mut self, loc: Location) -> Option<(Symbol, usize)> {
        if !loc.is_valid() {
            return None;
        }
        let map = self.scope_mut().open_symbols(loc.file_id()).ok()?;
        let archived = map.archived();
        if let Some((index, symbol)) = archived.get(&loc) {
            return Some((symbol, index));
        }
        // No exact hit: the nearest preceding symbol wins if its token span
        // covers the location.
        let lower = archived.lower_bound(&loc);
        if lower == 0 {
            return None;
        }
        let index = lower - 1;
        let symbol = archived.value_at(index)?;
        symbol.contains(loc).then_some((symbol, index))
    }

    pub fn find_targets_at(&mut self, loc: Location) -> BTreeSet<Symbol> {
        self.with_scope(|project| {
            match project.find_symbol_inner(loc) {
                Some((symbol, _)) => project.find_targets_inner(&symbol),
                None => BTreeSet::new(),
            }
        })
    }

    pub fn find_targets(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        self.with_scope(|project| project.find_targets_inner(symbol))
    }

    pub fn find_target(&mut self, symbol: &Symbol) -> Option<Symbol> {
        let targets = self.find_targets(symbol);
        best_target(&targets)
    }

    fn find_targets_inner(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        if symbol.usr.is_empty() {
            return BTreeSet::new();
        }
        // A definition or reference resolves toward the headers it pulls in;
        // a declaration resolves toward the translation units defining it.
        let mode = if symbol.is_definition() || symbol.is_reference() {
            DependencyMode::ArgDependsOn
        } else {
            DependencyMode::DependsOnArg
        };
        let mut out = self.find_by_usr_inner(
            &symbol.usr,
            symbol.location.file_id(),
            mode,
            Some(symbol.location),
        );
        out.retain(|candidate| candidate.is_definition() || candidate.is_declaration());
        out
    }

    pub fn find_all_references(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        self.with_scope(|project| project.find_all_references_inner(symbol))
    }

    fn find_all_references_inner(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        if symbol.usr.is_empty() {
            return out;
        }

        // Anchor on every declaration/definition of the usr, then gather the
        // referencing entries across each anchor's dependents.
        let origin = symbol.location.file_id();
        let mut anchor_files: BTreeSet<FileId> = [origin].into();
        for mode in [DependencyMode::ArgDependsOn, DependencyMode::DependsOnArg] {
            for anchor in self.find_by_usr_inner(&symbol.usr, origin, mode, None) {
                anchor_files.insert(anchor.location.file_id());
            }
        }

        let mut scanned: BTreeSet<FileId> = BTreeSet::new();
        for anchor in anchor_files {
            for file in self.candidate_files(anchor, DependencyMode::DependsOnArg) {
                if !scanned.insert(file) {
                    continue;
                }
                let Ok(map) = self.scope_mut().open_targets(file) else {
                    continue;
                };
                let Some(locations) = map.archived().get(&symbol.usr) else {
                    continue;
                };
                for loc in locations {
                    if let Some((candidate, _)) = self.find_symbol_inner(loc) {
                        if candidate.usr == symbol.usr {
                            out.insert(candidate);
                        }
                    }
                }
            }
        }
        out
    }

    /// The function-like definitions whose bodies contain references to
    /// `symbol`.
    pub fn find_callers(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        self.with_scope(|project| {
            let references = project.find_all_references_inner(symbol);
            let mut out = BTreeSet::new();
            for reference in references {
                if !reference.is_reference() {
                    continue;
                }
                if let Some(caller) = project.enclosing_function(reference.location) {
                    out.insert(caller);
                }
            }
            out
        })
    }

    fn enclosing_function(&mut self, loc: Location) -> Option<Symbol> {
        let map = self.scope_mut().open_symbols(loc.file_id()).ok()?;
        let archived = map.archived();
        let mut index = archived.lower_bound(&loc);
        while index > 0 {
            index -= 1;
            let symbol = archived.value_at(index)?;
            if symbol.kind.is_function_like()
                && symbol.is_definition()
                && symbol.body_contains(loc)
            {
                return Some(symbol);
            }
        }
        None
    }

    /// Overriders and overridden declarations of a virtual method.
    pub fn find_virtuals(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        if !symbol.is_virtual() || !symbol.kind.is_function_like() {
            return BTreeSet::new();
        }
        self.with_scope(|project| {
            project.walk_hierarchy(symbol, |candidate| {
                candidate.is_virtual() && candidate.kind.is_function_like()
            })
        })
    }

    /// Transitive subclasses of a class-like symbol.
    pub fn find_subclasses(&mut self, symbol: &Symbol) -> BTreeSet<Symbol> {
        if !symbol.kind.is_class_like() {
            return BTreeSet::new();
        }
        self.with_scope(|project| {
            project.walk_hierarchy(symbol, |candidate| {
                candidate.kind.is_class_like() && candidate.is_definition()
            })
        })
    }

    /// Walks the usr hierarchy seeded by `symbol`: upward through
    /// `base_usrs`, downward through target entries keyed by each usr.
    /// `keep` filters which discovered symbols join the result (and seed
    /// further traversal).
    fn walk_hierarchy(
        &mut self,
        symbol: &Symbol,
        keep: impl Fn(&Symbol) -> bool,
    ) -> BTreeSet<Symbol> {
        let origin = symbol.location.file_id();
        let mut out = BTreeSet::new();
        let mut seen_usrs: BTreeSet<String> = BTreeSet::new();
        let mut queue: Vec<String> = Vec::new();

        queue.push(symbol.usr.clone());
        queue.extend(symbol.base_usrs.iter().cloned());

        let related = self.related_files(origin);
        while let Some(usr) = queue.pop() {
            if usr.is_empty() || !seen_usrs.insert(usr.clone()) {
                continue;
            }

            // Declarations and definitions carrying this usr.
            for file in &related {
                let Ok(map) = self.scope_mut().open_usrs(*file) else {
                    continue;
                };
                let Some(locations) = map.archived().get(&usr) else {
                    continue;
                };
                for loc in locations {
                    if let Some((found, _)) = self.find_symbol_inner(loc) {
                        if keep(&found) {
                            queue.extend(found.base_usrs.iter().cloned());
                            out.insert(found);
                        }
                    }
                }
            }

            // Symbols that target this usr (overriders, subclasses).
            for file in &related {
                let Ok(map) = self.scope_mut().open_targets(*file) else {
                    continue;
                };
                let Some(locations) = map.archived().get(&usr) else {
                    continue;
                };
                for loc in locations {
                    if let Some((candidate, _)) = self.find_symbol_inner(loc) {
                        if candidate.usr != usr && keep(&candidate) {
                            queue.push(candidate.usr.clone());
                            out.insert(candidate);
                        }
                    }
                }
            }
        }

        out.remove(symbol);
        out
    }

    /// `file` plus its transitive relations in both directions.
    fn related_files(&self, file: FileId) -> Vec<FileId> {
        let mut files: BTreeSet<FileId> = [file].into();
        files.extend(
            self.dependencies
                .dependencies(file, DependencyMode::DependsOnArg),
        );
        files.extend(
            self.dependencies
                .dependencies(file, DependencyMode::ArgDependsOn),
        );
        files.into_iter().collect()
    }

    /// The usrs targeted by the symbol at `loc`: every `targets` entry of
    /// the file whose location set contains `loc`.
    pub fn find_target_usrs(&mut self, loc: Location) -> BTreeSet<String> {
        self.with_scope(|project| {
            let mut out = BTreeSet::new();
            let Ok(map) = project.scope_mut().open_targets(loc.file_id()) else {
                return out;
            };
            let archived = map.archived();
            for index in 0..archived.len() {
                let Some(locations) = archived.locations_at(index) else {
                    continue;
                };
                if locations.contains(&loc) {
                    if let Some(usr) = archived.key_at(index) {
                        out.insert(usr.to_string());
                    }
                }
            }
            out
        })
    }

    /// All symbols with `usr` across the files selected by `mode`.
    pub fn find_by_usr(
        &mut self,
        usr: &str,
        file_id: FileId,
        mode: DependencyMode,
        filtered: Option<Location>,
    ) -> BTreeSet<Symbol> {
        self.with_scope(|project| project.find_by_usr_inner(usr, file_id, mode, filtered))
    }

    fn find_by_usr_inner(
        &mut self,
        usr: &str,
        file_id: FileId,
        mode: DependencyMode,
        filtered: Option<Location>,
    ) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        if usr.is_empty() {
            return out;
        }
        for file in self.candidate_files(file_id, mode) {
            let Ok(map) = self.scope_mut().open_usrs(file) else {
                continue;
            };
            let Some(locations) = map.archived().get(usr) else {
                continue;
            };
            for loc in locations {
                if filtered == Some(loc) {
                    continue;
                }
                if let Some((symbol, _)) = self.find_symbol_inner(loc) {
                    out.insert(symbol);
                }
            }
        }
        out
    }

    /// Iterates symbol names matching `pattern` over the `symnames` maps.
    ///
    /// Plain patterns use an ordered prefix scan; wildcard or
    /// case-insensitive patterns scan every name. `file_filter` restricts
    /// the walk to one file's map.
    pub fn find_symbols(
        &mut self,
        pattern: &str,
        query_flags: QueryFlags,
        file_filter: FileId,
        cb: &mut dyn FnMut(MatchKind, &str, &[Location]),
    ) {
        let cs = if query_flags.contains(QueryFlags::CASE_INSENSITIVE) {
            CaseSensitivity::Insensitive
        } else {
            CaseSensitivity::Sensitive
        };
        let full_scan =
            crux_core::pattern::is_wildcard(pattern) || cs == CaseSensitivity::Insensitive;

        let files: Vec<FileId> = if file_filter.is_valid() {
            vec![file_filter]
        } else {
            let mut files: BTreeSet<FileId> = self.dependencies.files().collect();
            files.extend(self.sources.keys().copied());
            files.into_iter().collect()
        };

        self.with_scope(|project| {
            for file in files {
                let Ok(map) = project.scope_mut().open_symbol_names(file) else {
                    continue;
                };
                let archived = map.archived();
                let range = if full_scan {
                    0..archived.len()
                } else {
                    let start = archived.lower_bound(pattern);
                    start..archived.len()
                };
                for index in range {
                    let Some(name) = archived.key_at(index) else {
                        break;
                    };
                    if !full_scan && !name.starts_with(pattern) {
                        break;
                    }
                    if let Some(kind) = match_symbol_name(pattern, name, cs) {
                        if let Some(locations) = archived.locations_at(index) {
                            cb(kind, name, &locations);
                        }
                    }
                }
            }
        });
    }

    /// Orders symbols by (kind rank, definition-first, path, line, column).
    pub fn sort(
        &self,
        symbols: impl IntoIterator<Item = Symbol>,
        flags: QueryFlags,
    ) -> Vec<SortedSymbol> {
        let strip = flags.contains(QueryFlags::STRIP_PATH);
        let mut out: Vec<(u32, bool, String, Location, SymbolKind)> = symbols
            .into_iter()
            .map(|symbol| {
                let path = self
                    .registry
                    .path(symbol.location.file_id())
                    .map(|path| {
                        if strip {
                            path.file_name()
                                .map(|name| name.to_string_lossy().into_owned())
                                .unwrap_or_default()
                        } else {
                            path.to_string_lossy().into_owned()
                        }
                    })
                    .unwrap_or_default();
                (
                    symbol.kind.rank(),
                    !symbol.is_definition(),
                    path,
                    symbol.location,
                    symbol.kind,
                )
            })
            .collect();

        out.sort_by(|a, b| {
            let key_a = (a.0, a.1, &a.2, a.3.line, a.3.column);
            let key_b = (b.0, b.1, &b.2, b.3.line, b.3.column);
            key_a.cmp(&key_b)
        });
        if flags.contains(QueryFlags::REVERSE_SORT) {
            out.reverse();
        }

        out.into_iter()
            .map(|(_, not_definition, _, location, kind)| SortedSymbol {
                location,
                kind,
                is_definition: !not_definition,
            })
            .collect()
    }

    fn candidate_files(&self, file_id: FileId, mode: DependencyMode) -> Vec<FileId> {
        let mut files = Vec::new();
        if !file_id.is_valid() {
            return files;
        }
        files.push(file_id);
        for dep in self.dependencies.dependencies(file_id, mode) {
            if dep != file_id {
                files.push(dep);
            }
        }
        files
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    /// Fix-its for `file_id`, one `line:col length -> "replacement"` per
    /// line.
    pub fn fix_its(&self, file_id: FileId) -> String {
        self.fix_its
            .get(&file_id)
            .map(|list| format_fix_its(list))
            .unwrap_or_default()
    }

    /// Stored diagnostics for one file as a JSON document.
    pub fn diagnose(&self, file_id: FileId) -> Result<String, ProjectError> {
        let empty: Vec<Diagnostic> = Vec::new();
        let entries = self
            .diagnostics
            .get(&file_id)
            .map(Vec::as_slice)
            .unwrap_or(&empty);
        Ok(serde_json::to_string(entries)?)
    }

    /// All stored diagnostics, keyed by path, as a JSON document.
    pub fn diagnose_all(&self) -> Result<String, ProjectError> {
        let mut by_path: BTreeMap<String, &Vec<Diagnostic>> = BTreeMap::new();
        for (file, entries) in &self.diagnostics {
            let key = self
                .registry
                .path(*file)
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("<file {}>", file.to_raw()));
            by_path.insert(key, entries);
        }
        Ok(serde_json::to_string(&by_path)?)
    }

    /// Rough memory accounting for the `estimate-memory` admin query.
    pub fn estimate_memory(&self) -> String {
        let mut out = String::new();
        let visited = self.table.visited_files();
        let _ = writeln!(out, "sources: {}", self.sources.len());
        let _ = writeln!(out, "dependency nodes: {}", self.dependencies.len());
        let _ = writeln!(out, "visited files: {}", visited.len());
        let _ = writeln!(out, "diagnostics: {}", self.diagnostics.len());
        let _ = writeln!(out, "fix-its: {}", self.fix_its.len());
        let _ = writeln!(out, "suspended files: {}", self.suspended.len());
        let resident = self
            .scope
            .as_ref()
            .map(|scope| scope.resident_bytes())
            .unwrap_or(0);
        let _ = writeln!(out, "open file maps: {} bytes", resident);
        out
    }

    /// Dumps the four file maps of `file_id` for debugging.
    pub fn dump_file_maps(&mut self, file_id: FileId) -> String {
        self.with_scope(|project| {
            let mut out = String::new();

            if let Ok(map) = project.scope_mut().open_symbols(file_id) {
                let archived = map.archived();
                let _ = writeln!(out, "symbols ({} entries):", archived.len());
                for symbol in archived.iter() {
                    let _ = writeln!(
                        out,
                        "  {:?} {:?} {} {}",
                        symbol.location, symbol.kind, symbol.usr, symbol.name
                    );
                }
            }

            for kind in [
                FileMapKind::SymbolNames,
                FileMapKind::Targets,
                FileMapKind::Usrs,
            ] {
                let map = match kind {
                    FileMapKind::SymbolNames => project.scope_mut().open_symbol_names(file_id),
                    FileMapKind::Targets => project.scope_mut().open_targets(file_id),
                    _ => project.scope_mut().open_usrs(file_id),
                };
                let Ok(map) = map else {
                    continue;
                };
                let archived = map.archived();
                let _ = writeln!(
                    out,
                    "{} ({} entries):",
                    crate::file_maps::file_map_name(kind),
                    archived.len()
                );
                for index in 0..archived.len() {
                    if let (Some(key), Some(locations)) =
                        (archived.key_at(index), archived.locations_at(index))
                    {
                        let _ = writeln!(out, "  {} -> {:?}", key, locations);
                    }
                }
            }
            out
        })
    }

    fn file_map_dir(&self, file_id: FileId) -> PathBuf {
        self.data_dir.join(file_id.to_raw().to_string())
    }

    /// `<data_dir>/<file_id>/<name>`
    pub fn source_file_path(&self, file_id: FileId, name: &str) -> PathBuf {
        self.file_map_dir(file_id).join(name)
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        for job in self.table.active_jobs() {
            job.cancel();
        }
        if let Err(err) = self.save_now(true) {
            tracing::warn!(
                target = "crux.project",
                root = %self.root.display(),
                error = %err,
                "failed to save project state on shutdown"
            );
        }
    }
}

fn mtime_millis(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    Some(millis as u64)
}

fn path_matches(pattern: &str, path: &Path) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let text = path.to_string_lossy();
    if crux_core::pattern::is_wildcard(pattern) {
        return crux_core::pattern::wild_match(pattern, &text, CaseSensitivity::Sensitive);
    }
    text == pattern || text.starts_with(pattern) || text.ends_with(pattern)
}
