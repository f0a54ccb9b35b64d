//! Shared fixtures for the project integration suite.
//!
//! Everything is deterministic: the manual backend records submitted jobs
//! and the tests complete them explicitly; the manual watcher delivers only
//! injected events.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crux_core::{
    FileId, Location, LocationListTable, Symbol, SymbolFlags, SymbolKind, SymbolTable,
};
use crux_project::{
    BackendContext, FinishedJob, IndexResult, IndexerJob, ManualIndexerBackend, Project,
    ProjectConfig, FILE_MAP_SCHEMA_VERSION,
};
use crux_storage::{write_archive_atomic, ArtifactKind};
use crux_vfs::{ManualFileWatcher, ManualFileWatcherHandle, PathRegistry};

pub struct TestProject {
    pub project: Project,
    pub backend: Arc<ManualIndexerBackend>,
    pub watcher: ManualFileWatcherHandle,
    pub registry: Arc<PathRegistry>,
    pub temp: tempfile::TempDir,
}

pub fn test_project() -> TestProject {
    let temp = tempfile::tempdir().expect("create tempdir");
    let root = temp.path().join("project");
    std::fs::create_dir_all(root.join("src")).expect("create project tree");

    let registry = Arc::new(PathRegistry::new());
    let backend = ManualIndexerBackend::new();
    let watcher = ManualFileWatcher::new();
    let handle = watcher.handle();

    let config = ProjectConfig {
        data_dir: Some(temp.path().join("data")),
        ..Default::default()
    };
    let mut project = Project::new(
        &root,
        config,
        registry.clone(),
        backend.clone(),
        Box::new(watcher),
    );
    project.init().expect("project init");

    TestProject {
        project,
        backend,
        watcher: handle,
        registry,
        temp,
    }
}

/// Tears the project down and reopens it against the same data directory
/// with a fresh registry, as a daemon restart would.
pub fn reopen_project(t: TestProject) -> TestProject {
    let TestProject { project, temp, .. } = t;
    let root = project.root().to_path_buf();
    let data_dir = project.data_dir().to_path_buf();
    drop(project);

    let registry = Arc::new(PathRegistry::new());
    let backend = ManualIndexerBackend::new();
    let watcher = ManualFileWatcher::new();
    let handle = watcher.handle();

    let config = ProjectConfig {
        data_dir: Some(data_dir),
        ..Default::default()
    };
    let mut project = Project::new(
        root,
        config,
        registry.clone(),
        backend.clone(),
        Box::new(watcher),
    );
    project.init().expect("project re-init");

    TestProject {
        project,
        backend,
        watcher: handle,
        registry,
        temp,
    }
}

/// Creates a real file under the project root and returns its path.
pub fn create_file(t: &TestProject, rel: &str, contents: &str) -> PathBuf {
    let path = t.project.root().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(&path, contents).expect("write source file");
    path
}

pub fn def(at: Location, kind: SymbolKind, usr: &str, name: &str) -> Symbol {
    Symbol {
        location: at,
        kind,
        flags: SymbolFlags::DEFINITION,
        usr: usr.to_string(),
        name: name.to_string(),
        length: name.len() as u32,
        end_line: 0,
        end_column: 0,
        base_usrs: Vec::new(),
    }
}

pub fn decl(at: Location, kind: SymbolKind, usr: &str, name: &str) -> Symbol {
    Symbol {
        flags: SymbolFlags::DECLARATION,
        ..def(at, kind, usr, name)
    }
}

pub fn reference(at: Location, usr: &str, name: &str) -> Symbol {
    Symbol {
        location: at,
        kind: SymbolKind::Reference,
        flags: SymbolFlags::REFERENCE,
        usr: usr.to_string(),
        name: name.to_string(),
        length: name.len() as u32,
        end_line: 0,
        end_column: 0,
        base_usrs: Vec::new(),
    }
}

pub fn with_body(mut symbol: Symbol, end_line: u32, end_column: u32) -> Symbol {
    symbol.end_line = end_line;
    symbol.end_column = end_column;
    symbol
}

pub fn with_bases(mut symbol: Symbol, base_usrs: &[&str]) -> Symbol {
    symbol.base_usrs = base_usrs.iter().map(|usr| usr.to_string()).collect();
    symbol
}

pub fn virtual_(mut symbol: Symbol) -> Symbol {
    symbol.flags = symbol.flags.with(SymbolFlags::VIRTUAL);
    symbol
}

/// Writes the four file maps of `file_id` the way an indexer backend would:
///
/// - `symbols`: every record keyed by location
/// - `symnames`: qualified name → locations (references excluded)
/// - `targets`: usr → every location whose symbol declares, defines or
///   references that usr (base usrs included, which is how override and
///   subclass edges appear)
/// - `usrs`: usr → declaring/defining locations
pub fn write_file_maps(data_dir: &Path, file_id: FileId, symbols: &[Symbol]) {
    let dir = data_dir.join(file_id.to_raw().to_string());

    let mut by_location = BTreeMap::new();
    let mut names: BTreeMap<String, BTreeSet<Location>> = BTreeMap::new();
    let mut targets: BTreeMap<String, BTreeSet<Location>> = BTreeMap::new();
    let mut usrs: BTreeMap<String, BTreeSet<Location>> = BTreeMap::new();

    for symbol in symbols {
        assert_eq!(symbol.location.file_id(), file_id, "fixture symbol in wrong file");
        by_location.insert(symbol.location, symbol.clone());

        targets
            .entry(symbol.usr.clone())
            .or_default()
            .insert(symbol.location);
        for base in &symbol.base_usrs {
            targets
                .entry(base.clone())
                .or_default()
                .insert(symbol.location);
        }

        if !symbol.is_reference() {
            names
                .entry(symbol.name.clone())
                .or_default()
                .insert(symbol.location);
            usrs.entry(symbol.usr.clone())
                .or_default()
                .insert(symbol.location);
        }
    }

    write_archive_atomic(
        &dir.join("symbols"),
        ArtifactKind::Symbols,
        FILE_MAP_SCHEMA_VERSION,
        &SymbolTable::from_symbols(by_location),
    )
    .expect("write symbols map");
    write_archive_atomic(
        &dir.join("symnames"),
        ArtifactKind::SymbolNames,
        FILE_MAP_SCHEMA_VERSION,
        &LocationListTable::from_map(names),
    )
    .expect("write symnames map");
    write_archive_atomic(
        &dir.join("targets"),
        ArtifactKind::Targets,
        FILE_MAP_SCHEMA_VERSION,
        &LocationListTable::from_map(targets),
    )
    .expect("write targets map");
    write_archive_atomic(
        &dir.join("usrs"),
        ArtifactKind::Usrs,
        FILE_MAP_SCHEMA_VERSION,
        &LocationListTable::from_map(usrs),
    )
    .expect("write usrs map");
}

/// Completes `job` the way a backend worker would: claim the visited files,
/// report the include graph, send the terminal message and let the project
/// apply it.
pub fn complete_job(
    project: &mut Project,
    job: Arc<IndexerJob>,
    ctx: &BackendContext,
    deps: &[(FileId, Vec<FileId>)],
    visited: &[FileId],
) {
    let mut result = IndexResult {
        source_key: job.source_key(),
        ..Default::default()
    };
    for &file in visited {
        let path = ctx.registry.path(file).expect("visited file has a path");
        ctx.table.visit_file(file, &path, job.source_key());
        result.visited.insert(file);
    }
    for (includer, includes) in deps {
        result.dependencies.insert(*includer, includes.clone());
    }
    ctx.results
        .send(FinishedJob { job, result })
        .expect("deliver job result");
    project.drain_job_events();
}

/// Pops the single job the backend should have recorded.
pub fn take_single_job(backend: &ManualIndexerBackend) -> (Arc<IndexerJob>, BackendContext) {
    let mut jobs = backend.take_jobs();
    assert_eq!(jobs.len(), 1, "expected exactly one submitted job");
    jobs.pop().expect("job present")
}
