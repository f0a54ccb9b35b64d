//! The per-project core of the crux cross-reference engine.
//!
//! A [`Project`] owns the indexed symbol database for one tree of
//! translation units: the include dependency graph, the table of active
//! indexer jobs, the debounced dirty set driving incremental re-indexing,
//! per-directory watch registrations, the query surface over the on-disk
//! symbol maps, and persistence of sources and graph state.
//!
//! The project is main-loop-bound: all state mutation happens on the thread
//! that drives it. Indexer workers interact through exactly two shared
//! operations ([`Project::visit_file`] / [`Project::release_file_ids`]) and
//! one terminal message (a [`FinishedJob`] delivered over the project's
//! result channel).

mod config;
mod dependency;
mod diagnostics;
mod dirty;
mod file_maps;
mod job;
mod persist;
mod project;
mod source;
mod watch_table;

pub use config::ProjectConfig;
pub use dependency::{DependencyGraph, DependencyMode, DependencyNode};
pub use diagnostics::{Diagnostic, DiagnosticLevel, Diagnostics, FixIt};
pub use dirty::DirtySet;
pub use file_maps::{file_map_name, FileMapKind, QueryScope, FILE_MAP_SCHEMA_VERSION};
pub use job::{
    BackendContext, FinishedJob, IndexResult, IndexerBackend, IndexerJob, JobFlavor, JobState,
    JobTable, ManualIndexerBackend,
};
pub use persist::{
    read_sources, ProjectState, SourcesState, PROJECT_STATE_SCHEMA_VERSION,
    SOURCES_STATE_SCHEMA_VERSION,
};
pub use project::{best_target, Project, ProjectError, QueryFlags, SortedSymbol, ValidateMode};
pub use source::{CompilationDatabaseInfo, CompileCommand, Source, Sources};
pub use watch_table::WatchModes;
