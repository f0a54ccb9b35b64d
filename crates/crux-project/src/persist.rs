//! Persisted project state.
//!
//! Two artifacts live in the project data dir, each written as a
//! `crux-storage` archive (`.bin`, the fast path) plus a JSON debug copy:
//!
//! - `sources.bin` / `sources.json`: the sources table and the compilation
//!   database info.
//! - `project.bin` / `project.json`: path table, dependency graph (forward
//!   edges only; reverse links are recomputed on load), visited files, the
//!   pending dirty set, and per-file mtime stamps for the init-time
//!   staleness check.
//!
//! A schema or version mismatch on load is treated as a cold start, never
//! an error: the project re-indexes from the compilation database.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crux_core::{FileId, SourceKey};
use crux_storage::{write_archive_atomic, ArtifactKind, PersistedArchive};
use crux_vfs::PathRegistry;

use crate::project::ProjectError;
use crate::source::{CompilationDatabaseInfo, Source, Sources};

pub const SOURCES_STATE_SCHEMA_VERSION: u32 = 1;
pub const PROJECT_STATE_SCHEMA_VERSION: u32 = 1;

pub const SOURCES_STATE_FILENAME: &str = "sources.bin";
pub const PROJECT_STATE_FILENAME: &str = "project.bin";

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct SourceRecord {
    pub file_id: u32,
    pub path: String,
    pub args: Vec<String>,
    pub compiler: String,
    pub key: u64,
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct CompilationDatabaseRecord {
    pub dir: String,
    pub last_modified_millis: u64,
    pub path_environment: Vec<String>,
    pub index_flags: u32,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct SourcesState {
    pub sources: Vec<SourceRecord>,
    pub compilation_database: Option<CompilationDatabaseRecord>,
}

impl SourcesState {
    pub fn from_parts(sources: &Sources, comp_db: Option<&CompilationDatabaseInfo>) -> Self {
        let mut records = Vec::new();
        for (&file_id, list) in sources {
            for source in list {
                records.push(SourceRecord {
                    file_id: file_id.to_raw(),
                    path: source.path.to_string_lossy().into_owned(),
                    args: source.args.clone(),
                    compiler: source.compiler.clone(),
                    key: source.key().to_raw(),
                });
            }
        }
        Self {
            sources: records,
            compilation_database: comp_db.map(|info| CompilationDatabaseRecord {
                dir: info.dir.to_string_lossy().into_owned(),
                last_modified_millis: info.last_modified_millis,
                path_environment: info.path_environment.clone(),
                index_flags: info.index_flags,
            }),
        }
    }

    /// Rebuilds the in-memory tables, restoring file ids into `registry`.
    pub fn into_parts(
        self,
        registry: &PathRegistry,
    ) -> (Sources, Option<CompilationDatabaseInfo>) {
        let mut sources = Sources::new();
        for record in self.sources {
            let file_id = FileId::from_raw(record.file_id);
            registry.restore_file(&record.path, file_id);
            sources
                .entry(file_id)
                .or_default()
                .push(Source::new(record.path, record.args, record.compiler));
        }
        let comp_db = self.compilation_database.map(|record| CompilationDatabaseInfo {
            dir: PathBuf::from(record.dir),
            last_modified_millis: record.last_modified_millis,
            path_environment: record.path_environment,
            index_flags: record.index_flags,
        });
        (sources, comp_db)
    }

    /// True when some persisted source key no longer matches its recomputed
    /// key (args/compiler hashing changed); callers should re-index.
    pub fn keys_consistent(&self) -> bool {
        self.sources.iter().all(|record| {
            Source::new(
                record.path.clone(),
                record.args.clone(),
                record.compiler.clone(),
            )
            .key()
                == SourceKey::from_raw(record.key)
        })
    }
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct PathRecord {
    pub file_id: u32,
    pub path: String,
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct DependencyRecord {
    pub file_id: u32,
    pub includes: Vec<u32>,
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct StampRecord {
    pub file_id: u32,
    pub last_modified_millis: u64,
}

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[archive(check_bytes)]
pub struct ProjectState {
    pub paths: Vec<PathRecord>,
    pub dependencies: Vec<DependencyRecord>,
    pub visited: Vec<PathRecord>,
    pub dirty: Vec<u32>,
    pub stamps: Vec<StampRecord>,
}

pub(crate) fn save_state<T>(
    data_dir: &Path,
    filename: &str,
    kind: ArtifactKind,
    schema: u32,
    state: &T,
) -> Result<(), ProjectError>
where
    T: rkyv::Archive
        + rkyv::Serialize<rkyv::ser::serializers::AllocSerializer<256>>
        + Serialize,
{
    let bin_path = data_dir.join(filename);
    write_archive_atomic(&bin_path, kind, schema, state)?;

    // Keep a JSON copy around for debugging / human inspection.
    let json_path = bin_path.with_extension("json");
    let tmp = json_path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, state)?;
        file.flush()?;
    }
    fs::rename(&tmp, &json_path)?;
    Ok(())
}

pub(crate) fn load_state<T>(
    data_dir: &Path,
    filename: &str,
    kind: ArtifactKind,
    schema: u32,
) -> Option<T>
where
    T: rkyv::Archive + for<'de> Deserialize<'de>,
    rkyv::Archived<T>: crux_storage::CheckableArchived
        + rkyv::Deserialize<T, rkyv::de::deserializers::SharedDeserializeMap>,
{
    let bin_path = data_dir.join(filename);

    // Prefer the binary state (mmap + rkyv validation). If anything goes
    // wrong, fall back to JSON for robustness; any remaining failure is a
    // cold start.
    match PersistedArchive::<T>::open_optional(&bin_path, kind, schema) {
        Ok(Some(archive)) => match archive.to_owned() {
            Ok(value) => return Some(value),
            Err(err) => {
                tracing::warn!(
                    target = "crux.project",
                    path = %bin_path.display(),
                    error = %err,
                    "failed to deserialize persisted state; trying JSON copy"
                );
            }
        },
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(
                target = "crux.project",
                path = %bin_path.display(),
                error = %err,
                "failed to open persisted state; trying JSON copy"
            );
        }
    }

    let json_path = bin_path.with_extension("json");
    let file = fs::File::open(json_path).ok()?;
    serde_json::from_reader(file).ok()
}

/// Static helper: reads a persisted sources file directly, for external
/// restore tooling. Unlike project init, failures are reported.
pub fn read_sources(path: &Path) -> Result<SourcesState, ProjectError> {
    let archive = PersistedArchive::<SourcesState>::open(
        path,
        ArtifactKind::SourcesState,
        SOURCES_STATE_SCHEMA_VERSION,
    )?;
    Ok(archive.to_owned()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sources_state_round_trips_parts() {
        let registry = PathRegistry::new();
        let a = registry.insert_file("/src/a.c");
        let mut sources = Sources::new();
        sources
            .entry(a)
            .or_default()
            .push(Source::new("/src/a.c", vec!["-O2".into()], "clang"));

        let info = CompilationDatabaseInfo {
            dir: "/build".into(),
            last_modified_millis: 42,
            path_environment: vec!["/usr/bin".into()],
            index_flags: 3,
        };

        let state = SourcesState::from_parts(&sources, Some(&info));
        assert!(state.keys_consistent());

        let restored_registry = PathRegistry::new();
        let (restored, restored_info) = state.into_parts(&restored_registry);
        assert_eq!(restored, sources);
        assert_eq!(restored_info, Some(info));
        assert_eq!(restored_registry.file_id("/src/a.c"), Some(a));
    }

    #[test]
    fn save_and_load_state_via_bin() {
        let temp = tempfile::tempdir().unwrap();
        let state = ProjectState {
            paths: vec![PathRecord {
                file_id: 1,
                path: "/src/a.c".into(),
            }],
            dependencies: vec![DependencyRecord {
                file_id: 1,
                includes: vec![2, 3],
            }],
            visited: Vec::new(),
            dirty: vec![2],
            stamps: vec![StampRecord {
                file_id: 1,
                last_modified_millis: 1000,
            }],
        };

        save_state(
            temp.path(),
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
            &state,
        )
        .unwrap();

        let loaded: ProjectState = load_state(
            temp.path(),
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
        )
        .expect("state loads");
        assert_eq!(loaded, state);
    }

    #[test]
    fn schema_mismatch_falls_back_to_json_then_cold_start() {
        let temp = tempfile::tempdir().unwrap();
        let state = ProjectState::default();
        save_state(
            temp.path(),
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
            &state,
        )
        .unwrap();

        // The JSON copy still satisfies a mismatched-schema load.
        let loaded: Option<ProjectState> = load_state(
            temp.path(),
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION + 1,
        );
        assert_eq!(loaded, Some(state));

        // With both copies gone, the load is a cold start.
        std::fs::remove_file(temp.path().join(PROJECT_STATE_FILENAME)).unwrap();
        std::fs::remove_file(temp.path().join("project.json")).unwrap();
        let loaded: Option<ProjectState> = load_state(
            temp.path(),
            PROJECT_STATE_FILENAME,
            ArtifactKind::ProjectState,
            PROJECT_STATE_SCHEMA_VERSION,
        );
        assert!(loaded.is_none());
    }

    #[test]
    fn read_sources_reports_failures() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_sources(&temp.path().join(SOURCES_STATE_FILENAME)).is_err());

        let state = SourcesState::default();
        save_state(
            temp.path(),
            SOURCES_STATE_FILENAME,
            ArtifactKind::SourcesState,
            SOURCES_STATE_SCHEMA_VERSION,
            &state,
        )
        .unwrap();
        assert_eq!(
            read_sources(&temp.path().join(SOURCES_STATE_FILENAME)).unwrap(),
            state
        );
    }
}
