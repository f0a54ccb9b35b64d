//! Compilable sources and the compilation database surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crux_core::{FileId, SourceKey};
use serde::{Deserialize, Serialize};

/// One compilable translation unit: path + compile arguments + compiler.
///
/// The key is a content hash over `(path, args, compiler)` and identifies an
/// indexer job slot; a file compiled under two argument sets yields two
/// sources with distinct keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Source {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub compiler: String,
    key: SourceKey,
}

impl Source {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>, compiler: impl Into<String>) -> Self {
        let path = path.into();
        let compiler = compiler.into();
        let key = source_key(&path, &args, &compiler);
        Self {
            path,
            args,
            compiler,
            key,
        }
    }

    #[inline]
    pub fn key(&self) -> SourceKey {
        self.key
    }
}

fn source_key(path: &Path, args: &[String], compiler: &str) -> SourceKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&[0]);
    for arg in args {
        hasher.update(arg.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(compiler.as_bytes());
    let hash = hasher.finalize();
    let raw = u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("hash slice"));
    // Zero is the invalid sentinel; remap the (astronomically unlikely) hit.
    SourceKey::from_raw(raw.max(1))
}

/// All sources of a project, keyed by file id.
pub type Sources = BTreeMap<FileId, Vec<Source>>;

/// Where the project's `compile_commands.json` came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationDatabaseInfo {
    pub dir: PathBuf,
    pub last_modified_millis: u64,
    pub path_environment: Vec<String>,
    pub index_flags: u32,
}

impl CompilationDatabaseInfo {
    pub fn file_path(&self) -> PathBuf {
        self.dir.join("compile_commands.json")
    }
}

/// One entry of a `compile_commands.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: PathBuf,
    pub file: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl CompileCommand {
    /// The effective argv: `arguments` when present, otherwise the
    /// whitespace-split `command` string.
    pub fn argv(&self) -> Vec<String> {
        if !self.arguments.is_empty() {
            return self.arguments.clone();
        }
        self.command
            .as_deref()
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The absolute path of the compiled file.
    pub fn absolute_file(&self) -> PathBuf {
        if self.file.is_absolute() {
            self.file.clone()
        } else {
            self.directory.join(&self.file)
        }
    }

    /// Builds the [`Source`] this entry describes: argv[0] is the compiler,
    /// the rest are the compile arguments.
    pub fn to_source(&self) -> Option<Source> {
        let argv = self.argv();
        let (compiler, args) = argv.split_first()?;
        Some(Source::new(
            self.absolute_file(),
            args.to_vec(),
            compiler.clone(),
        ))
    }
}

pub fn parse_compile_commands(json: &str) -> Result<Vec<CompileCommand>, serde_json::Error> {
    serde_json::from_str(json)
}
