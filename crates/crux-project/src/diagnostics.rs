//! Diagnostics and fix-its reported by indexer jobs.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use crux_core::{FileId, Location};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Note,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Location,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FixIt {
    pub line: u32,
    pub column: u32,
    pub length: u32,
    pub replacement: String,
}

pub type Diagnostics = BTreeMap<FileId, Vec<Diagnostic>>;

/// Diff-merges `incoming` into `current` over the files `visited` by a job:
/// unchanged files keep their entries, changed files are replaced, visited
/// files with no incoming diagnostics are cleared. Returns the file ids whose
/// entries changed.
pub fn merge_diagnostics(
    current: &mut Diagnostics,
    mut incoming: Diagnostics,
    visited: &HashSet<FileId>,
) -> Vec<FileId> {
    let mut changed = Vec::new();
    for &file in visited {
        match incoming.remove(&file) {
            Some(entries) => {
                if current.get(&file) != Some(&entries) {
                    current.insert(file, entries);
                    changed.push(file);
                }
            }
            None => {
                if current.remove(&file).is_some() {
                    changed.push(file);
                }
            }
        }
    }
    // Diagnostics for files outside the visited set (e.g. a header claimed
    // by a concurrent job) are still applied.
    for (file, entries) in incoming {
        if current.get(&file) != Some(&entries) {
            current.insert(file, entries);
            changed.push(file);
        }
    }
    changed.sort();
    changed
}

/// Replaces fix-its for every visited file; visited files absent from
/// `incoming` lose their entries.
pub fn merge_fix_its(
    current: &mut BTreeMap<FileId, Vec<FixIt>>,
    mut incoming: BTreeMap<FileId, Vec<FixIt>>,
    visited: &HashSet<FileId>,
) {
    for &file in visited {
        match incoming.remove(&file) {
            Some(entries) if !entries.is_empty() => {
                current.insert(file, entries);
            }
            _ => {
                current.remove(&file);
            }
        }
    }
    for (file, entries) in incoming {
        if entries.is_empty() {
            current.remove(&file);
        } else {
            current.insert(file, entries);
        }
    }
}

/// Renders fix-its the way the query surface reports them.
pub fn format_fix_its(fix_its: &[FixIt]) -> String {
    let mut out = String::new();
    for fix in fix_its {
        let _ = writeln!(
            out,
            "{}:{} {} -> \"{}\"",
            fix.line, fix.column, fix.length, fix.replacement
        );
    }
    out
}
