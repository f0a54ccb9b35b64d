use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one project.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Where file maps and persisted state live; defaults to
    /// `<root>/.crux` when unset.
    pub data_dir: Option<PathBuf>,

    /// Debounce applied between a dirty signal and job submission.
    pub dirty_debounce_millis: u64,

    /// Maximum number of file maps held open by one query scope.
    pub max_open_file_maps: usize,

    /// Save persisted state whenever the last active job finishes and no
    /// dirty timer is armed.
    pub save_on_idle: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            dirty_debounce_millis: 100,
            max_open_file_maps: 256,
            save_on_idle: true,
        }
    }
}

impl ProjectConfig {
    pub fn dirty_debounce(&self) -> Duration {
        Duration::from_millis(self.dirty_debounce_millis)
    }
}
