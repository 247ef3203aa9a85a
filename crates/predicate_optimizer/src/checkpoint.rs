//! Durable progress tracking for long batch runs.
//!
//! The manager owns the checkpoint file exclusively; everything else in
//! the core hands it plain values. A missing or corrupt file degrades to a
//! fresh session, and a failed save is logged without aborting the run —
//! the most an interruption can lose is the in-flight unit.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    /// No prior checkpoint found, or the load failed.
    Fresh,
    /// Valid prior state restored from disk.
    Loaded,
    /// Terminal; reached only through `clear` after a successful run.
    Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub processed_repositories: BTreeSet<String>,
    pub suggested_new_indexes: Vec<String>,
    pub suggested_multi_column_indexes: Vec<String>,
    pub modified_files: BTreeSet<String>,
}

impl CheckpointState {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            start_time: now,
            last_update: now,
            processed_repositories: BTreeSet::new(),
            suggested_new_indexes: Vec::new(),
            suggested_multi_column_indexes: Vec::new(),
            modified_files: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    state: CheckpointState,
    phase: CheckpointPhase,
    load_result: Option<bool>,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: CheckpointState::fresh(),
            phase: CheckpointPhase::Fresh,
            load_result: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> CheckpointPhase {
        self.phase
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Restore prior progress if a checkpoint file exists. Idempotent: the
    /// first call reads the disk and caches the outcome, later calls
    /// return the cached result without re-reading. Returns whether any
    /// prior progress existed.
    pub fn load(&mut self) -> bool {
        if let Some(result) = self.load_result {
            return result;
        }
        let result = match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<CheckpointState>(&contents) {
                Ok(state) => {
                    debug!(
                        "resuming session {} with {} processed units",
                        state.session_id,
                        state.processed_repositories.len()
                    );
                    self.state = state;
                    self.phase = CheckpointPhase::Loaded;
                    true
                }
                Err(error) => {
                    warn!(
                        "checkpoint {} is corrupt ({error}), starting fresh",
                        self.path.display()
                    );
                    false
                }
            },
            Err(_) => false,
        };
        self.load_result = Some(result);
        result
    }

    pub fn is_processed(&self, unit_id: &str) -> bool {
        self.state.processed_repositories.contains(unit_id)
    }

    pub fn mark_processed(&mut self, unit_id: &str) {
        self.state.processed_repositories.insert(unit_id.to_string());
    }

    pub fn mark_modified(&mut self, file: &str) {
        self.state.modified_files.insert(file.to_string());
    }

    pub fn record_single_column_index(&mut self, key: &str) {
        if !self.state.suggested_new_indexes.iter().any(|k| k == key) {
            self.state.suggested_new_indexes.push(key.to_string());
        }
    }

    pub fn record_multi_column_index(&mut self, key: &str) {
        if !self
            .state
            .suggested_multi_column_indexes
            .iter()
            .any(|k| k == key)
        {
            self.state
                .suggested_multi_column_indexes
                .push(key.to_string());
        }
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    /// Persist the full current state. A failed save is logged and the run
    /// continues; progress since the last successful save is simply not
    /// durable yet.
    pub fn save(&mut self) {
        self.state.last_update = Utc::now();
        let serialized = match serde_json::to_string_pretty(&self.state) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!("could not serialize checkpoint: {error}");
                return;
            }
        };
        if let Err(error) = fs::write(&self.path, serialized) {
            warn!(
                "could not persist checkpoint to {}: {error}",
                self.path.display()
            );
        }
    }

    /// Delete the persisted file and reset in-memory state. Called only
    /// after the run finished every unit without fatal error; the next use
    /// of this path starts fresh.
    pub fn clear(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "could not remove checkpoint {}: {error}",
                    self.path.display()
                );
            }
        }
        self.state = CheckpointState::fresh();
        self.phase = CheckpointPhase::Cleared;
        self.load_result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_checkpoint(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("predicate-optimizer-{}", std::process::id()));
        fs::create_dir_all(&path).expect("create temp dir");
        path.push(name);
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_file_starts_fresh() {
        let mut manager = CheckpointManager::new(temp_checkpoint("missing.json"));
        assert!(!manager.load());
        assert_eq!(manager.phase(), CheckpointPhase::Fresh);
    }

    #[test]
    fn corrupt_file_degrades_to_fresh_instead_of_erroring() {
        let path = temp_checkpoint("corrupt.json");
        fs::write(&path, "{not json").expect("write");
        let mut manager = CheckpointManager::new(&path);
        assert!(!manager.load());
        assert_eq!(manager.phase(), CheckpointPhase::Fresh);
    }

    #[test]
    fn interrupted_run_resumes_where_it_stopped() {
        let path = temp_checkpoint("resume.json");

        let mut first = CheckpointManager::new(&path);
        assert!(!first.load());
        first.mark_processed("U1");
        first.save();
        first.mark_processed("U2");
        first.save();
        // Crash here: U3 was never saved.

        let mut second = CheckpointManager::new(&path);
        assert!(second.load());
        assert_eq!(second.phase(), CheckpointPhase::Loaded);
        assert!(second.is_processed("U1"));
        assert!(second.is_processed("U2"));
        assert!(!second.is_processed("U3"));
        assert_eq!(second.session_id(), first.session_id());
    }

    #[test]
    fn load_is_idempotent_and_cached() {
        let path = temp_checkpoint("idempotent.json");
        let mut writer = CheckpointManager::new(&path);
        writer.mark_processed("U1");
        writer.save();

        let mut manager = CheckpointManager::new(&path);
        assert!(manager.load());
        // A second load must not re-read the disk; deleting the file
        // underneath makes a re-read observable.
        fs::remove_file(&path).expect("remove");
        assert!(manager.load());
        assert!(manager.is_processed("U1"));
    }

    #[test]
    fn unknown_fields_on_disk_are_ignored() {
        let path = temp_checkpoint("forward.json");
        let mut writer = CheckpointManager::new(&path);
        writer.mark_processed("U1");
        writer.save();

        let mut document: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        document["futureField"] = serde_json::json!({"version": 2});
        fs::write(&path, document.to_string()).expect("write");

        let mut manager = CheckpointManager::new(&path);
        assert!(manager.load());
        assert!(manager.is_processed("U1"));
    }

    #[test]
    fn clear_removes_the_file_and_resets_state() {
        let path = temp_checkpoint("clear.json");
        let mut manager = CheckpointManager::new(&path);
        manager.mark_processed("U1");
        manager.save();
        assert!(path.exists());

        manager.clear();
        assert!(!path.exists());
        assert_eq!(manager.phase(), CheckpointPhase::Cleared);
        assert!(!manager.is_processed("U1"));

        let mut next = CheckpointManager::new(&path);
        assert!(!next.load());
    }

    #[test]
    fn suggestion_sets_grow_monotonically_and_deduplicate() {
        let path = temp_checkpoint("suggestions.json");
        let mut manager = CheckpointManager::new(&path);
        manager.record_single_column_index("orders|status");
        manager.record_single_column_index("orders|status");
        manager.record_multi_column_index("orders|status,id");
        assert_eq!(manager.state().suggested_new_indexes, vec!["orders|status"]);
        assert_eq!(
            manager.state().suggested_multi_column_indexes,
            vec!["orders|status,id"]
        );
    }
}
