//! Atomic, versioned persistence for sprint state.
//!
//! `save` writes the full state to a temporary file beside the target,
//! forces it durable, then atomically renames it over the target. A reader
//! never observes a partial write. `load` refuses any schema version other
//! than the engine's own - state is deleted and rebuilt, never migrated.

use super::SprintState;
use crate::errors::EngineError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Bump whenever the on-disk shape of `SprintState` changes.
pub const STATE_SCHEMA_VERSION: u32 = 2;

/// Persists one sprint's state at a fixed path.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically persist the state: temp file → fsync → rename.
    pub fn save(&self, state: &SprintState) -> Result<(), EngineError> {
        let mut on_disk = state.clone();
        on_disk.version = STATE_SCHEMA_VERSION;

        let json = serde_json::to_string_pretty(&on_disk)
            .map_err(|e| EngineError::Other(anyhow::anyhow!("Failed to serialize state: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| EngineError::StatePersist {
                path: self.path.clone(),
                source,
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let write_result = (|| {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        write_result.map_err(|source| EngineError::StatePersist {
            path: self.path.clone(),
            source,
        })
    }

    /// Load and verify the state. A version mismatch is fatal and carries
    /// an explicit remediation message; it is never silently coerced.
    pub fn load(&self) -> Result<SprintState, EngineError> {
        let content = fs::read_to_string(&self.path).map_err(|source| EngineError::StatePersist {
            path: self.path.clone(),
            source,
        })?;

        // Probe the version tag before committing to the full schema, so a
        // mismatched file reports its version instead of a parse error.
        let probe: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            EngineError::Other(anyhow::anyhow!(
                "Sprint state file {} is not valid JSON: {}",
                self.path.display(),
                e
            ))
        })?;
        let found = probe
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if found != STATE_SCHEMA_VERSION {
            return Err(EngineError::StateVersion {
                path: self.path.clone(),
                found,
                expected: STATE_SCHEMA_VERSION,
            });
        }

        serde_json::from_str(&content).map_err(|e| {
            EngineError::Other(anyhow::anyhow!(
                "Failed to parse sprint state {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprint::{PlannedIssue, SprintPlan};
    use tempfile::tempdir;

    fn sample_state() -> SprintState {
        let plan = SprintPlan {
            issues: vec![PlannedIssue::new(12, "Fix login", "body text")],
            execution_groups: vec![vec![12]],
        };
        SprintState::new(3, "auth", plan)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("sprint-auth-3.json"));

        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("docs/sprints/sprint-auth-3.json"));
        store.save(&sample_state()).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-auth-3.json");
        let store = StateStore::new(path.clone());
        store.save(&sample_state()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-auth-3.json");
        let store = StateStore::new(path.clone());

        let mut state = sample_state();
        store.save(&state).unwrap();

        // Rewrite the version tag on disk to an old schema.
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["version"] = serde_json::json!(1);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        match store.load() {
            Err(EngineError::StateVersion { found, expected, .. }) => {
                assert_eq!(found, 1);
                assert_eq!(expected, STATE_SCHEMA_VERSION);
            }
            other => panic!("Expected StateVersion error, got {:?}", other.map(|_| ())),
        }

        // The mismatch must also hold for states saved with a stale tag in
        // memory: save always stamps the current schema version.
        state.version = 1;
        store.save(&state).unwrap();
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_load_missing_version_is_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-auth-3.json");
        std::fs::write(&path, r#"{"sprint_number": 3}"#).unwrap();

        let store = StateStore::new(path);
        assert!(matches!(
            store.load(),
            Err(EngineError::StateVersion { found: 0, .. })
        ));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_err());
    }
}
