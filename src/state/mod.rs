// Build state persistence
//
// This module provides the StateStore, which owns the durable progress of one build
// and flushes it to disk after every change.

use crate::error::BuildError;
use crate::models::Plan;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use thiserror::Error;

/// Version of the state file layout.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// File name prefix of state files discovered by [`StateStore::find_latest`].
pub const STATE_FILE_PREFIX: &str = "jenga_state_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Success,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

/// Persisted progress of one install step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "mod")]
    pub mod_name: String,
    pub version: String,
    pub component: u32,
    pub status: StepStatus,
    #[serde(default)]
    pub retries: u32,
    /// Set when the step succeeded with installer warnings.
    #[serde(default)]
    pub warnings: bool,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// On-disk state file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub format_version: u32,
    pub build_name: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

/// Terminal result of a step, as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Installed { warnings: bool },
    Skipped,
    Failed,
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize build state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Step {index} cannot change state (currently {from:?}, attempt open: {open})")]
    InvalidTransition {
        index: usize,
        from: StepStatus,
        open: bool,
    },

    #[error("Step index {0} is out of range")]
    IndexOutOfRange(usize),
}

/// Durable progress for one build.
///
/// Every mutation is flushed before the method returns: the state is written to a
/// sibling temp file, synced, and renamed over the state file.
///
/// A step changes only while an attempt is open ([`begin`](Self::begin)), and an
/// attempt can only be opened on a step that still needs one: Pending, or Failed
/// with retries remaining under the current policy.
#[derive(Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
    state: BuildState,
    max_retries: u32,
    open_step: Option<usize>,
}

impl StateStore {
    /// Start fresh progress for `plan` with every step Pending, and write it.
    pub fn create(path: impl Into<Utf8PathBuf>, plan: &Plan) -> Result<Self, StateError> {
        let now = Utc::now();
        let steps = plan
            .steps
            .iter()
            .map(|s| StepRecord {
                mod_name: s.mod_name.clone(),
                version: s.version.clone(),
                component: s.component,
                status: StepStatus::Pending,
                retries: 0,
                warnings: false,
                finished_at: None,
            })
            .collect();

        let store = Self {
            path: path.into(),
            state: BuildState {
                format_version: STATE_FORMAT_VERSION,
                build_name: plan.config.build_name.clone(),
                fingerprint: plan.fingerprint().to_string(),
                created_at: now,
                updated_at: now,
                steps,
            },
            max_retries: plan.config.num_retries,
            open_step: None,
        };
        store.flush()?;

        tracing::info!("Created state file {}", store.path);
        Ok(store)
    }

    /// Load progress written for `plan`.
    ///
    /// Fails with [`BuildError::ResumeMismatch`] when the file belongs to another plan
    /// and [`BuildError::StateFileCorrupt`] when it cannot be read or is inconsistent.
    pub fn load(path: impl Into<Utf8PathBuf>, plan: &Plan) -> Result<Self, BuildError> {
        let path = path.into();
        let state = read_state(&path)?;

        if state.fingerprint != plan.fingerprint() {
            return Err(BuildError::ResumeMismatch {
                path,
                expected: plan.fingerprint().to_string(),
                found: state.fingerprint,
            });
        }

        if state.steps.len() != plan.steps.len() {
            return Err(BuildError::corrupt(
                path,
                format!(
                    "{} steps recorded, build plan has {}",
                    state.steps.len(),
                    plan.steps.len()
                ),
            ));
        }

        let mismatch = state.steps.iter().zip(&plan.steps).position(|(r, s)| {
            r.mod_name != s.mod_name || r.version != s.version || r.component != s.component
        });
        if let Some(index) = mismatch {
            return Err(BuildError::corrupt(
                path,
                format!("step {} does not match the build plan", index),
            ));
        }

        let done = state.steps.iter().filter(|r| r.status.is_done()).count();
        tracing::info!(
            "Loaded state file {}: {}/{} steps done",
            path,
            done,
            state.steps.len()
        );

        Ok(Self {
            path,
            state,
            max_retries: plan.config.num_retries,
            open_step: None,
        })
    }

    /// Default state file for a build file: `<build file>.state`.
    pub fn default_path_for(build_file: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.state", build_file))
    }

    /// Most recently updated state file in `dir` written for `plan`.
    ///
    /// Considers `jenga_state_<build_name>*.json` and `*.state` files. Unreadable
    /// and foreign files are ignored.
    pub fn find_latest(dir: &Utf8Path, plan: &Plan) -> Option<Utf8PathBuf> {
        let prefix = format!("{}{}", STATE_FILE_PREFIX, plan.config.build_name);
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot scan {} for state files: {}", dir, e);
                return None;
            }
        };

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| {
                let name = path.file_name().unwrap_or_default();
                (name.starts_with(&prefix) && name.ends_with(".json")) || name.ends_with(".state")
            })
            .filter_map(|path| {
                let state = read_state(&path).ok()?;
                (state.fingerprint == plan.fingerprint()).then_some((state.updated_at, path))
            })
            .max_by_key(|(updated_at, _)| *updated_at)
            .map(|(_, path)| path)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.steps.is_empty()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn status(&self, index: usize) -> Option<StepStatus> {
        self.state.steps.get(index).map(|r| r.status)
    }

    pub fn retries(&self, index: usize) -> u32 {
        self.state.steps.get(index).map_or(0, |r| r.retries)
    }

    /// Whether the step should be attempted: Pending, or Failed with retries left.
    pub fn needs_attempt(&self, index: usize) -> bool {
        match self.state.steps.get(index) {
            Some(r) => match r.status {
                StepStatus::Pending => true,
                StepStatus::Failed => r.retries < self.max_retries,
                StepStatus::Success | StepStatus::Skipped => false,
            },
            None => false,
        }
    }

    /// True when no step needs another attempt.
    pub fn is_complete(&self) -> bool {
        (0..self.len()).all(|i| !self.needs_attempt(i))
    }

    /// Open an attempt on a step. Required before recording retries or outcomes.
    pub fn begin(&mut self, index: usize) -> Result<(), StateError> {
        let status = self.status(index).ok_or(StateError::IndexOutOfRange(index))?;
        if self.open_step == Some(index) {
            return Ok(());
        }
        if self.open_step.is_some() || !self.needs_attempt(index) {
            return Err(StateError::InvalidTransition {
                index,
                from: status,
                open: self.open_step.is_some(),
            });
        }
        self.open_step = Some(index);
        Ok(())
    }

    /// Count a consumed retry and flush.
    pub fn record_retry(&mut self, index: usize) -> Result<u32, StateError> {
        self.ensure_open(index)?;
        let record = &mut self.state.steps[index];
        record.retries += 1;
        let retries = record.retries;
        self.touch_and_flush()?;
        Ok(retries)
    }

    /// Record a step's terminal outcome, close the attempt, and flush.
    pub fn record_outcome(&mut self, index: usize, outcome: StepOutcome) -> Result<(), StateError> {
        self.ensure_open(index)?;
        let now = Utc::now();
        let record = &mut self.state.steps[index];
        match outcome {
            StepOutcome::Installed { warnings } => {
                record.status = StepStatus::Success;
                record.warnings = warnings;
            }
            StepOutcome::Skipped => record.status = StepStatus::Skipped,
            StepOutcome::Failed => record.status = StepStatus::Failed,
        }
        record.finished_at = Some(now);
        self.open_step = None;
        self.touch_and_flush()
    }

    fn ensure_open(&self, index: usize) -> Result<(), StateError> {
        let status = self.status(index).ok_or(StateError::IndexOutOfRange(index))?;
        if self.open_step != Some(index) {
            return Err(StateError::InvalidTransition {
                index,
                from: status,
                open: false,
            });
        }
        Ok(())
    }

    fn touch_and_flush(&mut self) -> Result<(), StateError> {
        self.state.updated_at = Utc::now();
        self.flush()
    }

    /// Write the full state atomically.
    fn flush(&self) -> Result<(), StateError> {
        let content = serde_json::to_vec_pretty(&self.state)?;
        let temp_path = Utf8PathBuf::from(format!("{}.tmp", self.path));
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut file = fs::File::create(&temp_path).map_err(write_err)?;
        file.write_all(&content).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(&temp_path, &self.path).map_err(write_err)?;

        tracing::trace!("Flushed state to {}", self.path);
        Ok(())
    }
}

fn read_state(path: &Utf8Path) -> Result<BuildState, BuildError> {
    let content = fs::read_to_string(path)
        .map_err(|e| BuildError::corrupt(path, format!("cannot read: {}", e)))?;
    let state: BuildState = serde_json::from_str(&content)
        .map_err(|e| BuildError::corrupt(path, format!("invalid JSON: {}", e)))?;
    if state.format_version != STATE_FORMAT_VERSION {
        return Err(BuildError::corrupt(
            path,
            format!("unsupported state format version {}", state.format_version),
        ));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildFileFormat, PlanDefaults};
    use tempfile::TempDir;

    fn plan(num_retries: u32) -> Plan {
        let json = format!(
            r#"{{"config": {{"build_name": "test", "num_retries": {}}},
                "mods": [{{"mod": "a", "version": "1", "language_int": 0, "install_list": [0, 1]}}]}}"#,
            num_retries
        );
        Plan::load(json.as_bytes(), BuildFileFormat::Json, &PlanDefaults::default(), None).unwrap()
    }

    fn state_path(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp.path().join("build.json.state")).unwrap()
    }

    #[test]
    fn test_create_writes_all_pending() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::create(state_path(&temp), &plan(0)).unwrap();

        assert!(store.path().exists());
        assert_eq!(store.len(), 2);
        assert!((0..2).all(|i| store.status(i) == Some(StepStatus::Pending)));
        assert!(!store.path().with_extension("state.tmp").exists());
    }

    #[test]
    fn test_outcome_requires_open_attempt() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::create(state_path(&temp), &plan(0)).unwrap();

        let err = store
            .record_outcome(0, StepOutcome::Installed { warnings: false })
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { index: 0, .. }));
    }

    #[test]
    fn test_success_is_final() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::create(state_path(&temp), &plan(3)).unwrap();

        store.begin(0).unwrap();
        store
            .record_outcome(0, StepOutcome::Installed { warnings: true })
            .unwrap();

        assert_eq!(store.status(0), Some(StepStatus::Success));
        assert!(store.state().steps[0].warnings);
        assert!(store.state().steps[0].finished_at.is_some());
        assert!(store.begin(0).is_err());
    }

    #[test]
    fn test_failed_with_retries_left_can_reopen() {
        let temp = TempDir::new().unwrap();
        let path = state_path(&temp);
        let mut store = StateStore::create(&path, &plan(0)).unwrap();
        store.begin(0).unwrap();
        store.record_outcome(0, StepOutcome::Failed).unwrap();
        assert!(!store.needs_attempt(0));

        // Same build, more retries allowed
        let mut store = StateStore::load(&path, &plan(2)).unwrap();
        assert!(store.needs_attempt(0));
        store.begin(0).unwrap();
        assert_eq!(store.record_retry(0).unwrap(), 1);
    }

    #[test]
    fn test_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = state_path(&temp);
        let mut store = StateStore::create(&path, &plan(0)).unwrap();
        store.begin(1).unwrap();
        store.record_outcome(1, StepOutcome::Skipped).unwrap();

        let loaded = StateStore::load(&path, &plan(0)).unwrap();
        assert_eq!(loaded.status(0), Some(StepStatus::Pending));
        assert_eq!(loaded.status(1), Some(StepStatus::Skipped));
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = state_path(&temp);
        fs::write(&path, "{ not json").unwrap();

        let err = StateStore::load(&path, &plan(0)).unwrap_err();
        assert!(matches!(err, BuildError::StateFileCorrupt { .. }));
    }

    #[test]
    fn test_default_path_for() {
        assert_eq!(
            StateStore::default_path_for(Utf8Path::new("builds/eet.json")),
            Utf8PathBuf::from("builds/eet.json.state")
        );
    }
}
