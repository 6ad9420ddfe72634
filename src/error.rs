//! Build-level error taxonomy.
//!
//! Validation and resume-integrity errors abort before any install step runs and are
//! surfaced directly to the caller. Per-step installer failures never show up here:
//! they are classified into [`Outcome`](crate::services::Outcome) values, retried, and
//! recorded in the state file. Only when the state file itself can no longer be written
//! does a step-level problem escalate into a [`BuildError`].

use crate::state::StateError;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that stop a build before or while it runs.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Malformed or incomplete build file. No state is created.
    #[error("Build file failed schema validation: {0}")]
    SchemaValidation(String),

    /// A required mod field is missing from both the build file and the hint cache.
    #[error("Mod {mod_name} is missing '{field}' and the hint cache cannot supply it")]
    MissingHint { mod_name: String, field: &'static str },

    /// The state file belongs to a different plan than the current build file.
    #[error(
        "State file {path} was written for a different build plan \
         (expected fingerprint {expected}, found {found})"
    )]
    ResumeMismatch {
        path: Utf8PathBuf,
        expected: String,
        found: String,
    },

    /// The state file could not be read or does not parse.
    #[error("State file {path} is unreadable or corrupt: {reason}")]
    StateFileCorrupt { path: Utf8PathBuf, reason: String },

    /// No state file was given and none could be found to resume from.
    #[error("No state file found to resume build '{build_name}' from")]
    StateFileNotFound { build_name: String },

    /// Persisting progress failed; crash safety can no longer be guaranteed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The target game directory could not be determined.
    #[error("Cannot resolve the game directory: {0}")]
    GameDirUnresolved(String),

    /// The orchestrator was asked to do something its current phase does not allow.
    #[error("Invalid build phase transition: {0}")]
    InvalidPhase(String),

    /// A build file or plan could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Create a schema validation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaValidation(msg.into())
    }

    /// Create a state file corruption error
    pub fn corrupt(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::StateFileCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the errors that must be reported before any step executes.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::SchemaValidation(_)
                | Self::MissingHint { .. }
                | Self::ResumeMismatch { .. }
                | Self::StateFileCorrupt { .. }
                | Self::StateFileNotFound { .. }
                | Self::GameDirUnresolved(_)
        )
    }
}
