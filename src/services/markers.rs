//! Installer output classification.
//!
//! The marker table is plain data: regexes that identify success, warning and error
//! output plus the exit codes the installer uses for "installed with warnings". It
//! ships with WeiDU's markers built in and can be replaced by a `markers.yaml` in the
//! tool config directory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the marker table layout.
pub const MARKER_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerTable {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub success: Vec<String>,

    #[serde(default)]
    pub warning: Vec<String>,

    #[serde(default)]
    pub error: Vec<String>,

    #[serde(default)]
    pub warning_exit_codes: Vec<i32>,
}

fn default_version() -> u32 {
    MARKER_TABLE_VERSION
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self {
            version: MARKER_TABLE_VERSION,
            success: vec!["SUCCESSFULLY INSTALLED".to_string()],
            warning: vec![
                "INSTALLED WITH WARNINGS".to_string(),
                "(?m)^WARNING:".to_string(),
            ],
            error: vec![
                "NOT INSTALLED DUE TO ERRORS".to_string(),
                "(?m)^ERROR".to_string(),
                "FATAL ERROR".to_string(),
                r"(?i)\bparse error\b".to_string(),
            ],
            warning_exit_codes: vec![3],
        }
    }
}

#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("Unsupported marker table version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid {kind} marker '{pattern}': {source}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Classification of one installer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub reason: String,
}

impl Classification {
    pub fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
        }
    }
}

/// Compiled marker table.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    success: Vec<Regex>,
    warning: Vec<Regex>,
    error: Vec<Regex>,
    warning_exit_codes: Vec<i32>,
}

fn compile(kind: &'static str, patterns: &[String]) -> Result<Vec<Regex>, MarkerError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| MarkerError::InvalidPattern {
                kind,
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn first_match<'a>(patterns: &'a [Regex], output: &str) -> Option<&'a Regex> {
    patterns.iter().find(|re| re.is_match(output))
}

impl OutputClassifier {
    pub fn new(table: &MarkerTable) -> Result<Self, MarkerError> {
        if table.version != MARKER_TABLE_VERSION {
            return Err(MarkerError::UnsupportedVersion {
                found: table.version,
                expected: MARKER_TABLE_VERSION,
            });
        }

        Ok(Self {
            success: compile("success", &table.success)?,
            warning: compile("warning", &table.warning)?,
            error: compile("error", &table.error)?,
            warning_exit_codes: table.warning_exit_codes.clone(),
        })
    }

    /// Classify a finished installer run from its exit code and combined output.
    ///
    /// Error markers win over everything, including exit code 0. Anything that
    /// is not positively recognised as success or warning is an error.
    pub fn classify(&self, exit_code: i32, output: &str) -> Classification {
        if let Some(re) = first_match(&self.error, output) {
            return Classification::new(
                Outcome::Error,
                format!("error marker '{}' in output (exit code {})", re.as_str(), exit_code),
            );
        }

        if exit_code == 0 {
            return match first_match(&self.warning, output) {
                Some(re) => Classification::new(
                    Outcome::Warning,
                    format!("warning marker '{}' in output", re.as_str()),
                ),
                None => Classification::new(Outcome::Success, "exit code 0"),
            };
        }

        if self.warning_exit_codes.contains(&exit_code) {
            return Classification::new(
                Outcome::Warning,
                format!("exit code {} means installed with warnings", exit_code),
            );
        }

        if let Some(re) = first_match(&self.success, output) {
            return Classification::new(
                Outcome::Warning,
                format!(
                    "exit code {} but success marker '{}' in output",
                    exit_code,
                    re.as_str()
                ),
            );
        }

        Classification::new(Outcome::Error, format!("exit code {}", exit_code))
    }
}

impl Default for OutputClassifier {
    fn default() -> Self {
        // The built-in table is covered by tests; an invalid pattern here is a bug.
        Self::new(&MarkerTable::default()).expect("built-in marker table must compile")
    }
}
