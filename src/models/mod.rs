//! Data models for builds.
//!
//! - [`BuildFile`]: the build file as written, JSON or YAML
//! - [`Plan`]: the validated build with its ordered [`InstallStep`]s and fingerprint
//! - [`HintRecord`]: learned metadata about one mod
//! - [`ToolConfig`]: tool-wide settings from `cfg.yaml` and the environment

pub mod build;
pub mod config;
pub mod hint;
pub mod plan;

pub use build::{BuildFile, BuildFileConfig, BuildFileFormat, ComponentEntry, InstallList, ModEntry};
pub use config::{PlanDefaults, ToolConfig};
pub use hint::{HINT_FILE_NAME, HintRecord};
pub use plan::{BuildConfig, InstallStep, Plan, ResolvedMod};
