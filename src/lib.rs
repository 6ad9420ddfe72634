// Jenga - resumable WeiDU mod builds for Infinity Engine games
//
// This is the library crate containing the build model, the install services and
// the orchestrator. The binary crate (main.rs) provides the CLI entry point.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::BuildError;
pub use models::{Plan, ToolConfig};
pub use orchestrator::{BuildPhase, Orchestrator, PauseDecision, PauseReason};
pub use state::{StateStore, StepStatus};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
