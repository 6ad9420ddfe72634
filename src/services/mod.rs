//! Services module - the pieces the orchestrator drives.
//!
//! None of these know about the build loop itself; they take explicit inputs and
//! return typed results so they can be tested on their own.
//!
//! # Components
//!
//! - [`InstallExecutor`] / [`WeiduInstaller`]: run one install step, classify the
//!   outcome with an [`OutputClassifier`], apply the retry policy
//! - [`HintCache`]: learned per-mod metadata and the `populate-mod-index` scan
//! - [`InstalledMods`]: what `weidu.log` says is already installed
//! - [`game_dirs`]: game alias to install directory resolution
//! - [`game_files`]: `.tp2` lookup, mod staging and `weidu.conf`
//!
//! # Installer contract
//!
//! WeiDU is run once per component with `--force-install-list <n>`. Exit code 0 is
//! success, 3 is "installed with warnings", anything else is judged by the marker
//! table (see [`markers`]). A mod found installed with another version or component
//! set is first removed with `--uninstall`, classified the same way.

pub mod game_dirs;
pub mod game_files;
pub mod hint_cache;
pub mod installer;
pub mod markers;
pub mod weidu_log;

pub use game_dirs::{canonical_game_key, resolve_game_dir};
pub use hint_cache::{HintCache, HintCacheError, HintExtractor, Tp2HintExtractor};
pub use installer::{
    InstallExecutor, InstallRequest, Installer, InstallerError, InstallerRun, WeiduInstaller,
};
pub use markers::{Classification, MarkerError, MarkerTable, Outcome, OutputClassifier};
pub use weidu_log::{InstalledMod, InstalledMods, UNVERSIONED_MOD_MARKER, weidu_log_to_build_file};
