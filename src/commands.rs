//! Command implementations behind the CLI.
//!
//! Each function wires the library pieces together for one subcommand and
//! reports failures with `anyhow` context. Interaction (pause prompts) is left to
//! the caller through a `decide` callback so these stay testable.

use crate::config::ConfigManager;
use crate::error::BuildError;
use crate::models::{BuildFileFormat, InstallStep, Plan, ToolConfig};
use crate::orchestrator::{BuildPhase, InstallLedger, Orchestrator, PauseDecision, PauseReason};
use crate::services::weidu_log::WEIDU_LOG_FILE_NAME;
use crate::services::{
    HintCache, InstallExecutor, InstalledMods, Installer, Tp2HintExtractor, WeiduInstaller,
    resolve_game_dir, weidu_log_to_build_file,
};
use crate::state::StateStore;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;

/// Exit status when a build is refused before any step ran; the game is untouched.
pub const NOT_STARTED_EXIT_CODE: u8 = 2;

/// Process exit status for a failed command.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BuildError>() {
        Some(e) if e.is_pre_execution() => NOT_STARTED_EXIT_CODE,
        _ => 1,
    }
}

/// Inputs of `run-full-build` and `resume-partial-build`.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub build_file: Utf8PathBuf,
    pub state_file: Option<Utf8PathBuf>,
    pub game_dir: Option<Utf8PathBuf>,
    /// Continue from existing progress instead of starting over.
    pub resume: bool,
}

/// Ledger used when installed-mod detection is off.
struct NothingInstalled;

impl InstallLedger for NothingInstalled {
    fn is_installed(&self, _step: &InstallStep) -> bool {
        false
    }
}

/// Load the plan, resolve the game directory and open the state store.
pub fn prepare_build(
    options: &BuildOptions,
    manager: &ConfigManager,
    tool: &ToolConfig,
) -> Result<(Plan, Utf8PathBuf, StateStore)> {
    let hints = match HintCache::load_index(&manager.mod_index_path()) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!("Ignoring unreadable mod index: {}", e);
            None
        }
    };

    let plan = Plan::from_path(&options.build_file, &tool.plan_defaults(), hints.as_ref())
        .with_context(|| format!("Invalid build file: {}", options.build_file))?;

    let game_dir = resolve_game_dir(options.game_dir.as_deref(), plan.config.game.as_deref(), tool)?;
    if !game_dir.is_dir() {
        return Err(BuildError::GameDirUnresolved(format!(
            "game directory {} does not exist",
            game_dir
        ))
        .into());
    }

    let store = open_state(options, &plan, &game_dir)?;
    Ok((plan, game_dir, store))
}

fn open_state(options: &BuildOptions, plan: &Plan, game_dir: &Utf8Path) -> Result<StateStore> {
    let default_path = StateStore::default_path_for(&options.build_file);

    if !options.resume {
        let path = options.state_file.clone().unwrap_or(default_path);
        if path.exists() {
            tracing::warn!("Overwriting existing state file {}", path);
        }
        return StateStore::create(&path, plan)
            .with_context(|| format!("Failed to create state file: {}", path));
    }

    let path = match &options.state_file {
        Some(path) => path.clone(),
        None if default_path.is_file() => default_path,
        None => StateStore::find_latest(game_dir, plan).ok_or_else(|| {
            BuildError::StateFileNotFound {
                build_name: plan.config.build_name.clone(),
            }
        })?,
    };
    Ok(StateStore::load(path, plan)?)
}

/// Run or resume a build until it completes, aborts, or `decide` declines a pause.
///
/// `decide` is asked at every pause point. [`PauseDecision::Halt`] stops the run
/// with the progress saved and returns the paused phase.
pub async fn run_build<F>(
    options: &BuildOptions,
    manager: &ConfigManager,
    tool: &ToolConfig,
    decide: F,
) -> Result<BuildPhase>
where
    F: FnMut(&PauseReason, &Plan) -> PauseDecision,
{
    let (plan, game_dir, store) = prepare_build(options, manager, tool)?;
    let installer = WeiduInstaller::new(
        tool.weidu_exec(),
        Duration::from_secs(tool.installer_timeout_secs),
    );
    let classifier = manager.load_classifier()?;
    let executor = InstallExecutor::new(installer, classifier, plan.config.num_retries);

    if plan.config.skip_installed_mods {
        let installed = InstalledMods::from_game_dir(&game_dir)
            .with_context(|| format!("Failed to read {} in {}", WEIDU_LOG_FILE_NAME, game_dir))?;
        tracing::info!("{} mods already installed in {}", installed.len(), game_dir);
        let orchestrator = Orchestrator::new(&plan, game_dir, store, executor, installed);
        drive(orchestrator, &options.build_file, decide).await
    } else {
        let orchestrator = Orchestrator::new(&plan, game_dir, store, executor, NothingInstalled);
        drive(orchestrator, &options.build_file, decide).await
    }
}

/// Loop an orchestrator through its pause points.
pub async fn drive<I, L, F>(
    mut orchestrator: Orchestrator<'_, I, L>,
    build_file: &Utf8Path,
    mut decide: F,
) -> Result<BuildPhase>
where
    I: Installer,
    L: InstallLedger,
    F: FnMut(&PauseReason, &Plan) -> PauseDecision,
{
    loop {
        let phase = orchestrator.run().await?.clone();
        match phase {
            BuildPhase::Paused(ref reason) => match decide(reason, orchestrator.plan()) {
                PauseDecision::Continue => orchestrator.continue_after_pause()?,
                PauseDecision::SkipMod => orchestrator.skip_paused_mod()?,
                PauseDecision::Halt => {
                    tracing::info!(
                        "Build paused. Resume with: jenga resume-partial-build {} -s {}",
                        build_file,
                        orchestrator.store().path()
                    );
                    return Ok(phase);
                }
            },
            other => return Ok(other),
        }
    }
}

/// Scan the extracted mod directory and save the mod index.
///
/// Returns the number of mods indexed.
pub fn populate_mod_index(
    manager: &ConfigManager,
    tool: &ToolConfig,
    extracted_dir: Option<&Utf8Path>,
) -> Result<usize> {
    let dir = extracted_dir
        .or(tool.extracted_mod_cache_dir.as_deref())
        .context("No extracted mod directory: set extracted_mod_cache_dir or pass --extracted-dir")?;

    let cache = HintCache::populate(dir, &Tp2HintExtractor)
        .with_context(|| format!("Failed to index mods in {}", dir))?;
    let index_path = manager.mod_index_path();
    cache
        .save_index(&index_path)
        .with_context(|| format!("Failed to save mod index: {}", index_path))?;

    tracing::info!("Saved mod index with {} mods to {}", cache.len(), index_path);
    Ok(cache.len())
}

/// Convert a `weidu.log` (or the one in a game directory) into a build file.
pub fn convert_weidu_log(
    log_path: &Utf8Path,
    output: Option<&Utf8Path>,
    format: BuildFileFormat,
) -> Result<Utf8PathBuf> {
    let log_path = if log_path.is_dir() {
        log_path.join(WEIDU_LOG_FILE_NAME)
    } else {
        log_path.to_path_buf()
    };
    weidu_log_to_build_file(&log_path, output, format)
        .with_context(|| format!("Failed to convert {}", log_path))
}

/// The resolved tool configuration as YAML.
pub fn render_config(tool: &ToolConfig) -> Result<String> {
    serde_yaml_ng::to_string(tool).context("Failed to serialize tool config")
}
