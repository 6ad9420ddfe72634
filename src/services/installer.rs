use super::game_files::{locate_tp2, stage_mod_dir, update_weidu_conf};
use super::markers::{Classification, Outcome, OutputClassifier};
use crate::error::BuildError;
use crate::metrics::BuildMetrics;
use crate::state::{StateStore, StepOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors that prevent an installer run from producing output.
///
/// These are classified as [`Outcome::Error`] and retried like any other failure.
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Failed to start installer {path}: {source}")]
    Spawn {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("No .tp2 file found for mod {0} in the game directory")]
    Tp2NotFound(String),

    #[error("Failed to copy mod sources from {source_dir}: {source}")]
    Staging {
        source_dir: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update weidu.conf: {0}")]
    WeiduConf(#[source] std::io::Error),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

/// Everything the installer needs for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub mod_name: String,
    pub component: u32,
    pub language_int: u32,
    pub lang: String,
    pub game_dir: Utf8PathBuf,
    pub force_lang_in_weidu_conf: bool,
    /// Game-relative `.tp2` path from the mod index.
    pub tp2_hint: Option<Utf8PathBuf>,
    /// Extracted mod directory to copy into the game directory if the `.tp2` is missing.
    pub source_dir: Option<Utf8PathBuf>,
}

/// A finished installer process.
#[derive(Debug, Clone)]
pub struct InstallerRun {
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
    pub duration: Duration,
}

/// Something that can install one component.
///
/// The production implementation is [`WeiduInstaller`]; tests substitute scripted
/// installers.
#[allow(async_fn_in_trait)]
pub trait Installer {
    async fn invoke(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError>;

    /// Remove every installed component of the request's mod.
    async fn uninstall(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError>;
}

/// Runs the WeiDU executable as a subprocess.
#[derive(Debug, Clone)]
pub struct WeiduInstaller {
    exec_path: Utf8PathBuf,
    timeout: Duration,
}

impl WeiduInstaller {
    pub fn new(exec_path: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            exec_path: exec_path.into(),
            timeout,
        }
    }

    pub fn exec_path(&self) -> &Utf8Path {
        &self.exec_path
    }

    /// Debug log WeiDU writes for a mod: `setup-<mod>.debug`.
    pub fn log_file_name(mod_name: &str) -> String {
        format!("setup-{}.debug", mod_name.to_lowercase().replace(' ', "_"))
    }

    /// Command line arguments for one component.
    pub fn build_args(&self, tp2: &Utf8Path, request: &InstallRequest) -> Vec<String> {
        vec![
            tp2.to_string(),
            "--no-exit-pause".to_string(),
            "--game".to_string(),
            request.game_dir.to_string(),
            "--log".to_string(),
            Self::log_file_name(&request.mod_name),
            "--language".to_string(),
            request.language_int.to_string(),
            "--skip-at-view".to_string(),
            "--force-install-list".to_string(),
            request.component.to_string(),
            "--use-lang".to_string(),
            request.lang.clone(),
        ]
    }

    /// Command line arguments that remove all of a mod's components.
    pub fn build_uninstall_args(&self, tp2: &Utf8Path, request: &InstallRequest) -> Vec<String> {
        vec![
            tp2.to_string(),
            "--no-exit-pause".to_string(),
            "--game".to_string(),
            request.game_dir.to_string(),
            "--log".to_string(),
            Self::log_file_name(&request.mod_name),
            "--uninstall".to_string(),
        ]
    }

    /// Make sure the mod's `.tp2` is in the game directory and WeiDU is configured.
    fn prepare(&self, request: &InstallRequest) -> Result<Utf8PathBuf, InstallerError> {
        let game_dir = &request.game_dir;
        let hint = request.tp2_hint.as_deref();

        let tp2 = match locate_tp2(game_dir, &request.mod_name, hint) {
            Some(tp2) => tp2,
            None => {
                let source_dir = request
                    .source_dir
                    .as_ref()
                    .ok_or_else(|| InstallerError::Tp2NotFound(request.mod_name.clone()))?;
                stage_mod_dir(source_dir, game_dir).map_err(|source| InstallerError::Staging {
                    source_dir: source_dir.clone(),
                    source,
                })?;
                locate_tp2(game_dir, &request.mod_name, hint)
                    .ok_or_else(|| InstallerError::Tp2NotFound(request.mod_name.clone()))?
            }
        };

        if request.force_lang_in_weidu_conf {
            update_weidu_conf(game_dir, &request.lang).map_err(InstallerError::WeiduConf)?;
        }

        Ok(tp2)
    }
}

impl WeiduInstaller {
    async fn run(&self, game_dir: &Utf8Path, args: &[String]) -> Result<InstallerRun, InstallerError> {
        tracing::info!("Executing: {} {}", self.exec_path, args.join(" "));

        let start = Instant::now();

        // Arguments are passed directly, never through a shell
        let child = Command::new(&self.exec_path)
            .args(args)
            .current_dir(game_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InstallerError::Spawn {
                path: self.exec_path.clone(),
                source,
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("Installer timed out after {:?}", self.timeout);
                InstallerError::Timeout(self.timeout)
            })??;

        let duration = start.elapsed();
        let exit_code = output.status.code().unwrap_or(-1);

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        tracing::info!(
            "Installer completed in {:.2}s with exit code {}",
            duration.as_secs_f32(),
            exit_code
        );

        Ok(InstallerRun {
            exit_code,
            output: text,
            duration,
        })
    }
}

impl Installer for WeiduInstaller {
    async fn invoke(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError> {
        let tp2 = self.prepare(request)?;
        let args = self.build_args(&tp2, request);
        self.run(&request.game_dir, &args).await
    }

    async fn uninstall(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError> {
        // An installed mod's .tp2 is already in the game directory
        let tp2 = locate_tp2(&request.game_dir, &request.mod_name, request.tp2_hint.as_deref())
            .ok_or_else(|| InstallerError::Tp2NotFound(request.mod_name.clone()))?;
        let args = self.build_uninstall_args(&tp2, request);
        self.run(&request.game_dir, &args).await
    }
}

/// Runs one install step to a terminal outcome, applying the retry policy and
/// persisting every consumed retry and the final status.
pub struct InstallExecutor<I> {
    installer: I,
    classifier: OutputClassifier,
    num_retries: u32,
}

impl<I: Installer> InstallExecutor<I> {
    pub fn new(installer: I, classifier: OutputClassifier, num_retries: u32) -> Self {
        Self {
            installer,
            classifier,
            num_retries,
        }
    }

    pub fn installer(&self) -> &I {
        &self.installer
    }

    /// One installer attempt, classified. Invocation failures classify as errors.
    pub async fn attempt(
        &self,
        request: &InstallRequest,
        metrics: &mut BuildMetrics,
    ) -> Classification {
        match self.installer.invoke(request).await {
            Ok(run) => {
                metrics.record_invocation(run.duration);
                let classification = self.classifier.classify(run.exit_code, &run.output);
                tracing::debug!(
                    "{} #{}: {} ({})",
                    request.mod_name,
                    request.component,
                    classification.outcome,
                    classification.reason
                );
                classification
            }
            Err(e) => {
                tracing::warn!(
                    "{} #{}: installer invocation failed: {}",
                    request.mod_name,
                    request.component,
                    e
                );
                Classification::new(Outcome::Error, e.to_string())
            }
        }
    }

    /// Uninstall the request's mod once, classified like an install attempt.
    ///
    /// Not retried: a failed uninstall fails the mod's first step.
    pub async fn uninstall(
        &self,
        request: &InstallRequest,
        metrics: &mut BuildMetrics,
    ) -> Classification {
        let classification = match self.installer.uninstall(request).await {
            Ok(run) => {
                metrics.record_invocation(run.duration);
                self.classifier.classify(run.exit_code, &run.output)
            }
            Err(e) => Classification::new(Outcome::Error, e.to_string()),
        };
        if classification.outcome != Outcome::Error {
            metrics.record_uninstall();
        }
        tracing::debug!(
            "{} uninstall: {} ({})",
            request.mod_name,
            classification.outcome,
            classification.reason
        );
        classification
    }

    /// Run step `index` until it succeeds, warns, or exhausts its retries.
    ///
    /// A retry is only taken while the step's persisted retry count is below
    /// `num_retries`, so a resumed step never gets more attempts than the policy allows.
    pub async fn execute(
        &self,
        index: usize,
        request: &InstallRequest,
        store: &mut StateStore,
        metrics: &mut BuildMetrics,
    ) -> Result<Outcome, BuildError> {
        store.begin(index)?;

        loop {
            let classification = self.attempt(request, metrics).await;

            match classification.outcome {
                Outcome::Error if store.retries(index) < self.num_retries => {
                    let used = store.record_retry(index)?;
                    metrics.record_retry();
                    tracing::warn!(
                        "{} #{} failed ({}), retry {}/{}",
                        request.mod_name,
                        request.component,
                        classification.reason,
                        used,
                        self.num_retries
                    );
                }
                Outcome::Error => {
                    store.record_outcome(index, StepOutcome::Failed)?;
                    metrics.record_outcome(Outcome::Error);
                    tracing::error!(
                        "{} #{} failed: {}",
                        request.mod_name,
                        request.component,
                        classification.reason
                    );
                    return Ok(Outcome::Error);
                }
                outcome => {
                    let warnings = outcome == Outcome::Warning;
                    store.record_outcome(index, StepOutcome::Installed { warnings })?;
                    metrics.record_outcome(outcome);
                    if warnings {
                        tracing::warn!(
                            "{} #{} installed with warnings: {}",
                            request.mod_name,
                            request.component,
                            classification.reason
                        );
                    } else {
                        tracing::info!("{} #{} installed", request.mod_name, request.component);
                    }
                    return Ok(outcome);
                }
            }
        }
    }
}
