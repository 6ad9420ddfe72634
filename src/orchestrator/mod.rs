// Build orchestrator
//
// The control loop that walks a plan's install steps in order, consulting the
// install ledger, the executor and the state store, and stopping at pause points
// and policy aborts.

use crate::error::BuildError;
use crate::metrics::BuildMetrics;
use crate::models::{InstallStep, Plan, ResolvedMod};
use crate::services::{InstallExecutor, InstallRequest, Installer, Outcome};
use crate::state::{StateStore, StepOutcome, StepStatus};
use camino::{Utf8Path, Utf8PathBuf};

/// Where a build stands.
///
/// `run` returns in `Paused`, `Completed` or `Aborted`. A paused build continues
/// after [`Orchestrator::continue_after_pause`]; the other two are final for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPhase {
    NotStarted,
    Running,
    Paused(PauseReason),
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
    /// `pause_every_x_mods` mods finished in this run.
    ModsCompleted { count: usize, last_mod: String },
    /// The next step needs the user's go-ahead.
    ConfirmInstall { step_index: usize },
}

/// The answer to a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    Continue,
    /// Stop here with progress saved.
    Halt,
    /// Record the paused mod's remaining steps as skipped and go on.
    SkipMod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A step exhausted its retries and `stop_on_error` is set.
    StepFailed { step_index: usize },
    /// A step installed with warnings and `stop_on_warning` is set.
    StepWarned { step_index: usize },
}

/// Tells whether a step is already present in the target game.
#[cfg_attr(test, mockall::automock)]
pub trait InstallLedger {
    fn is_installed(&self, step: &InstallStep) -> bool;

    /// The mod is present with another version or another set of components.
    /// Such a mod is uninstalled before its first step runs.
    fn installed_differently(&self, _resolved: &ResolvedMod) -> bool {
        false
    }
}

/// Drives one build plan against one game directory.
///
/// Strictly sequential: a step starts only after the previous one's outcome has
/// been classified and flushed to the state file.
pub struct Orchestrator<'p, I, L> {
    plan: &'p Plan,
    game_dir: Utf8PathBuf,
    store: StateStore,
    executor: InstallExecutor<I>,
    ledger: L,
    phase: BuildPhase,
    cursor: usize,
    /// Mods finished in this run that had at least one installer run.
    mods_completed: usize,
    /// Mod index of the most recent step that ran the installer.
    last_ran_mod: Option<usize>,
    confirmed_step: Option<usize>,
    /// Mod uninstalled in this run; the ledger no longer describes it.
    uninstalled_mod: Option<usize>,
    metrics: BuildMetrics,
}

impl<'p, I: Installer, L: InstallLedger> Orchestrator<'p, I, L> {
    pub fn new(
        plan: &'p Plan,
        game_dir: impl Into<Utf8PathBuf>,
        store: StateStore,
        executor: InstallExecutor<I>,
        ledger: L,
    ) -> Self {
        Self {
            plan,
            game_dir: game_dir.into(),
            store,
            executor,
            ledger,
            phase: BuildPhase::NotStarted,
            cursor: 0,
            mods_completed: 0,
            last_ran_mod: None,
            confirmed_step: None,
            uninstalled_mod: None,
            metrics: BuildMetrics::new(),
        }
    }

    pub fn phase(&self) -> &BuildPhase {
        &self.phase
    }

    pub fn plan(&self) -> &'p Plan {
        self.plan
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    pub fn executor(&self) -> &InstallExecutor<I> {
        &self.executor
    }

    pub fn game_dir(&self) -> &Utf8Path {
        &self.game_dir
    }

    /// Run until the build pauses, completes, or aborts.
    pub async fn run(&mut self) -> Result<&BuildPhase, BuildError> {
        match self.phase {
            BuildPhase::NotStarted => self.log_start(),
            BuildPhase::Running => {}
            BuildPhase::Paused(_) => {
                return Err(BuildError::InvalidPhase(
                    "build is paused; continue_after_pause must be called first".to_string(),
                ));
            }
            BuildPhase::Completed | BuildPhase::Aborted(_) => return Ok(&self.phase),
        }

        self.phase = BuildPhase::Running;
        let plan = self.plan;
        let config = &plan.config;

        loop {
            let mut next = None;
            for i in self.cursor..plan.steps.len() {
                if self.store.needs_attempt(i) {
                    next = Some(i);
                    break;
                }
                // Later installs may depend on a step that never went in
                if config.stop_on_error && self.store.status(i) == Some(StepStatus::Failed) {
                    self.cursor = i;
                    tracing::error!(
                        "{} failed in an earlier run and has no retries left",
                        plan.steps[i]
                    );
                    return Ok(self.abort(AbortReason::StepFailed { step_index: i }));
                }
            }
            let Some(index) = next else {
                self.phase = BuildPhase::Completed;
                tracing::info!("Build '{}' completed", config.build_name);
                self.metrics.log_summary();
                return Ok(&self.phase);
            };
            self.cursor = index;
            let step = &plan.steps[index];
            let resolved = plan.mod_for(step);

            let uninstalled = self.uninstalled_mod == Some(step.mod_index);
            let reinstall = config.skip_installed_mods
                && !uninstalled
                && plan.is_first_step_of_mod(index)
                && self.ledger.installed_differently(resolved);

            let already_installed = config.skip_installed_mods
                && !reinstall
                && !uninstalled
                && self.ledger.is_installed(step);
            if already_installed {
                self.store.begin(index)?;
                self.store.record_outcome(index, StepOutcome::Skipped)?;
                self.metrics.record_skipped();
                tracing::info!("Skipping {}: already installed", step);
                self.cursor = index + 1;

                if let Some(reason) = self.mod_checkpoint(index) {
                    return Ok(self.pause(reason));
                }
                continue;
            }

            let needs_confirmation = config.confirm_each_install
                || (resolved.prompt_for_manual_install && plan.is_first_step_of_mod(index));
            if needs_confirmation && self.confirmed_step != Some(index) {
                return Ok(self.pause(PauseReason::ConfirmInstall { step_index: index }));
            }
            self.confirmed_step = None;

            if reinstall {
                if !self.uninstall_mod(index).await? {
                    self.cursor = index + 1;
                    if config.stop_on_error {
                        return Ok(self.abort(AbortReason::StepFailed { step_index: index }));
                    }
                    continue;
                }
                self.uninstalled_mod = Some(step.mod_index);
            }

            tracing::info!(
                "[{}/{}] Installing {}{}",
                index + 1,
                plan.steps.len(),
                step,
                resolved
                    .component_description(step.component)
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            );

            let request = self.request_for(index);
            let outcome = self
                .executor
                .execute(index, &request, &mut self.store, &mut self.metrics)
                .await?;
            self.last_ran_mod = Some(step.mod_index);
            self.cursor = index + 1;

            match outcome {
                Outcome::Warning if config.stop_on_warning => {
                    return Ok(self.abort(AbortReason::StepWarned { step_index: index }));
                }
                Outcome::Error if config.stop_on_error => {
                    return Ok(self.abort(AbortReason::StepFailed { step_index: index }));
                }
                _ => {}
            }

            if let Some(reason) = self.mod_checkpoint(index) {
                return Ok(self.pause(reason));
            }
        }
    }

    /// Leave a pause and go back to running. The next [`run`](Self::run) resumes
    /// where the build stopped; a confirmed install goes ahead.
    pub fn continue_after_pause(&mut self) -> Result<(), BuildError> {
        match &self.phase {
            BuildPhase::Paused(PauseReason::ConfirmInstall { step_index }) => {
                self.confirmed_step = Some(*step_index);
            }
            BuildPhase::Paused(PauseReason::ModsCompleted { .. }) => {}
            other => {
                return Err(BuildError::InvalidPhase(format!(
                    "cannot continue a build that is {:?}",
                    other
                )));
            }
        }
        self.phase = BuildPhase::Running;
        Ok(())
    }

    /// Leave a confirmation pause without installing the paused mod.
    ///
    /// Every remaining step of the mod is recorded as Skipped, so a later resume
    /// does not ask again. Steps that already finished keep their status.
    pub fn skip_paused_mod(&mut self) -> Result<(), BuildError> {
        let index = match &self.phase {
            BuildPhase::Paused(PauseReason::ConfirmInstall { step_index }) => *step_index,
            other => {
                return Err(BuildError::InvalidPhase(format!(
                    "only a confirmation pause can skip a mod, build is {:?}",
                    other
                )));
            }
        };

        let plan = self.plan;
        let mod_index = plan.steps[index].mod_index;
        let mut skipped = 0;
        for i in (index..plan.steps.len()).take_while(|&i| plan.steps[i].mod_index == mod_index) {
            if self.store.needs_attempt(i) {
                self.store.begin(i)?;
                self.store.record_outcome(i, StepOutcome::Skipped)?;
                self.metrics.record_skipped();
                skipped += 1;
            }
            self.cursor = i + 1;
        }

        tracing::info!(
            "Skipping {} at the user's request ({} steps)",
            plan.mods[mod_index].name,
            skipped
        );
        self.confirmed_step = None;
        self.phase = BuildPhase::Running;
        Ok(())
    }

    /// Installer inputs for one step.
    pub fn request_for(&self, index: usize) -> InstallRequest {
        let step = &self.plan.steps[index];
        let resolved = self.plan.mod_for(step);
        InstallRequest {
            mod_name: resolved.name.clone(),
            component: step.component,
            language_int: resolved.language_int,
            lang: self.plan.config.lang.clone(),
            game_dir: self.game_dir.clone(),
            force_lang_in_weidu_conf: self.plan.config.force_lang_in_weidu_conf,
            tp2_hint: resolved.tp2_path.clone(),
            source_dir: resolved.source_dir.clone(),
        }
    }

    /// Remove the installed copy of the mod owning step `index`.
    ///
    /// A failed uninstall is recorded as that step's failure.
    async fn uninstall_mod(&mut self, index: usize) -> Result<bool, BuildError> {
        let plan = self.plan;
        let resolved = plan.mod_for(&plan.steps[index]);
        tracing::info!(
            "{} is installed with another version or component set; uninstalling it first",
            resolved.name
        );

        let request = self.request_for(index);
        let classification = self.executor.uninstall(&request, &mut self.metrics).await;
        if classification.outcome != Outcome::Error {
            tracing::info!("{} uninstalled", resolved.name);
            return Ok(true);
        }

        self.store.begin(index)?;
        self.store.record_outcome(index, StepOutcome::Failed)?;
        self.metrics.record_outcome(Outcome::Error);
        tracing::error!(
            "Failed to uninstall {}: {}",
            resolved.name,
            classification.reason
        );
        Ok(false)
    }

    /// Count a finished mod and decide whether the build pauses after it.
    fn mod_checkpoint(&mut self, index: usize) -> Option<PauseReason> {
        let plan = self.plan;
        let step = &plan.steps[index];
        if !plan.is_last_step_of_mod(index) || self.last_ran_mod != Some(step.mod_index) {
            return None;
        }

        self.mods_completed += 1;
        let every = plan.config.pause_every_x_mods as usize;
        (every > 0 && self.mods_completed % every == 0).then(|| PauseReason::ModsCompleted {
            count: self.mods_completed,
            last_mod: step.mod_name.clone(),
        })
    }

    fn pause(&mut self, reason: PauseReason) -> &BuildPhase {
        match &reason {
            PauseReason::ModsCompleted { count, last_mod } => tracing::info!(
                "Pausing after {} mods installed in this run (last: {})",
                count,
                last_mod
            ),
            PauseReason::ConfirmInstall { step_index } => tracing::info!(
                "Waiting for confirmation before installing {}",
                self.plan.steps[*step_index]
            ),
        }
        self.phase = BuildPhase::Paused(reason);
        &self.phase
    }

    fn abort(&mut self, reason: AbortReason) -> &BuildPhase {
        let (index, why) = match reason {
            AbortReason::StepFailed { step_index } => (step_index, "failed"),
            AbortReason::StepWarned { step_index } => (step_index, "installed with warnings"),
        };
        tracing::error!(
            "Aborting build '{}': {} {}. Progress is saved in {}",
            self.plan.config.build_name,
            self.plan.steps[index],
            why,
            self.store.path()
        );
        self.metrics.log_summary();
        self.phase = BuildPhase::Aborted(reason);
        &self.phase
    }

    fn log_start(&self) {
        let total = self.plan.steps.len();
        let remaining = (0..total).filter(|&i| self.store.needs_attempt(i)).count();
        tracing::info!(
            "Starting build '{}' in {}: {} of {} steps to go",
            self.plan.config.build_name,
            self.game_dir,
            remaining,
            total
        );

        let stuck: Vec<String> = (0..total)
            .filter(|&i| self.store.status(i) == Some(StepStatus::Failed) && !self.store.needs_attempt(i))
            .map(|i| self.plan.steps[i].to_string())
            .collect();
        if !stuck.is_empty() {
            let consequence = if self.plan.config.stop_on_error {
                "the build stops at the first of them"
            } else {
                "they will be passed over"
            };
            tracing::warn!(
                "{} steps already failed with no retries left, {}: {}",
                stuck.len(),
                consequence,
                stuck.join(", ")
            );
        }
    }
}
