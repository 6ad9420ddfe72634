//! Integration tests for the build orchestrator
//!
//! These tests verify:
//! - Resume semantics (completed steps never re-run)
//! - Skip-installed detection through a parsed weidu.log
//! - Retry exhaustion and stop-on-error aborts
//! - Pause points every N mods and answers to them
//! - Uninstall before reinstalling a mod installed differently
//! - State round trips across runs

use camino::Utf8PathBuf;
use jenga::commands::drive;
use jenga::models::{BuildFileFormat, InstallStep, Plan, PlanDefaults};
use jenga::orchestrator::{
    AbortReason, BuildPhase, InstallLedger, Orchestrator, PauseDecision, PauseReason,
};
use jenga::services::{
    InstallExecutor, InstallRequest, InstalledMods, Installer, InstallerError, InstallerRun,
    OutputClassifier,
};
use jenga::state::{StateStore, StepOutcome, StepStatus};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;
use tempfile::TempDir;

/// Replays scripted exit codes (0 once the script runs out) and records every call.
#[derive(Default)]
struct ScriptedInstaller {
    exit_codes: RefCell<VecDeque<i32>>,
    calls: RefCell<Vec<(String, u32)>>,
    invocations: Cell<usize>,
    uninstall_exit_code: i32,
    uninstalls: RefCell<Vec<String>>,
}

impl ScriptedInstaller {
    fn with_exit_codes(codes: &[i32]) -> Self {
        Self {
            exit_codes: RefCell::new(codes.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn failing_uninstall() -> Self {
        Self {
            uninstall_exit_code: 1,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.borrow().clone()
    }

    fn uninstalls(&self) -> Vec<String> {
        self.uninstalls.borrow().clone()
    }
}

impl Installer for ScriptedInstaller {
    async fn invoke(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError> {
        self.invocations.set(self.invocations.get() + 1);
        self.calls
            .borrow_mut()
            .push((request.mod_name.clone(), request.component));
        let exit_code = self.exit_codes.borrow_mut().pop_front().unwrap_or(0);
        Ok(InstallerRun {
            exit_code,
            output: String::new(),
            duration: Duration::from_millis(2),
        })
    }

    async fn uninstall(&self, request: &InstallRequest) -> Result<InstallerRun, InstallerError> {
        self.uninstalls.borrow_mut().push(request.mod_name.clone());
        Ok(InstallerRun {
            exit_code: self.uninstall_exit_code,
            output: String::new(),
            duration: Duration::from_millis(2),
        })
    }
}

struct NothingInstalled;

impl InstallLedger for NothingInstalled {
    fn is_installed(&self, _step: &InstallStep) -> bool {
        false
    }
}

const TWO_MODS: &str = r#"
config:
  build_name: two_mods
  game: bg2ee
  lang: en_us
  pause_every_x_mods: 0
  num_retries: 0
  stop_on_error: true
mods:
  - mod: a
    version: "1"
    language_int: 0
    install_list: "0 1"
  - mod: b
    version: "2"
    language_int: 0
    install_list: [0]
"#;

fn yaml_plan(yaml: &str) -> Plan {
    Plan::load(
        yaml.as_bytes(),
        BuildFileFormat::Yaml,
        &PlanDefaults::default(),
        None,
    )
    .unwrap()
}

fn with_config(extra: &str) -> Plan {
    yaml_plan(&TWO_MODS.replace("  stop_on_error: true\n", &format!("  stop_on_error: true\n{}", extra)))
}

fn temp_dir() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().unwrap();
    let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

fn orchestrator<'p, L: InstallLedger>(
    plan: &'p Plan,
    dir: &Utf8PathBuf,
    store: StateStore,
    installer: ScriptedInstaller,
    ledger: L,
) -> Orchestrator<'p, ScriptedInstaller, L> {
    let executor = InstallExecutor::new(
        installer,
        OutputClassifier::default(),
        plan.config.num_retries,
    );
    Orchestrator::new(plan, dir.clone(), store, executor, ledger)
}

#[tokio::test]
async fn test_fresh_build_runs_steps_in_file_order() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);

    assert_eq!(
        orch.executor().installer().calls(),
        vec![("a".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 0)]
    );
    assert!(orch.store().is_complete());
}

#[tokio::test]
async fn test_resume_all_success_invokes_nothing() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    {
        let mut store = StateStore::create(&path, &plan).unwrap();
        for i in 0..plan.steps.len() {
            store.begin(i).unwrap();
            store
                .record_outcome(i, StepOutcome::Installed { warnings: false })
                .unwrap();
        }
    }

    let store = StateStore::load(&path, &plan).unwrap();
    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    assert_eq!(orch.executor().installer().invocations.get(), 0);
}

#[tokio::test]
async fn test_resume_after_step_k_starts_at_k_plus_one() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    {
        // Simulates a process killed right after step 1 was persisted
        let mut store = StateStore::create(&path, &plan).unwrap();
        for i in 0..=1 {
            store.begin(i).unwrap();
            store
                .record_outcome(i, StepOutcome::Installed { warnings: false })
                .unwrap();
        }
    }

    let store = StateStore::load(&path, &plan).unwrap();
    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    assert_eq!(orch.executor().installer().calls(), vec![("b".to_string(), 0)]);
}

#[tokio::test]
async fn test_skip_installed_uses_weidu_log() {
    let plan = with_config("  skip_installed_mods: true\n");
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let ledger = InstalledMods::parse(
        "// Log of Currently Installed WeiDU Mods\n\
         ~A/SETUP-A.TP2~ #0 #0 // A core: v1\n\
         ~A/SETUP-A.TP2~ #0 #1 // A extra: v1\n",
    );

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), ledger);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);

    assert_eq!(orch.store().status(0), Some(StepStatus::Skipped));
    assert_eq!(orch.store().status(1), Some(StepStatus::Skipped));
    assert_eq!(orch.store().status(2), Some(StepStatus::Success));
    assert_eq!(orch.executor().installer().calls(), vec![("b".to_string(), 0)]);
}

#[tokio::test]
async fn test_skip_installed_requires_matching_version() {
    let plan = with_config("  skip_installed_mods: true\n");
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let ledger = InstalledMods::parse("~B/SETUP-B.TP2~ #0 #0 // B core: v3\n");

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), ledger);
    orch.run().await.unwrap();
    assert_eq!(orch.store().status(2), Some(StepStatus::Success));
    assert_eq!(orch.executor().installer().invocations.get(), 3);
    // b v3 is in the game, so it is removed before v2 goes in
    assert_eq!(orch.executor().installer().uninstalls(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_mod_installed_differently_is_reinstalled() {
    let plan = with_config("  skip_installed_mods: true\n");
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    // Older version of a with only its first component
    let ledger = InstalledMods::parse("~A/SETUP-A.TP2~ #0 #0 // A core: v0.9\n");

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), ledger);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);

    assert_eq!(orch.executor().installer().uninstalls(), vec!["a".to_string()]);
    assert_eq!(
        orch.executor().installer().calls(),
        vec![("a".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 0)]
    );
    assert!((0..3).all(|i| orch.store().status(i) == Some(StepStatus::Success)));
    assert_eq!(orch.metrics().uninstalled, 1);
}

#[tokio::test]
async fn test_identically_installed_mod_is_not_uninstalled() {
    let plan = with_config("  skip_installed_mods: true\n");
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let ledger = InstalledMods::parse(
        "~A/SETUP-A.TP2~ #0 #1 // A extra: v1\n\
         ~A/SETUP-A.TP2~ #0 #0 // A core: v1\n",
    );

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), ledger);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    assert!(orch.executor().installer().uninstalls().is_empty());
    assert_eq!(orch.executor().installer().calls(), vec![("b".to_string(), 0)]);
}

#[tokio::test]
async fn test_failed_uninstall_fails_the_mod_and_is_persisted() {
    let plan = with_config("  skip_installed_mods: true\n");
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    let store = StateStore::create(&path, &plan).unwrap();
    let ledger = InstalledMods::parse("~A/SETUP-A.TP2~ #0 #0 // A core: v2\n");

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::failing_uninstall(), ledger);
    assert_eq!(
        orch.run().await.unwrap(),
        &BuildPhase::Aborted(AbortReason::StepFailed { step_index: 0 })
    );
    assert_eq!(orch.executor().installer().invocations.get(), 0);
    assert_eq!(orch.metrics().failed, 1);
    assert_eq!(orch.metrics().uninstalled, 0);
    drop(orch);

    let reloaded = StateStore::load(&path, &plan).unwrap();
    assert_eq!(reloaded.status(0), Some(StepStatus::Failed));
    assert_eq!(reloaded.status(1), Some(StepStatus::Pending));
}

#[tokio::test]
async fn test_retries_exhausted_then_abort() {
    let plan = yaml_plan(&TWO_MODS.replace("num_retries: 0", "num_retries: 2"));
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let installer = ScriptedInstaller::with_exit_codes(&[1, 1, 1]);

    let mut orch = orchestrator(&plan, &dir, store, installer, NothingInstalled);
    assert_eq!(
        orch.run().await.unwrap(),
        &BuildPhase::Aborted(AbortReason::StepFailed { step_index: 0 })
    );

    assert_eq!(orch.executor().installer().invocations.get(), 3);
    assert_eq!(orch.store().status(0), Some(StepStatus::Failed));
    assert_eq!(orch.store().retries(0), 2);
    assert_eq!(orch.store().status(1), Some(StepStatus::Pending));
    assert_eq!(orch.metrics().retries, 2);
}

#[tokio::test]
async fn test_retry_then_success() {
    let plan = yaml_plan(&TWO_MODS.replace("num_retries: 0", "num_retries: 1"));
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let installer = ScriptedInstaller::with_exit_codes(&[1, 0]);

    let mut orch = orchestrator(&plan, &dir, store, installer, NothingInstalled);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    assert_eq!(orch.store().status(0), Some(StepStatus::Success));
    assert_eq!(orch.store().retries(0), 1);
    assert_eq!(orch.executor().installer().invocations.get(), 4);
}

/// Run `plan` once with a failing first install so step 0 ends Failed, and return the state path.
async fn fail_first_step(plan: &Plan, dir: &Utf8PathBuf) -> Utf8PathBuf {
    let path = dir.join("b.state");
    let store = StateStore::create(&path, plan).unwrap();
    let installer = ScriptedInstaller::with_exit_codes(&[1]);
    let mut orch = orchestrator(plan, dir, store, installer, NothingInstalled);
    orch.run().await.unwrap();
    path
}

#[tokio::test]
async fn test_resume_stops_at_failed_step_under_stop_on_error() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let path = fail_first_step(&plan, &dir).await;

    let store = StateStore::load(&path, &plan).unwrap();
    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    assert_eq!(
        orch.run().await.unwrap(),
        &BuildPhase::Aborted(AbortReason::StepFailed { step_index: 0 })
    );
    assert_eq!(orch.executor().installer().invocations.get(), 0);
    assert_eq!(orch.store().status(0), Some(StepStatus::Failed));
    assert_eq!(orch.store().status(1), Some(StepStatus::Pending));
    assert_eq!(orch.store().status(2), Some(StepStatus::Pending));
}

#[tokio::test]
async fn test_resume_passes_failed_step_without_stop_on_error() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let path = fail_first_step(&plan, &dir).await;

    let lenient = yaml_plan(&TWO_MODS.replace("stop_on_error: true", "stop_on_error: false"));
    let store = StateStore::load(&path, &lenient).unwrap();
    let mut orch = orchestrator(&lenient, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    assert_eq!(
        orch.executor().installer().calls(),
        vec![("a".to_string(), 1), ("b".to_string(), 0)]
    );
    assert_eq!(orch.store().status(0), Some(StepStatus::Failed));
}

#[tokio::test]
async fn test_resume_after_crash_mid_retries_honours_remaining_budget() {
    let plan = yaml_plan(&TWO_MODS.replace("num_retries: 0", "num_retries: 3"));
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    {
        // Killed after two retries were persisted, before any outcome
        let mut store = StateStore::create(&path, &plan).unwrap();
        store.begin(0).unwrap();
        store.record_retry(0).unwrap();
        store.record_retry(0).unwrap();
    }

    let store = StateStore::load(&path, &plan).unwrap();
    assert_eq!(store.status(0), Some(StepStatus::Pending));
    assert_eq!(store.retries(0), 2);

    let installer = ScriptedInstaller::with_exit_codes(&[1, 1, 1, 1, 1]);
    let mut orch = orchestrator(&plan, &dir, store, installer, NothingInstalled);
    assert_eq!(
        orch.run().await.unwrap(),
        &BuildPhase::Aborted(AbortReason::StepFailed { step_index: 0 })
    );

    // One retry left plus the attempt that used it up
    assert_eq!(orch.executor().installer().invocations.get(), 2);
    assert_eq!(orch.store().status(0), Some(StepStatus::Failed));
    assert_eq!(orch.store().retries(0), 3);
    assert_eq!(orch.metrics().retries, 1);
}

#[tokio::test]
async fn test_pause_every_mod_pauses_twice() {
    let plan = yaml_plan(&TWO_MODS.replace("pause_every_x_mods: 0", "pause_every_x_mods: 1"));
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();

    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
    let mut pauses = Vec::new();
    loop {
        match orch.run().await.unwrap().clone() {
            BuildPhase::Paused(reason) => {
                pauses.push(reason);
                orch.continue_after_pause().unwrap();
            }
            BuildPhase::Completed => break,
            other => panic!("unexpected phase {:?}", other),
        }
    }

    assert_eq!(
        pauses,
        vec![
            PauseReason::ModsCompleted {
                count: 1,
                last_mod: "a".to_string()
            },
            PauseReason::ModsCompleted {
                count: 2,
                last_mod: "b".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_round_trip_reload_keeps_fingerprint() {
    let plan = yaml_plan(TWO_MODS);
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    {
        let store = StateStore::create(&path, &plan).unwrap();
        let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);
        assert_eq!(orch.run().await.unwrap(), &BuildPhase::Completed);
    }

    let reloaded_plan = yaml_plan(TWO_MODS);
    let store = StateStore::load(&path, &reloaded_plan).unwrap();
    assert_eq!(store.state().fingerprint, reloaded_plan.fingerprint());
    assert!((0..store.len()).all(|i| store.status(i).is_some_and(StepStatus::is_done)));
}

#[test]
fn test_prompt_for_manual_install_confirms_first_step_only() {
    let plan = yaml_plan(&TWO_MODS.replace(
        "    install_list: \"0 1\"\n",
        "    install_list: \"0 1\"\n    prompt_for_manual_install: true\n",
    ));
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let mut orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);

    let phase = tokio_test::block_on(orch.run()).unwrap().clone();
    assert_eq!(
        phase,
        BuildPhase::Paused(PauseReason::ConfirmInstall { step_index: 0 })
    );
    orch.continue_after_pause().unwrap();
    assert_eq!(tokio_test::block_on(orch.run()).unwrap(), &BuildPhase::Completed);
    assert_eq!(orch.executor().installer().invocations.get(), 3);
}

#[tokio::test]
async fn test_skip_answer_at_manual_install_prompt() {
    let plan = yaml_plan(&TWO_MODS.replace(
        "    install_list: \"0 1\"\n",
        "    install_list: \"0 1\"\n    prompt_for_manual_install: true\n",
    ));
    let (_temp, dir) = temp_dir();
    let path = dir.join("b.state");
    let store = StateStore::create(&path, &plan).unwrap();
    let orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);

    let mut asked = Vec::new();
    let phase = drive(orch, &dir.join("build.yaml"), |reason, _plan| {
        asked.push(reason.clone());
        PauseDecision::SkipMod
    })
    .await
    .unwrap();

    assert_eq!(phase, BuildPhase::Completed);
    assert_eq!(
        asked,
        vec![PauseReason::ConfirmInstall { step_index: 0 }]
    );

    // The skip is durable: a resume neither asks nor installs a again
    let store = StateStore::load(&path, &plan).unwrap();
    assert_eq!(store.status(0), Some(StepStatus::Skipped));
    assert_eq!(store.status(1), Some(StepStatus::Skipped));
    assert_eq!(store.status(2), Some(StepStatus::Success));
}

#[tokio::test]
async fn test_halt_answer_leaves_build_paused() {
    let plan = yaml_plan(&TWO_MODS.replace("pause_every_x_mods: 0", "pause_every_x_mods: 1"));
    let (_temp, dir) = temp_dir();
    let store = StateStore::create(dir.join("b.state"), &plan).unwrap();
    let orch = orchestrator(&plan, &dir, store, ScriptedInstaller::default(), NothingInstalled);

    let phase = drive(orch, &dir.join("build.yaml"), |_, _| PauseDecision::Halt)
        .await
        .unwrap();
    assert!(matches!(
        phase,
        BuildPhase::Paused(PauseReason::ModsCompleted { count: 1, .. })
    ));
}
