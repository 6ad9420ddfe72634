//! Jenga - resumable WeiDU mod builds for Infinity Engine games
//!
//! Command-line entry point.
//!
//! # Execution Flow
//!
//! 1. Parse arguments
//! 2. Load the tool config (`~/.config/jenga/cfg.yaml` or `--config-file`, then `JENGA__*`)
//! 3. Initialize logging → `<log_dir>/jenga.<date>`
//! 4. Create a current-thread tokio runtime; installs run strictly one at a time
//! 5. Dispatch the subcommand
//!
//! A build that aborts, or a failing command, exits 1. A build refused before its
//! first step (bad build file, unresumable state, unknown game directory) exits 2.
//! Declining to continue at a pause point exits zero with progress saved.

use anyhow::Result;
use clap::Parser;
use jenga::cli::{BuildArgs, Cli, Commands};
use jenga::commands::{self, BuildOptions};
use jenga::models::{BuildFileFormat, Plan};
use jenga::orchestrator::{BuildPhase, PauseDecision, PauseReason};
use jenga::{APP_NAME, ConfigManager, VERSION};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = commands::exit_code_for(&e);
            if code == commands::NOT_STARTED_EXIT_CODE {
                eprintln!("Build not started: {:#}", e);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let manager = match &cli.config_file {
        Some(path) => ConfigManager::with_config_file(path)?,
        None => ConfigManager::new(ConfigManager::default_config_dir()?)?,
    };
    let tool = manager.load_tool_config()?;

    // Held until exit so buffered log lines are flushed
    let _guard = jenga::logging::setup_logging(&tool.log_dir, APP_NAME, cli.debug, true)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    match cli.command {
        Commands::RunFullBuild(args) => build(args, false, &manager, &tool),
        Commands::ResumePartialBuild(args) => build(args, true, &manager, &tool),
        Commands::WeiduLogToJsonBuildFile {
            weidu_log_path,
            output,
        } => {
            let path =
                commands::convert_weidu_log(&weidu_log_path, output.as_deref(), BuildFileFormat::Json)?;
            println!("{}", path);
            Ok(ExitCode::SUCCESS)
        }
        Commands::WeiduLogToYamlBuildFile {
            weidu_log_path,
            output,
        } => {
            let path =
                commands::convert_weidu_log(&weidu_log_path, output.as_deref(), BuildFileFormat::Yaml)?;
            println!("{}", path);
            Ok(ExitCode::SUCCESS)
        }
        Commands::PopulateModIndex { extracted_dir } => {
            let count = commands::populate_mod_index(&manager, &tool, extracted_dir.as_deref())?;
            println!("Indexed {} mods into {}", count, manager.mod_index_path());
            Ok(ExitCode::SUCCESS)
        }
        Commands::PrintConfig => {
            print!("{}", commands::render_config(&tool)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build(
    args: BuildArgs,
    resume: bool,
    manager: &ConfigManager,
    tool: &jenga::models::ToolConfig,
) -> Result<ExitCode> {
    let options = BuildOptions {
        build_file: args.build_file_path,
        state_file: args.state_file_path,
        game_dir: args.game_dir,
        resume,
    };
    let assume_yes = args.yes;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let phase = runtime.block_on(commands::run_build(&options, manager, tool, |reason, plan| {
        if assume_yes {
            PauseDecision::Continue
        } else {
            prompt_continue(reason, plan)
        }
    }))?;

    Ok(match phase {
        BuildPhase::Aborted(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Ask on stdin whether to go on. Anything but an explicit no continues.
///
/// Confirmation pauses also accept "s"/"skip", which passes over the mod.
fn prompt_continue(reason: &PauseReason, plan: &Plan) -> PauseDecision {
    let (question, can_skip) = match reason {
        PauseReason::ModsCompleted { count, last_mod } => (
            format!(
                "{} mods installed so far in this run (last: {}). Continue?",
                count, last_mod
            ),
            false,
        ),
        PauseReason::ConfirmInstall { step_index } => {
            let step = &plan.steps[*step_index];
            let resolved = plan.mod_for(step);
            let question = if resolved.prompt_for_manual_install && !plan.config.confirm_each_install {
                format!("{} may ask questions during install. Install it now?", step)
            } else {
                format!("Install {}?", step)
            };
            (question, true)
        }
    };

    print!("{} {} ", question, if can_skip { "[Y/n/s]" } else { "[Y/n]" });
    if io::stdout().flush().is_err() {
        return PauseDecision::Halt;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => PauseDecision::Halt,
        Ok(_) => match answer.trim().to_lowercase().as_str() {
            "n" | "no" | "q" | "quit" | "m" | "manual" => PauseDecision::Halt,
            "s" | "skip" if can_skip => PauseDecision::SkipMod,
            _ => PauseDecision::Continue,
        },
    }
}
