use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Jenga - resumable WeiDU mod builds for Infinity Engine games
#[derive(Parser, Debug)]
#[command(name = "jenga")]
#[command(about = "Install WeiDU mod builds step by step, resuming where a build stopped")]
#[command(version)]
pub struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Tool config file to use instead of ~/.config/jenga/cfg.yaml
    #[arg(long, global = true)]
    pub config_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the build commands.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Build file (JSON, or YAML with a .yaml/.yml extension)
    pub build_file_path: Utf8PathBuf,

    /// State file to write progress to, or to resume from
    #[arg(short = 's', long)]
    pub state_file_path: Option<Utf8PathBuf>,

    /// Game directory, overriding the one configured for the build's game
    #[arg(long)]
    pub game_dir: Option<Utf8PathBuf>,

    /// Continue through pause and confirmation points without asking
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a build from scratch, starting a new state file
    #[command(alias = "run_full_build")]
    RunFullBuild(BuildArgs),

    /// Resume a build from its state file
    #[command(alias = "resume_partial_build")]
    ResumePartialBuild(BuildArgs),

    /// Convert a weidu.log into a JSON build file
    #[command(alias = "weidu_log_to_json_build_file")]
    WeiduLogToJsonBuildFile {
        /// weidu.log, or a game directory containing one
        weidu_log_path: Utf8PathBuf,

        /// Where to write the build file (default: next to the log)
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Convert a weidu.log into a YAML build file
    #[command(alias = "weidu_log_to_yaml_build_file")]
    WeiduLogToYamlBuildFile {
        /// weidu.log, or a game directory containing one
        weidu_log_path: Utf8PathBuf,

        /// Where to write the build file (default: next to the log)
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Scan the extracted mod cache and rebuild the mod index
    #[command(alias = "populate_mod_index")]
    PopulateModIndex {
        /// Extracted mod directory, overriding extracted_mod_cache_dir
        #[arg(long)]
        extracted_dir: Option<Utf8PathBuf>,
    },

    /// Print the resolved tool configuration
    #[command(alias = "print_config")]
    PrintConfig,
}
