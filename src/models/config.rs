use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Tool-wide configuration from `cfg.yaml` merged with `JENGA__*` environment
/// variables.
///
/// Build files may override the policy defaults; everything else is machine
/// specific and lives only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path to the `weidu` executable. Resolved through `PATH` when unset.
    pub weidu_exec_path: Option<Utf8PathBuf>,

    /// Install directory per game key (`bgee`, `bg2ee`, `iwdee`, ...).
    pub game_dirs: IndexMap<String, Utf8PathBuf>,

    /// Directory holding extracted mod archives, scanned by `populate-mod-index`.
    pub extracted_mod_cache_dir: Option<Utf8PathBuf>,

    pub default_lang: String,
    pub num_retries: u32,
    pub stop_on_warning: bool,
    pub stop_on_error: bool,

    /// Upper bound on a single installer run.
    pub installer_timeout_secs: u64,

    pub log_dir: Utf8PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            weidu_exec_path: None,
            game_dirs: IndexMap::new(),
            extracted_mod_cache_dir: None,
            default_lang: "en_us".to_string(),
            num_retries: 0,
            stop_on_warning: false,
            stop_on_error: true,
            installer_timeout_secs: 3600,
            log_dir: Utf8PathBuf::from("logs"),
        }
    }
}

/// Policy values a build file may leave out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDefaults {
    pub lang: String,
    pub num_retries: u32,
    pub stop_on_warning: bool,
    pub stop_on_error: bool,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        ToolConfig::default().plan_defaults()
    }
}

impl ToolConfig {
    pub fn plan_defaults(&self) -> PlanDefaults {
        PlanDefaults {
            lang: self.default_lang.clone(),
            num_retries: self.num_retries,
            stop_on_warning: self.stop_on_warning,
            stop_on_error: self.stop_on_error,
        }
    }

    /// Configured directory for a game key, ignoring case.
    pub fn game_dir(&self, key: &str) -> Option<&Utf8PathBuf> {
        self.game_dirs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn weidu_exec(&self) -> Utf8PathBuf {
        self.weidu_exec_path
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("weidu"))
    }
}
