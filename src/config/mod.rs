use crate::models::ToolConfig;
use crate::services::{MarkerTable, OutputClassifier};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, Map};
use std::fs;

/// Prefix of environment variables that override the config file, e.g.
/// `JENGA__NUM_RETRIES=2` or `JENGA__GAME_DIRS__BG2EE=/games/bg2ee`.
pub const ENV_PREFIX: &str = "JENGA";

/// Configuration manager for the tool's config directory.
///
/// Manages:
/// - Tool config (`cfg.yaml`): installer path, game directories, policy defaults
/// - Marker table (`markers.yaml`): installer output classification, optional
/// - Mod index (`mod_index.json`): written by `populate-mod-index`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    tool_config_path: Utf8PathBuf,
    marker_table_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., `~/.config/jenga`)
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            tool_config_path: config_dir.join("cfg.yaml"),
            marker_table_path: config_dir.join("markers.yaml"),
            config_dir,
        })
    }

    /// Use `config_file` instead of `cfg.yaml`; its directory becomes the config directory.
    pub fn with_config_file<P: AsRef<Utf8Path>>(config_file: P) -> Result<Self> {
        let config_file = config_file.as_ref();
        let dir = config_file
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let mut manager = Self::new(dir)?;
        manager.tool_config_path = config_file.to_path_buf();
        Ok(manager)
    }

    /// `<platform config dir>/jenga`, e.g. `~/.config/jenga` on Linux.
    pub fn default_config_dir() -> Result<Utf8PathBuf> {
        let base = dirs::config_dir().context("Cannot determine the user config directory")?;
        let base = Utf8PathBuf::try_from(base).context("User config directory is not valid UTF-8")?;
        Ok(base.join("jenga"))
    }

    /// Load the tool config, merging `JENGA__*` environment variables over the file.
    ///
    /// # Returns
    /// The loaded ToolConfig; defaults fill anything neither source sets
    pub fn load_tool_config(&self) -> Result<ToolConfig> {
        self.load_tool_config_with_env(None)
    }

    /// Like [`load_tool_config`](Self::load_tool_config), reading environment
    /// variables from `env` instead of the process environment when given.
    pub fn load_tool_config_with_env(&self, env: Option<Map<String, String>>) -> Result<ToolConfig> {
        if self.tool_config_path.exists() {
            tracing::info!("Loading tool config from {}", self.tool_config_path);
        } else {
            tracing::warn!(
                "Tool config file not found at {}, using defaults",
                self.tool_config_path
            );
        }

        let settings = Config::builder()
            .add_source(File::from(self.tool_config_path.as_std_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read tool config: {}", self.tool_config_path))?;

        let config: ToolConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse tool config: {}", self.tool_config_path))?;

        Ok(config)
    }

    /// Save the tool config file.
    pub fn save_tool_config(&self, config: &ToolConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize tool config to YAML")?;

        fs::write(&self.tool_config_path, yaml_string)
            .with_context(|| format!("Failed to write tool config: {}", self.tool_config_path))?;

        tracing::info!("Saved tool config to {}", self.tool_config_path);
        Ok(())
    }

    /// Load the marker table, falling back to the built-in WeiDU markers.
    pub fn load_marker_table(&self) -> Result<MarkerTable> {
        if !self.marker_table_path.exists() {
            tracing::debug!(
                "No marker table at {}, using built-in WeiDU markers",
                self.marker_table_path
            );
            return Ok(MarkerTable::default());
        }

        let file_contents = fs::read_to_string(&self.marker_table_path).with_context(|| {
            format!("Failed to read marker table: {}", self.marker_table_path)
        })?;

        let table: MarkerTable = serde_yaml_ng::from_str(&file_contents).with_context(|| {
            format!("Failed to parse marker table: {}", self.marker_table_path)
        })?;

        tracing::info!("Loaded marker table from {}", self.marker_table_path);
        Ok(table)
    }

    /// Compiled output classifier from the marker table.
    pub fn load_classifier(&self) -> Result<OutputClassifier> {
        let table = self.load_marker_table()?;
        OutputClassifier::new(&table)
            .with_context(|| format!("Invalid marker table: {}", self.marker_table_path))
    }

    /// Path of the persisted mod index.
    pub fn mod_index_path(&self) -> Utf8PathBuf {
        self.config_dir.join("mod_index.json")
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn tool_config_path(&self) -> &Utf8Path {
        &self.tool_config_path
    }
}
