//! `weidu.log` parsing.
//!
//! WeiDU records every installed component in the game directory's `weidu.log`:
//!
//! ```text
//! ~EET/EET.TP2~ #0 #0 // EET core (resource importation): V13.4
//! ~SETUP-BG1NPC.TP2~ #0 #2 // Imoen Friendship
//! ```
//!
//! The log serves two purposes: it tells the orchestrator which steps are already
//! installed, and it can be converted into a build file that reproduces the game.

use crate::error::BuildError;
use crate::models::{
    BuildFile, BuildFileConfig, BuildFileFormat, ComponentEntry, InstallList, InstallStep, ModEntry,
    ResolvedMod,
};
use crate::orchestrator::InstallLedger;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::io;
use std::sync::LazyLock;

/// Version recorded for components whose log line carries no version.
pub const UNVERSIONED_MOD_MARKER: &str = "UNVERSIONED";

pub const WEIDU_LOG_FILE_NAME: &str = "weidu.log";

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^~((?:[^~]*[/\\])?)([^~/\\]+)\.tp2~\s+#(\d+)\s+#(\d+)\s+//\s*(.*)$")
        .expect("Invalid weidu.log line regex")
});

/// One mod as recorded in `weidu.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledMod {
    pub name: String,
    pub version: String,
    pub language_int: u32,
    /// `.tp2` path as written in the log, relative to the game directory.
    pub tp2_path: String,
    /// Installed components in log order.
    pub components: Vec<ComponentEntry>,
}

impl InstalledMod {
    pub fn has_component(&self, number: u32) -> bool {
        self.components.iter().any(|c| c.number == number)
    }

    /// Whether the log's version matches `version`. Unversioned entries match any.
    pub fn version_matches(&self, version: &str) -> bool {
        self.version == UNVERSIONED_MOD_MARKER || versions_match(&self.version, version)
    }

    /// Same version and exactly these components, in any order.
    pub fn is_identical(&self, version: &str, components: &[u32]) -> bool {
        self.version_matches(version)
            && self.components.len() == components.len()
            && components.iter().all(|&c| self.has_component(c))
    }
}

/// Everything `weidu.log` says is installed, keyed by lowercase mod name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledMods {
    mods: IndexMap<String, InstalledMod>,
}

/// `V13.4`, `v13.4` and `13.4` are the same version.
fn versions_match(a: &str, b: &str) -> bool {
    let trim = |v: &str| v.trim().trim_start_matches(['v', 'V']).to_lowercase();
    trim(a) == trim(b)
}

impl InstalledMods {
    /// Parse `weidu.log` contents. Comments, blank lines and unrecognised lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut mods: IndexMap<String, InstalledMod> = IndexMap::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let Some(caps) = LOG_LINE.captures(line) else {
                tracing::debug!("Ignoring unrecognised weidu.log line: {}", line);
                continue;
            };

            let dir = &caps[1];
            let stem = &caps[2];
            let name = dir
                .split(['/', '\\'])
                .find(|part| !part.is_empty())
                .unwrap_or(stem)
                .to_lowercase();
            let name = name.strip_prefix("setup-").unwrap_or(&name).to_string();

            let (Ok(language_int), Ok(number)) = (caps[3].parse::<u32>(), caps[4].parse::<u32>())
            else {
                tracing::debug!("Ignoring weidu.log line with oversized numbers: {}", line);
                continue;
            };

            let trailer = caps[5].trim();
            let (description, version) = match trailer.rsplit_once(": ") {
                Some((description, version)) => (description.trim(), version.trim()),
                None => (trailer, UNVERSIONED_MOD_MARKER),
            };

            let tp2_path = format!("{}{}.tp2", dir, stem);
            let entry = mods.entry(name.clone()).or_insert_with(|| InstalledMod {
                name,
                version: version.to_string(),
                language_int,
                tp2_path,
                components: Vec::new(),
            });

            if !entry.has_component(number) {
                entry.components.push(ComponentEntry {
                    number,
                    description: description.to_string(),
                });
            }
        }

        Self { mods }
    }

    /// Read `weidu.log` from a game directory. A missing log means nothing is installed.
    pub fn from_game_dir(game_dir: &Utf8Path) -> io::Result<Self> {
        Self::from_log_file(&game_dir.join(WEIDU_LOG_FILE_NAME))
    }

    pub fn from_log_file(path: &Utf8Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let mods = Self::parse(&content);
                tracing::info!("Read {} installed mods from {}", mods.len(), path);
                Ok(mods)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No {} found; assuming nothing is installed", path);
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn get(&self, mod_name: &str) -> Option<&InstalledMod> {
        self.mods.get(&mod_name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledMod> {
        self.mods.values()
    }

    /// Whether the log shows this component of this mod version as installed.
    ///
    /// Components logged without a version match any version.
    pub fn has_component(&self, mod_name: &str, version: &str, component: u32) -> bool {
        self.get(mod_name)
            .is_some_and(|m| m.version_matches(version) && m.has_component(component))
    }

    /// A build file that reinstalls everything in the log, in log order.
    pub fn to_build_file(&self, build_name: &str) -> BuildFile {
        BuildFile {
            config: Some(BuildFileConfig {
                build_name: Some(build_name.to_string()),
                ..BuildFileConfig::default()
            }),
            mods: self
                .mods
                .values()
                .map(|m| ModEntry {
                    name: m.name.clone(),
                    version: Some(m.version.clone()),
                    language_int: Some(m.language_int),
                    install_list: InstallList(m.components.iter().map(|c| c.number).collect()),
                    components: m.components.clone(),
                    prompt_for_manual_install: false,
                })
                .collect(),
        }
    }
}

impl InstallLedger for InstalledMods {
    fn is_installed(&self, step: &InstallStep) -> bool {
        self.has_component(&step.mod_name, &step.version, step.component)
    }

    fn installed_differently(&self, resolved: &ResolvedMod) -> bool {
        self.get(&resolved.name)
            .is_some_and(|m| !m.is_identical(&resolved.version, &resolved.install_list))
    }
}

/// Convert a `weidu.log` into a build file.
///
/// Without an explicit output path the file is written next to the log as
/// `<timestamp>_jenga_build_from_weidu_log.<json|yaml>`. Returns the written path.
pub fn weidu_log_to_build_file(
    log_path: &Utf8Path,
    output: Option<&Utf8Path>,
    format: BuildFileFormat,
) -> Result<Utf8PathBuf, BuildError> {
    let content = fs::read_to_string(log_path).map_err(|source| BuildError::Io {
        path: log_path.to_path_buf(),
        source,
    })?;
    let installed = InstalledMods::parse(&content);
    if installed.is_empty() {
        tracing::warn!("No installed components found in {}", log_path);
    }

    let timestamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S").to_string();
    let build_name = format!("{}_build_from_weidu_log", timestamp);
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => log_path
            .parent()
            .unwrap_or_else(|| Utf8Path::new("."))
            .join(format!("{}_jenga_build_from_weidu_log.{}", timestamp, format.extension())),
    };

    let text = installed.to_build_file(&build_name).to_string_pretty(format)?;
    fs::write(&output, text).map_err(|source| BuildError::Io {
        path: output.clone(),
        source,
    })?;

    tracing::info!(
        "Wrote build file with {} mods from {} to {}",
        installed.len(),
        log_path,
        output
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
// Log of Currently Installed WeiDU Mods
// The top of the file is the 'oldest' mod
// ~TP2_File~ #language_number #component_number // [Subcomponent Name -> ] Component Name [ : Version]
~EET/EET.TP2~ #0 #0 // EET core (resource importation): V13.4
~SETUP-BG1NPC.TP2~ #0 #2 // Imoen Friendship
~CDTWEAKS\\SETUP-CDTWEAKS.TP2~ #1 #1060 // Remove Helmet Animations: v16
~EET/EET.TP2~ #0 #0 // EET core (resource importation): V13.4
~SCS/SCS.TP2~ #0 #2000 // Smarter Mages -> Potions: Always: v35.17
";

    #[test]
    fn test_parse_weidu_log() {
        let mods = InstalledMods::parse(LOG);
        assert_eq!(mods.len(), 4);

        let eet = mods.get("EET").unwrap();
        assert_eq!(eet.version, "V13.4");
        assert_eq!(eet.language_int, 0);
        assert_eq!(eet.tp2_path, "EET/EET.tp2");
        assert_eq!(eet.components.len(), 1);
        assert_eq!(eet.components[0].description, "EET core (resource importation)");

        let npc = mods.get("bg1npc").unwrap();
        assert_eq!(npc.version, UNVERSIONED_MOD_MARKER);
        assert_eq!(npc.components[0].number, 2);

        let tweaks = mods.get("cdtweaks").unwrap();
        assert_eq!(tweaks.language_int, 1);
        assert_eq!(tweaks.version, "v16");

        let scs = mods.get("scs").unwrap();
        assert_eq!(scs.version, "v35.17");
        assert_eq!(scs.components[0].description, "Smarter Mages -> Potions: Always");
    }

    #[test]
    fn test_has_component_version_rules() {
        let mods = InstalledMods::parse(LOG);
        assert!(mods.has_component("eet", "13.4", 0));
        assert!(mods.has_component("eet", "V13.4", 0));
        assert!(!mods.has_component("eet", "13.5", 0));
        assert!(!mods.has_component("eet", "13.4", 1));
        // unversioned entries match any version
        assert!(mods.has_component("bg1npc", "v30", 2));
        assert!(!mods.has_component("unknown", "1", 0));
    }

    fn resolved(name: &str, version: &str, install_list: &[u32]) -> ResolvedMod {
        ResolvedMod {
            name: name.to_string(),
            version: version.to_string(),
            language_int: 0,
            install_list: install_list.to_vec(),
            components: Vec::new(),
            prompt_for_manual_install: false,
            tp2_path: None,
            source_dir: None,
        }
    }

    #[test]
    fn test_installed_differently() {
        let mods = InstalledMods::parse(LOG);
        // Identical: same version, same components
        assert!(!mods.installed_differently(&resolved("eet", "v13.4", &[0])));
        assert!(!mods.installed_differently(&resolved("bg1npc", "v30", &[2])));
        // Not installed at all is not "different"
        assert!(!mods.installed_differently(&resolved("ascension", "1", &[0])));

        assert!(mods.installed_differently(&resolved("eet", "13.5", &[0])));
        assert!(mods.installed_differently(&resolved("eet", "13.4", &[0, 7])));
        assert!(mods.installed_differently(&resolved("cdtweaks", "v16", &[1070])));
    }

    #[test]
    fn test_to_build_file_keeps_log_order() {
        let file = InstalledMods::parse(LOG).to_build_file("restored");
        let names: Vec<_> = file.mods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["eet", "bg1npc", "cdtweaks", "scs"]);
        assert_eq!(file.mods[2].install_list.as_slice(), &[1060]);
        assert_eq!(
            file.config.unwrap().build_name.as_deref(),
            Some("restored")
        );
    }

    #[test]
    fn test_missing_log_is_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        assert!(InstalledMods::from_game_dir(&dir).unwrap().is_empty());
    }
}
