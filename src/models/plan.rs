//! Validated, hint-enriched build plan.
//!
//! A [`Plan`] is the immutable result of loading a build file: resolved
//! configuration, resolved mods and the flat, ordered list of install steps. Step
//! order is exactly the order of mods and `install_list` entries in the file.

use super::build::{BuildFile, BuildFileFormat, ComponentEntry, ModEntry};
use super::config::PlanDefaults;
use super::hint::HintRecord;
use crate::error::BuildError;
use crate::services::HintCache;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Immutable settings for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub build_name: String,
    pub game: Option<String>,
    pub lang: String,
    pub force_lang_in_weidu_conf: bool,
    /// Pause after this many mods complete in one run. 0 disables pausing.
    pub pause_every_x_mods: u32,
    pub skip_installed_mods: bool,
    pub prefer_mod_index: bool,
    pub confirm_each_install: bool,
    pub num_retries: u32,
    pub stop_on_warning: bool,
    pub stop_on_error: bool,
}

/// A mod entry with every required field filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMod {
    pub name: String,
    pub version: String,
    pub language_int: u32,
    pub install_list: Vec<u32>,
    /// Display-only component catalog.
    pub components: Vec<ComponentEntry>,
    pub prompt_for_manual_install: bool,
    /// Game-relative `.tp2` path learned from the mod index.
    pub tp2_path: Option<Utf8PathBuf>,
    /// Extracted mod directory to copy into the game directory when missing there.
    pub source_dir: Option<Utf8PathBuf>,
}

impl ResolvedMod {
    pub fn component_description(&self, number: u32) -> Option<&str> {
        self.components
            .iter()
            .find(|c| c.number == number)
            .map(|c| c.description.as_str())
    }
}

/// One atomic installer invocation: a single component of a single mod.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstallStep {
    /// Position of the owning mod in [`Plan::mods`].
    pub mod_index: usize,
    pub mod_name: String,
    pub version: String,
    pub component: u32,
}

impl std::fmt::Display for InstallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} #{}", self.mod_name, self.version, self.component)
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub config: BuildConfig,
    pub mods: Vec<ResolvedMod>,
    pub steps: Vec<InstallStep>,
    fingerprint: String,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    build_name: &'a str,
    game: Option<&'a str>,
    lang: &'a str,
    steps: Vec<(&'a str, &'a str, u32, u32)>,
}

impl Plan {
    /// Read and load a build file, picking the format from its extension.
    pub fn from_path(
        path: &Utf8Path,
        defaults: &PlanDefaults,
        hints: Option<&HintCache>,
    ) -> Result<Self, BuildError> {
        let bytes = std::fs::read(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load(&bytes, BuildFileFormat::from_path(path), defaults, hints)
    }

    /// Parse, validate and enrich a build file.
    ///
    /// Hint records only fill fields the build file leaves out. A missing version
    /// or language selector that no hint can supply is a [`BuildError::MissingHint`].
    pub fn load(
        bytes: &[u8],
        format: BuildFileFormat,
        defaults: &PlanDefaults,
        hints: Option<&HintCache>,
    ) -> Result<Self, BuildError> {
        let file = BuildFile::from_slice(bytes, format)?;
        Self::from_build_file(file, defaults, hints)
    }

    pub fn from_build_file(
        file: BuildFile,
        defaults: &PlanDefaults,
        hints: Option<&HintCache>,
    ) -> Result<Self, BuildError> {
        let raw = file
            .config
            .ok_or_else(|| BuildError::schema("missing 'config' section"))?;

        let build_name = raw
            .build_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BuildError::schema("config.build_name is required"))?;

        let config = BuildConfig {
            build_name,
            game: raw.game.filter(|g| !g.trim().is_empty()),
            lang: raw
                .lang
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| defaults.lang.clone()),
            force_lang_in_weidu_conf: raw.force_lang_in_weidu_conf,
            pause_every_x_mods: raw.pause_every_x_mods.unwrap_or(0),
            skip_installed_mods: raw.skip_installed_mods,
            prefer_mod_index: raw.prefer_mod_index,
            confirm_each_install: raw.confirm_each_install,
            num_retries: raw.num_retries.unwrap_or(defaults.num_retries),
            stop_on_warning: raw.stop_on_warning.unwrap_or(defaults.stop_on_warning),
            stop_on_error: raw.stop_on_error.unwrap_or(defaults.stop_on_error),
        };

        if file.mods.is_empty() {
            return Err(BuildError::schema("mod list is empty"));
        }

        let mut mods = Vec::with_capacity(file.mods.len());
        for (position, entry) in file.mods.into_iter().enumerate() {
            validate_entry(position, &entry)?;
            let hint = hints.and_then(|cache| cache.lookup(&entry.name));
            mods.push(resolve_mod(entry, hint, &config)?);
        }

        check_order_constraints(&mods, hints);

        let steps = mods
            .iter()
            .enumerate()
            .flat_map(|(mod_index, m)| {
                m.install_list.iter().map(move |&component| InstallStep {
                    mod_index,
                    mod_name: m.name.clone(),
                    version: m.version.clone(),
                    component,
                })
            })
            .collect::<Vec<_>>();

        let fingerprint = compute_fingerprint(&config, &mods, &steps)?;

        tracing::debug!(
            "Loaded build plan '{}': {} mods, {} steps, fingerprint {}",
            config.build_name,
            mods.len(),
            steps.len(),
            fingerprint
        );

        Ok(Self {
            config,
            mods,
            steps,
            fingerprint,
        })
    }

    /// SHA-256 over the identity-bearing config and the ordered step identities.
    ///
    /// Policy flags (retries, stop/pause/skip/confirm) are not part of it, so a
    /// build can be resumed with a changed policy.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn mod_for(&self, step: &InstallStep) -> &ResolvedMod {
        &self.mods[step.mod_index]
    }

    pub fn is_first_step_of_mod(&self, index: usize) -> bool {
        index == 0 || self.steps[index - 1].mod_index != self.steps[index].mod_index
    }

    pub fn is_last_step_of_mod(&self, index: usize) -> bool {
        index + 1 >= self.steps.len() || self.steps[index + 1].mod_index != self.steps[index].mod_index
    }
}

fn validate_entry(position: usize, entry: &ModEntry) -> Result<(), BuildError> {
    if entry.name.trim().is_empty() {
        return Err(BuildError::schema(format!(
            "mod #{} has an empty 'mod' identifier",
            position + 1
        )));
    }

    if entry.install_list.as_slice().is_empty() {
        return Err(BuildError::schema(format!(
            "mod '{}' has an empty install_list",
            entry.name
        )));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = entry.install_list.as_slice().iter().find(|c| !seen.insert(**c)) {
        return Err(BuildError::schema(format!(
            "mod '{}' lists component {} more than once",
            entry.name, dup
        )));
    }

    Ok(())
}

fn resolve_mod(
    entry: ModEntry,
    hint: Option<&HintRecord>,
    config: &BuildConfig,
) -> Result<ResolvedMod, BuildError> {
    let version = entry
        .version
        .filter(|v| !v.trim().is_empty())
        .or_else(|| hint.and_then(|h| h.version.clone()))
        .ok_or_else(|| BuildError::MissingHint {
            mod_name: entry.name.clone(),
            field: "version",
        })?;

    let language_int = entry
        .language_int
        .or_else(|| hint.and_then(|h| h.language_index(&config.lang)))
        .ok_or_else(|| BuildError::MissingHint {
            mod_name: entry.name.clone(),
            field: "language_int",
        })?;

    let mut components = entry.components;
    if let Some(hint) = hint {
        for component in components.iter_mut().filter(|c| c.description.is_empty()) {
            if let Some(description) = hint.component_description(component.number) {
                component.description = description.to_string();
            }
        }
        for &number in entry.install_list.as_slice() {
            if components.iter().any(|c| c.number == number) {
                continue;
            }
            if let Some(description) = hint.component_description(number) {
                components.push(ComponentEntry {
                    number,
                    description: description.to_string(),
                });
            }
        }
    }

    let (tp2_path, source_dir) = match hint {
        Some(h) if config.prefer_mod_index => (h.game_relative_tp2(), h.extracted_dir.clone()),
        _ => (None, None),
    };

    Ok(ResolvedMod {
        name: entry.name,
        version,
        language_int,
        install_list: entry.install_list.0,
        components,
        prompt_for_manual_install: entry.prompt_for_manual_install,
        tp2_path,
        source_dir,
    })
}

/// Warn about declared `before`/`after` constraints the build order breaks.
fn check_order_constraints(mods: &[ResolvedMod], hints: Option<&HintCache>) {
    let Some(cache) = hints else {
        return;
    };

    let position = |name: &str| -> Option<usize> {
        mods.iter()
            .position(|m| m.name.eq_ignore_ascii_case(name))
    };

    for (index, m) in mods.iter().enumerate() {
        let Some(hint) = cache.lookup(&m.name) else {
            continue;
        };
        for other in &hint.before {
            if let Some(other_index) = position(other).filter(|&i| i < index) {
                tracing::warn!(
                    "Mod '{}' should be installed before '{}', but the build installs it after (positions {} and {})",
                    m.name,
                    other,
                    index + 1,
                    other_index + 1
                );
            }
        }
        for other in &hint.after {
            if let Some(other_index) = position(other).filter(|&i| i > index) {
                tracing::warn!(
                    "Mod '{}' should be installed after '{}', but the build installs it before (positions {} and {})",
                    m.name,
                    other,
                    index + 1,
                    other_index + 1
                );
            }
        }
    }
}

fn compute_fingerprint(
    config: &BuildConfig,
    mods: &[ResolvedMod],
    steps: &[InstallStep],
) -> Result<String, BuildError> {
    let input = FingerprintInput {
        build_name: &config.build_name,
        game: config.game.as_deref(),
        lang: &config.lang,
        steps: steps
            .iter()
            .map(|s| {
                (
                    s.mod_name.as_str(),
                    s.version.as_str(),
                    s.component,
                    mods[s.mod_index].language_int,
                )
            })
            .collect(),
    };

    let bytes = serde_json::to_vec(&input).map_err(|e| BuildError::Serialize(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
