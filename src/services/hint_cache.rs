//! Learned per-mod metadata.
//!
//! Each extracted mod directory may carry a `.jenga_hint.json`; `populate` scans the
//! extracted-mod cache, reads those files, asks a [`HintExtractor`] about
//! directories without one, and builds an in-memory index that is persisted as
//! `mod_index.json`. Builds load the index read-only.

use crate::models::{HINT_FILE_NAME, HintRecord};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::LazyLock;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum HintCacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize hint data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Hint record for {0} has no extracted directory to store it in")]
    MissingExtractedDir(String),
}

/// Learns a [`HintRecord`] from an extracted mod directory.
pub trait HintExtractor {
    fn extract(&self, mod_dir: &Utf8Path) -> Option<HintRecord>;
}

/// Keyed store of hint records with case-insensitive, alias-aware lookup.
#[derive(Debug, Clone, Default)]
pub struct HintCache {
    records: IndexMap<String, HintRecord>,
    aliases: HashMap<String, String>,
}

impl HintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HintRecord> {
        self.records.values()
    }

    /// Find a record by mod name or alias, ignoring case.
    pub fn lookup(&self, mod_name: &str) -> Option<&HintRecord> {
        let key = mod_name.to_lowercase();
        self.records.get(&key).or_else(|| {
            self.aliases
                .get(&key)
                .and_then(|primary| self.records.get(primary))
        })
    }

    /// Add a record to the in-memory index only.
    pub fn insert(&mut self, record: HintRecord) {
        let key = record.mod_name.to_lowercase();
        for alias in record.names().skip(1) {
            if alias != key {
                self.aliases.insert(alias, key.clone());
            }
        }
        self.records.insert(key, record);
    }

    /// Write `record` as the hint file of its extracted directory and index it.
    pub fn store(&mut self, mod_name: &str, mut record: HintRecord) -> Result<(), HintCacheError> {
        if record.mod_name.is_empty() {
            record.mod_name = mod_name.to_lowercase();
        }
        let dir = record
            .extracted_dir
            .clone()
            .ok_or_else(|| HintCacheError::MissingExtractedDir(mod_name.to_string()))?;

        // The directory is implied by the file's location
        let on_disk = HintRecord {
            extracted_dir: None,
            ..record.clone()
        };
        let path = dir.join(HINT_FILE_NAME);
        let content = serde_json::to_string_pretty(&on_disk)?;
        fs::write(&path, content).map_err(|source| HintCacheError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!("Stored hint record for {} at {}", record.mod_name, path);
        self.insert(record);
        Ok(())
    }

    /// Build an index from every mod directory under `extracted_dir`.
    ///
    /// Directories that already carry a hint file keep it; gaps in it are filled
    /// from the extractor. Directories without one get a new hint file written.
    pub fn populate(
        extracted_dir: &Utf8Path,
        extractor: &dyn HintExtractor,
    ) -> Result<Self, HintCacheError> {
        let mut cache = Self::new();
        let mut entries = extracted_dir
            .read_dir_utf8()
            .map_err(|source| HintCacheError::Io {
                path: extracted_dir.to_path_buf(),
                source,
            })?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| is_likely_mod_dir_name(e.file_name()))
            .map(|e| e.into_path())
            .collect::<Vec<_>>();
        entries.sort();

        for mod_dir in entries {
            let hint_path = mod_dir.join(HINT_FILE_NAME);
            if hint_path.is_file() {
                let mut record = read_hint_file(&hint_path)?;
                if let Some(learned) = extractor.extract(&mod_dir) {
                    fill_gaps(&mut record, learned);
                }
                record.extracted_dir = Some(mod_dir);
                cache.insert(record);
                continue;
            }

            match extractor.extract(&mod_dir) {
                Some(mut record) => {
                    record.extracted_dir = Some(mod_dir);
                    let name = record.mod_name.clone();
                    cache.store(&name, record)?;
                }
                None => tracing::debug!("No mod found in {}, skipping", mod_dir),
            }
        }

        tracing::info!(
            "Indexed {} mods from {}",
            cache.len(),
            extracted_dir
        );
        Ok(cache)
    }

    /// Load a persisted index. A missing file is an empty index.
    pub fn load_index(path: &Utf8Path) -> Result<Self, HintCacheError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No mod index at {}", path);
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(HintCacheError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let records: IndexMap<String, HintRecord> =
            serde_json::from_str(&content).map_err(|source| HintCacheError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut cache = Self::new();
        for record in records.into_values() {
            cache.insert(record);
        }
        tracing::info!("Loaded mod index with {} mods from {}", cache.len(), path);
        Ok(cache)
    }

    /// Persist the index (temp file + rename).
    pub fn save_index(&self, path: &Utf8Path) -> Result<(), HintCacheError> {
        let io_err = |source| HintCacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(&self.records)?;
        let temp_path = Utf8PathBuf::from(format!("{}.tmp", path));
        fs::write(&temp_path, content).map_err(io_err)?;
        fs::rename(&temp_path, path).map_err(io_err)?;

        tracing::info!("Mod index written to {}", path);
        Ok(())
    }
}

fn is_likely_mod_dir_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    !(lower.starts_with("__") || lower.starts_with('.') || lower == "docs" || lower.ends_with(".app"))
}

fn read_hint_file(path: &Utf8Path) -> Result<HintRecord, HintCacheError> {
    let content = fs::read_to_string(path).map_err(|source| HintCacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| HintCacheError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Copy fields `record` leaves empty from `learned`.
fn fill_gaps(record: &mut HintRecord, learned: HintRecord) {
    if record.mod_name.is_empty() {
        record.mod_name = learned.mod_name;
    }
    if record.version.is_none() {
        record.version = learned.version;
    }
    if record.languages.is_empty() {
        record.languages = learned.languages;
    }
    if record.components.is_empty() {
        record.components = learned.components;
    }
    if record.main_tp2_fpath.is_none() {
        record.main_tp2_fpath = learned.main_tp2_fpath;
    }
    if record.before.is_empty() {
        record.before = learned.before;
    }
    if record.after.is_empty() {
        record.after = learned.after;
    }
    for alias in learned.aliases {
        if !record.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
            record.aliases.push(alias);
        }
    }
}

static VERSION_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*VERSION\s*[~"]([^~"]+)[~"]"#).expect("Invalid VERSION regex")
});

static LANGUAGE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*LANGUAGE\s+[~"][^~"]*[~"]\s+[~"]([^~"]*)[~"]"#)
        .expect("Invalid LANGUAGE regex")
});

/// Reads mod metadata from `.tp2` sources and `[Metadata]` `.ini` files.
///
/// The main `.tp2` is the shortest-named one anywhere in the directory; the mod
/// is named after it, minus any `setup-` prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tp2HintExtractor;

impl Tp2HintExtractor {
    fn main_tp2(mod_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        WalkDir::new(mod_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| Utf8PathBuf::from_path_buf(e.into_path()).ok())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("tp2")))
            .min_by_key(|p| p.file_stem().map_or(usize::MAX, str::len))
    }

    fn read_ini_metadata(mod_dir: &Utf8Path) -> HashMap<String, String> {
        let mut values = HashMap::new();
        let Ok(entries) = mod_dir.read_dir_utf8() else {
            return values;
        };

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("ini")) {
                continue;
            }
            let Ok(bytes) = fs::read(path) else {
                continue;
            };
            let mut in_metadata = false;
            for line in String::from_utf8_lossy(&bytes).lines() {
                let line = line.trim();
                if line.starts_with('[') {
                    in_metadata = line.eq_ignore_ascii_case("[metadata]");
                    continue;
                }
                if in_metadata {
                    if let Some((key, value)) = line.split_once('=') {
                        values.insert(key.trim().to_lowercase(), value.trim().to_string());
                    }
                }
            }
        }
        values
    }
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl HintExtractor for Tp2HintExtractor {
    fn extract(&self, mod_dir: &Utf8Path) -> Option<HintRecord> {
        let tp2 = Self::main_tp2(mod_dir)?;
        let stem = tp2.file_stem()?.to_string();
        let lower = stem.to_lowercase();
        let name = lower.strip_prefix("setup-").unwrap_or(&lower).to_string();

        let source = fs::read(&tp2)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let version = VERSION_DIRECTIVE
            .captures(&source)
            .map(|c| c[1].trim().to_string());
        let languages = LANGUAGE_DIRECTIVE
            .captures_iter(&source)
            .map(|c| c[1].trim().to_string())
            .collect();

        let metadata = Self::read_ini_metadata(mod_dir);
        let mut aliases = Vec::new();
        if lower != name {
            aliases.push(lower.clone());
        }
        if let Some(full_name) = metadata.get("name").filter(|n| !n.eq_ignore_ascii_case(&name)) {
            aliases.push(full_name.clone());
        }

        Some(HintRecord {
            mod_name: name,
            version,
            languages,
            components: Vec::new(),
            aliases,
            before: split_list(metadata.get("before")),
            after: split_list(metadata.get("after")),
            main_tp2_fpath: tp2.strip_prefix(mod_dir).ok().map(Utf8Path::to_path_buf),
            extracted_dir: Some(mod_dir.to_path_buf()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_dir() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn test_lookup_by_alias_and_case() {
        let mut cache = HintCache::new();
        cache.insert(HintRecord {
            mod_name: "stratagems".into(),
            aliases: vec!["SCS".into()],
            ..Default::default()
        });

        assert_eq!(cache.lookup("Stratagems").unwrap().mod_name, "stratagems");
        assert_eq!(cache.lookup("scs").unwrap().mod_name, "stratagems");
        assert!(cache.lookup("eet").is_none());
    }

    #[test]
    fn test_tp2_extractor() {
        let (_temp, dir) = temp_dir();
        let mod_dir = dir.join("EET");
        fs::create_dir_all(mod_dir.join("EET/lib")).unwrap();
        fs::write(
            mod_dir.join("EET/EET.tp2"),
            "BACKUP ~EET/backup~\nVERSION ~V13.4~\nLANGUAGE ~English~ ~english~ ~EET/lang/english/setup.tra~\nLANGUAGE ~Polski~ ~polski~ ~EET/lang/polski/setup.tra~\n",
        )
        .unwrap();
        fs::write(mod_dir.join("EET/lib/EET_end.tp2"), "").unwrap();
        fs::write(
            mod_dir.join("EET.ini"),
            "[Metadata]\nName = Enhanced Edition Trilogy\nAfter = dlcmerger, bgeetweaks\n",
        )
        .unwrap();

        let record = Tp2HintExtractor.extract(&mod_dir).unwrap();
        assert_eq!(record.mod_name, "eet");
        assert_eq!(record.version.as_deref(), Some("V13.4"));
        assert_eq!(record.languages, vec!["english", "polski"]);
        assert_eq!(record.main_tp2_fpath, Some(Utf8PathBuf::from("EET/EET.tp2")));
        assert_eq!(record.after, vec!["dlcmerger", "bgeetweaks"]);
        assert!(record.aliases.contains(&"Enhanced Edition Trilogy".to_string()));
    }

    #[test]
    fn test_populate_writes_hint_files_and_skips_junk() {
        let (_temp, dir) = temp_dir();
        fs::create_dir_all(dir.join("cdtweaks")).unwrap();
        fs::write(dir.join("cdtweaks/setup-cdtweaks.tp2"), "VERSION ~v16~\n").unwrap();
        fs::create_dir_all(dir.join("__MACOSX/cdtweaks")).unwrap();
        fs::write(dir.join("__MACOSX/cdtweaks/x.tp2"), "").unwrap();
        fs::create_dir_all(dir.join("docs")).unwrap();

        let cache = HintCache::populate(&dir, &Tp2HintExtractor).unwrap();

        assert_eq!(cache.len(), 1);
        let record = cache.lookup("cdtweaks").unwrap();
        assert_eq!(record.version.as_deref(), Some("v16"));
        assert!(cache.lookup("setup-cdtweaks").is_some());
        assert!(dir.join("cdtweaks").join(HINT_FILE_NAME).exists());
    }

    #[test]
    fn test_existing_hint_file_wins() {
        let (_temp, dir) = temp_dir();
        let mod_dir = dir.join("scs");
        fs::create_dir_all(&mod_dir).unwrap();
        fs::write(mod_dir.join("stratagems.tp2"), "VERSION ~v35~\n").unwrap();
        fs::write(
            mod_dir.join(HINT_FILE_NAME),
            r#"{"mod_name": "stratagems", "version": "v35.17", "aliases": ["scs"]}"#,
        )
        .unwrap();

        let cache = HintCache::populate(&dir, &Tp2HintExtractor).unwrap();
        let record = cache.lookup("scs").unwrap();
        assert_eq!(record.version.as_deref(), Some("v35.17"));
        assert_eq!(record.main_tp2_fpath, Some(Utf8PathBuf::from("stratagems.tp2")));
        assert_eq!(record.extracted_dir.as_deref(), Some(mod_dir.as_path()));
    }

    #[test]
    fn test_index_round_trip() {
        let (_temp, dir) = temp_dir();
        let mut cache = HintCache::new();
        cache.insert(HintRecord {
            mod_name: "eet".into(),
            version: Some("13.4".into()),
            extracted_dir: Some(dir.join("EET")),
            ..Default::default()
        });

        let index_path = dir.join("config/mod_index.json");
        cache.save_index(&index_path).unwrap();
        let loaded = HintCache::load_index(&index_path).unwrap();

        assert_eq!(loaded.lookup("EET"), cache.lookup("eet"));
        assert!(HintCache::load_index(&dir.join("missing.json")).unwrap().is_empty());
    }

    #[test]
    fn test_store_requires_extracted_dir() {
        let mut cache = HintCache::new();
        let err = cache
            .store("eet", HintRecord::default())
            .unwrap_err();
        assert!(matches!(err, HintCacheError::MissingExtractedDir(_)));
    }
}
