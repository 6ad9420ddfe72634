use super::build::ComponentEntry;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// File name of the per-mod hint record inside an extracted mod directory.
pub const HINT_FILE_NAME: &str = ".jenga_hint.json";

/// WeiDU language codes and the directory names mods commonly declare for them.
const LANGUAGE_NAMES: &[(&str, &[&str])] = &[
    ("en_us", &["english", "american", "american english", "en", "en_gb"]),
    ("fr_fr", &["french", "francais", "français", "fr"]),
    ("de_de", &["german", "deutsch", "de"]),
    ("es_es", &["spanish", "castellano", "espanol", "español", "es"]),
    ("it_it", &["italian", "italiano", "it"]),
    ("pl_pl", &["polish", "polski", "pl"]),
    ("ru_ru", &["russian", "russkiy", "ru"]),
    ("pt_br", &["portuguese", "brazilian", "portugues", "pt"]),
    ("cs_cz", &["czech", "cestina", "cz", "cs"]),
    ("zh_cn", &["chinese", "schinese", "zh"]),
    ("ja_jp", &["japanese", "ja"]),
    ("ko_kr", &["korean", "ko"]),
    ("uk_ua", &["ukrainian", "uk"]),
    ("tr_tr", &["turkish", "tr"]),
    ("hu_hu", &["hungarian", "magyar", "hu"]),
    ("sv_se", &["swedish", "svenska", "sv"]),
];

/// The language code a code or language directory name stands for.
fn language_code(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase().replace('-', "_");
    LANGUAGE_NAMES
        .iter()
        .find(|(code, names)| *code == name || names.contains(&name.as_str()))
        .map(|(code, _)| *code)
}

/// Learned metadata about one mod.
///
/// Hint records fill gaps in build-file entries; they never override a value the
/// build file states explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintRecord {
    pub mod_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Language directories in `LANGUAGE` declaration order. The position of a
    /// language in this list is the installer's `--language` selector.
    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub components: Vec<ComponentEntry>,

    #[serde(default)]
    pub aliases: Vec<String>,

    /// Mods this one must be installed before.
    #[serde(default)]
    pub before: Vec<String>,

    /// Mods this one must be installed after.
    #[serde(default)]
    pub after: Vec<String>,

    /// Main `.tp2` file, relative to the extracted mod directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_tp2_fpath: Option<Utf8PathBuf>,

    /// Where the mod was extracted. Implied by the hint file's location, so it is
    /// only persisted in the aggregated mod index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_dir: Option<Utf8PathBuf>,
}

impl HintRecord {
    /// Position of `lang` in the supported language list.
    ///
    /// An exact case-insensitive match wins. Otherwise a language code such as
    /// `en_us` matches a directory name such as `english`, and vice versa.
    pub fn language_index(&self, lang: &str) -> Option<u32> {
        let exact = self.languages.iter().position(|l| l.eq_ignore_ascii_case(lang));
        let position = exact.or_else(|| {
            let code = language_code(lang)?;
            self.languages
                .iter()
                .position(|l| language_code(l) == Some(code))
        });
        position.and_then(|i| u32::try_from(i).ok())
    }

    pub fn component_description(&self, number: u32) -> Option<&str> {
        self.components
            .iter()
            .find(|c| c.number == number)
            .map(|c| c.description.as_str())
    }

    /// The `.tp2` path as it appears once the mod directory is copied into the game
    /// directory, i.e. `<mod dir name>/<main tp2>`.
    pub fn game_relative_tp2(&self) -> Option<Utf8PathBuf> {
        let tp2 = self.main_tp2_fpath.as_deref()?;
        let dir_name = self.extracted_dir.as_deref().and_then(Utf8Path::file_name)?;
        Some(Utf8Path::new(dir_name).join(tp2))
    }

    /// All names this mod answers to, lowercased, the primary name first.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.mod_name)
            .chain(self.aliases.iter())
            .map(|n| n.to_lowercase())
    }
}
