use crate::error::BuildError;
use camino::Utf8Path;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// On-disk format of a build file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFileFormat {
    Json,
    Yaml,
}

impl BuildFileFormat {
    /// `.yaml`/`.yml` files are YAML, everything else is treated as JSON.
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension().map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Json,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// A build file exactly as written by the user.
///
/// Nothing here is validated yet; see [`Plan::load`](crate::models::Plan::load).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BuildFileConfig>,

    #[serde(default)]
    pub mods: Vec<ModEntry>,
}

/// The `config` section of a build file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildFileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default)]
    pub force_lang_in_weidu_conf: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_every_x_mods: Option<u32>,

    #[serde(default)]
    pub skip_installed_mods: bool,

    #[serde(default)]
    pub prefer_mod_index: bool,

    #[serde(default)]
    pub confirm_each_install: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_warning: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_error: Option<bool>,
}

/// One mod's contribution to a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModEntry {
    #[serde(rename = "mod", default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(
        default,
        deserialize_with = "de_opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub language_int: Option<u32>,

    #[serde(default)]
    pub install_list: InstallList,

    #[serde(default)]
    pub components: Vec<ComponentEntry>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub prompt_for_manual_install: bool,
}

/// A `{number, description}` pair from a mod's component catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    #[serde(deserialize_with = "de_number")]
    pub number: u32,

    #[serde(default)]
    pub description: String,
}

/// Ordered component numbers to install.
///
/// Accepts either a list (`[0, 1, "2"]`) or the space-separated string form
/// (`"0 1 2"`) that older build files use. Always serialized as a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InstallList(pub Vec<u32>);

impl InstallList {
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

impl NumOrString {
    fn into_u32(self) -> Result<u32, String> {
        match self {
            Self::Num(n) => u32::try_from(n).map_err(|_| format!("number {} is out of range", n)),
            Self::Str(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("'{}' is not a non-negative integer", s)),
        }
    }
}

fn de_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    NumOrString::deserialize(deserializer)?
        .into_u32()
        .map_err(de::Error::custom)
}

fn de_opt_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Option::<NumOrString>::deserialize(deserializer)?
        .map(|v| v.into_u32().map_err(de::Error::custom))
        .transpose()
}

impl<'de> Deserialize<'de> for InstallList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<NumOrString>),
        }

        let numbers = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text
                .split_whitespace()
                .map(|part| NumOrString::Str(part.to_string()).into_u32())
                .collect::<Result<Vec<_>, _>>(),
            Raw::List(items) => items
                .into_iter()
                .map(NumOrString::into_u32)
                .collect::<Result<Vec<_>, _>>(),
        };

        numbers.map(InstallList).map_err(de::Error::custom)
    }
}

impl BuildFile {
    /// Parse a build file from raw bytes.
    pub fn from_slice(bytes: &[u8], format: BuildFileFormat) -> Result<Self, BuildError> {
        match format {
            BuildFileFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| BuildError::schema(format!("invalid JSON build file: {}", e))),
            BuildFileFormat::Yaml => serde_yaml_ng::from_slice(bytes)
                .map_err(|e| BuildError::schema(format!("invalid YAML build file: {}", e))),
        }
    }

    /// Serialize the build file in the requested format.
    pub fn to_string_pretty(&self, format: BuildFileFormat) -> Result<String, BuildError> {
        match format {
            BuildFileFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| BuildError::Serialize(e.to_string()))
            }
            BuildFileFormat::Yaml => {
                serde_yaml_ng::to_string(self).map_err(|e| BuildError::Serialize(e.to_string()))
            }
        }
    }
}
