//! Game directory resolution.
//!
//! Build files name the target game loosely (`bg2ee`, `"Baldur's Gate II"`,
//! `BG2:EE`). This module maps those names onto the canonical keys used in the
//! tool configuration's `game_dirs` table.
//!
//! # Examples
//!
//! ```ignore
//! use jenga::services::game_dirs::canonical_game_key;
//!
//! assert_eq!(canonical_game_key("Baldur's Gate II"), Some("bg2ee"));
//! assert_eq!(canonical_game_key("Icewind Dale"), Some("iwdee"));
//! ```

use crate::error::BuildError;
use crate::models::ToolConfig;
use camino::{Utf8Path, Utf8PathBuf};

/// Canonical game keys and the names they answer to, compared after normalization.
const GAME_ALIASES: &[(&str, &[&str])] = &[
    (
        "bgee",
        &["bgee", "bg1ee", "bg1", "bg", "baldursgate", "baldursgateenhancededition"],
    ),
    (
        "bg2ee",
        &[
            "bg2ee",
            "bg2",
            "bgii",
            "baldursgate2",
            "baldursgateii",
            "baldursgateiienhancededition",
            "eet",
        ],
    ),
    (
        "iwdee",
        &["iwdee", "iwd", "iwd1", "icewinddale", "icewinddaleenhancededition"],
    ),
    ("iwd2ee", &["iwd2ee", "iwd2", "icewinddale2", "icewinddaleii"]),
    (
        "pstee",
        &["pstee", "pst", "planescape", "planescapetorment", "planescapetormentenhancededition"],
    ),
];

/// Lowercase and drop everything that is not a letter or digit.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Map a loose game name onto its canonical key.
pub fn canonical_game_key(name: &str) -> Option<&'static str> {
    let normalized = normalize(name);
    GAME_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&normalized.as_str()))
        .map(|(key, _)| *key)
}

/// Resolve the target game directory.
///
/// An explicit override wins. Otherwise the build's game is looked up in the
/// configured `game_dirs`, first by its canonical key, then verbatim. With no game
/// named, a single configured directory is used.
pub fn resolve_game_dir(
    override_dir: Option<&Utf8Path>,
    game: Option<&str>,
    config: &ToolConfig,
) -> Result<Utf8PathBuf, BuildError> {
    if let Some(dir) = override_dir {
        tracing::debug!("Using game directory override {}", dir);
        return Ok(dir.to_path_buf());
    }

    if let Some(game) = game {
        let found = canonical_game_key(game)
            .and_then(|key| config.game_dir(key))
            .or_else(|| config.game_dir(game));

        return match found {
            Some(dir) => {
                tracing::info!("Resolved game '{}' to {}", game, dir);
                Ok(dir.clone())
            }
            None => Err(BuildError::GameDirUnresolved(format!(
                "no directory configured for game '{}'; set game_dirs.{} in the config file or pass --game-dir",
                game,
                canonical_game_key(game).unwrap_or(game)
            ))),
        };
    }

    let mut configured = config.game_dirs.iter();
    match (configured.next(), configured.next()) {
        (Some((key, dir)), None) => {
            tracing::info!("Build names no game; using the only configured one ({})", key);
            Ok(dir.clone())
        }
        (None, _) => Err(BuildError::GameDirUnresolved(
            "the build names no game and no game directories are configured; pass --game-dir"
                .to_string(),
        )),
        _ => Err(BuildError::GameDirUnresolved(
            "the build names no game and several game directories are configured; pass --game-dir"
                .to_string(),
        )),
    }
}
