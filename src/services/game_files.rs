//! Files the installer needs inside the game directory.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use walkdir::WalkDir;

/// Installer config file WeiDU reads from the game directory.
pub const WEIDU_CONF: &str = "weidu.conf";

/// Find a mod's `.tp2` in the game directory.
///
/// Tries the hint path first, then the usual WeiDU layouts. Matching is
/// case-insensitive so `EET/EET.TP2` is found for mod `eet`. Returns the path
/// relative to `game_dir`.
pub fn locate_tp2(
    game_dir: &Utf8Path,
    mod_name: &str,
    tp2_hint: Option<&Utf8Path>,
) -> Option<Utf8PathBuf> {
    let mut candidates: Vec<Utf8PathBuf> = Vec::new();
    if let Some(hint) = tp2_hint {
        candidates.push(hint.to_path_buf());
    }
    candidates.extend([
        Utf8PathBuf::from(format!("{m}/setup-{m}.tp2", m = mod_name)),
        Utf8PathBuf::from(format!("{m}/{m}.tp2", m = mod_name)),
        Utf8PathBuf::from(format!("setup-{}.tp2", mod_name)),
        Utf8PathBuf::from(format!("{}.tp2", mod_name)),
    ]);

    candidates
        .iter()
        .find_map(|candidate| resolve_case_insensitive(game_dir, candidate))
}

/// Resolve `relative` under `base`, matching each component case-insensitively.
fn resolve_case_insensitive(base: &Utf8Path, relative: &Utf8Path) -> Option<Utf8PathBuf> {
    let exact = base.join(relative);
    if exact.is_file() {
        return Some(relative.to_path_buf());
    }

    let mut current = base.to_path_buf();
    let mut resolved = Utf8PathBuf::new();
    for component in relative.components() {
        let wanted = component.as_str();
        let entry = fs::read_dir(&current)
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .find(|name| name.eq_ignore_ascii_case(wanted))?;
        current.push(&entry);
        resolved.push(&entry);
    }

    current.is_file().then_some(resolved)
}

/// Copy an extracted mod directory into the game directory unless it is already there.
///
/// Returns `true` when files were copied.
pub fn stage_mod_dir(source: &Utf8Path, game_dir: &Utf8Path) -> io::Result<bool> {
    let Some(dir_name) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("mod source {} has no directory name", source),
        ));
    };

    let target = game_dir.join(dir_name);
    if target.exists() {
        return Ok(false);
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let destination = target.as_std_path().join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            fs::copy(entry.path(), &destination)?;
        }
    }

    tracing::info!("Copied {} into {}", source, game_dir);
    Ok(true)
}

/// Point `weidu.conf`'s `lang_dir` at `lang`, creating the file if needed.
pub fn update_weidu_conf(game_dir: &Utf8Path, lang: &str) -> io::Result<()> {
    let path = game_dir.join(WEIDU_CONF);
    let line = format!("lang_dir = {}", lang);

    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|l| {
            if l.trim_start().to_ascii_lowercase().starts_with("lang_dir") {
                replaced = true;
                line.clone()
            } else {
                l.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(line);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content)?;

    tracing::debug!("Set lang_dir = {} in {}", lang, path);
    Ok(())
}
