//! Preserve outputs of a previous attempt before the next one overwrites them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// First `stem{k}.ext` (k = 0, 1, ...) next to `path` that does not exist.
pub fn archive_name(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("artifact");
    let ext = path.extension().and_then(|s| s.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    (0u32..)
        .map(|k| match ext {
            Some(ext) => parent.join(format!("{}{}.{}", stem, k, ext)),
            None => parent.join(format!("{}{}", stem, k)),
        })
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.with_extension("old"))
}

/// Rename `path` out of the way. Returns the new location, or `None` when
/// there was nothing to move.
pub fn archive(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let dest = archive_name(path);
    fs::rename(path, &dest)
        .with_context(|| format!("failed to archive {} -> {}", path.display(), dest.display()))?;
    Ok(Some(dest))
}

/// Archive every existing path in `paths`.
pub fn archive_all(paths: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut moved = Vec::new();
    for p in paths {
        if let Some(dest) = archive(p)? {
            moved.push((p.clone(), dest));
        }
    }
    Ok(moved)
}

/// Move `from` to `to`, replacing `to` only after archiving it.
pub fn promote(from: &Path, to: &Path) -> Result<()> {
    archive(to)?;
    fs::rename(from, to)
        .with_context(|| format!("failed to rename {} -> {}", from.display(), to.display()))
}
