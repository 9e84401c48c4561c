//! Filesystem path helpers shared by the materializer and build commands.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

/// The staging root every rewrite materialises into.
pub fn rewrite_root() -> PathBuf {
    std::env::temp_dir().join("mockgraft-rewrite")
}

/// Replace any `@` in a path with `/`.
///
/// Cache layouts that embed `name@version` segments cannot appear verbatim
/// on the right-hand side of a staged dependency redirect; cleaning splits
/// the version into its own path segment.
pub fn clean_staged_path(path: &str) -> String {
    path.replace('@', "/")
}

/// Rebase an absolute path onto `root`, so `/a/b` becomes `<root>/a/b`.
pub fn rebase_onto(root: &Path, abs: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    for comp in abs.components() {
        match comp {
            Component::RootDir | Component::Prefix(_) => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make a path absolute against the current working directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    Ok(cwd.join(path))
}

/// Relative path of `child` under `base`, if `child` is inside `base`.
pub fn rel_path(base: &Path, child: &Path) -> Option<PathBuf> {
    child.strip_prefix(base).ok().map(Path::to_path_buf)
}

/// True when `path` lies under `dir/vendor/`.
pub fn is_vendored(dir: &Path, path: &Path) -> bool {
    if dir.as_os_str().is_empty() {
        return false;
    }
    rel_path(dir, path)
        .map(|rel| rel.components().next().is_some_and(|c| c.as_os_str() == "vendor"))
        .unwrap_or(false)
}

/// Newest modification time of a file, or of a directory's direct children.
pub fn newest_mod_time(path: &Path) -> Result<Option<SystemTime>> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("stat failed for {}", path.display()))?;
    if !meta.is_dir() {
        return Ok(Some(meta.modified()?));
    }
    let mut newest: Option<SystemTime> = None;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        newest = Some(match newest {
            Some(prev) if prev >= modified => prev,
            _ => modified,
        });
    }
    Ok(newest)
}
