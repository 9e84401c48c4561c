//! Staged manifest fix-up.
//!
//! After the bulk copy, the staged primary manifest still carries relative
//! `path` dependencies that point nowhere from inside the staging root.
//! They are absolutised against the *original* module directory. Every
//! extra module then gets exactly one synthesised redirect pointing at its
//! staged, cleaned directory. Edits go through the shared edit buffer; the
//! staged manifest is first read back through cargo's JSON metadata reader
//! to confirm it parses as the module it mirrors.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;
use regex::Regex;
use tracing::debug;

use crate::edit::Buffer;
use crate::errors::RewriteError;
use crate::fsutil::{clean_staged_path, rebase_onto};
use crate::loader::ModuleInfo;

/// Fix up the staged primary manifest and synthesise redirects for the
/// extra modules. Returns the original-directory to cleaned-directory map
/// that the build step feeds into path remapping.
pub fn make_manifest_replacements(
    primary: &ModuleInfo,
    extra_mods: &[ModuleInfo],
    root: &Path,
) -> Result<HashMap<PathBuf, PathBuf>> {
    let mut mapped: HashMap<PathBuf, PathBuf> = HashMap::new();

    // One redirect per extra module path, first sight wins.
    let mut redirects: BTreeMap<String, PathBuf> = BTreeMap::new();
    for module in extra_mods {
        if module.is_std() || redirects.contains_key(&module.path) {
            continue;
        }
        let orig_dir = module.effective_dir().to_path_buf();
        let clean_dir = PathBuf::from(clean_staged_path(&orig_dir.to_string_lossy()));
        redirects.insert(
            module.path.clone(),
            rebase_onto(root, &clean_dir),
        );
        mapped.insert(orig_dir, clean_dir);
    }

    let staged_dir = staged_module_dir(root, primary);
    let manifest_path = staged_dir.join("Cargo.toml");
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        RewriteError::manifest(format!("read failed: {}", e), Some(manifest_path.clone()))
    })?;

    // Confirm the staged manifest still reads as this module.
    let meta = MetadataCommand::new()
        .manifest_path(&manifest_path)
        .no_deps()
        .exec()
        .map_err(|e| RewriteError::manifest(e.to_string(), Some(manifest_path.clone())))?;
    if !meta
        .packages
        .iter()
        .any(|p| p.name.as_str() == primary.path)
    {
        return Err(RewriteError::manifest(
            format!("staged manifest does not declare {}", primary.path),
            Some(manifest_path.clone()),
        )
        .into());
    }

    let mut buf = Buffer::new(raw.as_str());
    let mut edited = absolutize_path_deps(&raw, &primary.dir, &mut buf)?;

    // Rewritten sources import the runtime; make sure the staged module
    // can resolve it.
    let has_runtime_dep = meta
        .packages
        .iter()
        .filter(|p| p.name.as_str() == primary.path)
        .any(|p| p.dependencies.iter().any(|d| d.name == "mockgraft"));
    if !has_runtime_dep {
        buf.insert(
            raw.len(),
            format!(
                "\n[dependencies.mockgraft]\nversion = \"{}\"\n",
                env!("CARGO_PKG_VERSION")
            ),
        );
        edited = true;
    }

    // A previous pass already synthesised the redirects; appending twice
    // would duplicate the table.
    if !redirects.is_empty() && !raw.contains("[patch.crates-io]") {
        let mut patch = String::from("\n[patch.crates-io]\n");
        for (name, dir) in &redirects {
            patch.push_str(&format!(
                "{} = {{ path = {:?} }}\n",
                name,
                dir.display().to_string()
            ));
        }
        buf.insert(raw.len(), patch);
        edited = true;
    }

    if edited {
        let out = buf
            .output()
            .map_err(|e| RewriteError::manifest(e.to_string(), Some(manifest_path.clone())))?;
        std::fs::write(&manifest_path, out).map_err(|e| {
            RewriteError::manifest(format!("write failed: {}", e), Some(manifest_path.clone()))
        })?;
        debug!(manifest = %manifest_path.display(), "fixed staged manifest");
    }

    Ok(mapped)
}

/// The directory a module is mirrored into under the staging root.
pub fn staged_module_dir(root: &Path, module: &ModuleInfo) -> PathBuf {
    let dir = module.effective_dir();
    PathBuf::from(clean_staged_path(
        &rebase_onto(root, dir).to_string_lossy(),
    ))
}

/// Rewrite every relative `path = "…"` value against `orig_dir`.
fn absolutize_path_deps(raw: &str, orig_dir: &Path, buf: &mut Buffer) -> Result<bool> {
    let re = Regex::new(r#"path\s*=\s*"([^"]+)""#).context("path dependency pattern")?;
    let mut edited = false;
    for caps in re.captures_iter(raw) {
        let m = caps.get(1).expect("capture group");
        let value = m.as_str();
        if Path::new(value).is_absolute() {
            continue;
        }
        let abs = normalize(&orig_dir.join(value));
        buf.replace(m.start(), m.end(), abs.to_string_lossy().into_owned());
        edited = true;
    }
    Ok(edited)
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_deps_become_absolute() {
        let raw = "[dependencies]\nutil = { path = \"../util\" }\nabs = { path = \"/already/abs\" }\n";
        let mut buf = Buffer::new(raw);
        let edited = absolutize_path_deps(raw, Path::new("/home/u/project/app"), &mut buf).unwrap();
        assert!(edited);
        let out = buf.output().unwrap();
        assert!(out.contains("path = \"/home/u/project/util\""));
        assert!(out.contains("path = \"/already/abs\""));
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn staged_dir_is_rebased_and_cleaned() {
        let module = ModuleInfo {
            path: "grpc".into(),
            version: "1.47.0".into(),
            dir: PathBuf::from("/cache/grpc@v1.47.0"),
            replace: None,
        };
        assert_eq!(
            staged_module_dir(Path::new("/tmp/stage"), &module),
            PathBuf::from("/tmp/stage/cache/grpc/v1.47.0")
        );
    }
}
