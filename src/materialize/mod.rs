//! Staging: mirror, overlay, fix up.
//!
//! The staging root receives a parallel copy of every involved module tree,
//! then the rewritten file contents and generated companions are overlaid,
//! and finally the staged manifests are fixed up so the tree builds
//! self-contained. Path mappings for the debugger fall out of the fix-up.

pub mod manifest;
pub mod sync;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::AllowMissing;
use crate::fsutil::{clean_staged_path, newest_mod_time, rebase_onto};
use crate::loader::{self, LoadOptions, ModuleInfo, Package};
use crate::partition;
use crate::rewrite::{self, PackageRewrite, RewriteOptions};
use sync::{GeneratedFile, SyncOptions};

/// Default directory (relative to the project) for browsable stub copies.
pub const DEFAULT_STUB_GEN_DIR: &str = "test/mock_gen";

/// Source trees never worth mirroring.
pub fn default_ignores() -> Vec<String> {
    vec![
        r"(.*/)?\.git\b".to_string(),
        r"(.*/)?node_modules\b".to_string(),
        r"(.*/)?target\b".to_string(),
    ]
}

#[derive(Clone, Default)]
pub struct GenRewriteOptions {
    pub verbose: bool,
    pub verbose_copy: bool,
    pub verbose_rewrite: bool,
    pub project_dir: Option<PathBuf>,
    pub rewrite: RewriteOptions,
    /// Relative stub directory; empty means the default.
    pub stub_gen_dir: String,
    pub skip_gen_mock: bool,
    pub only: HashSet<String>,
    pub packages: HashSet<String>,
    pub modules: HashSet<String>,
    pub allow_missing: AllowMissing,
    /// Invalidate every staleness check.
    pub force: bool,
    pub for_test: bool,
    /// Extra flags forwarded to the loader's metadata query.
    pub build_flags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct GenRewriteResult {
    /// Original module directory to cleaned directory, for path remapping.
    pub mapped_mod: HashMap<PathBuf, PathBuf>,
    /// Where the project landed inside the staging root.
    pub staged_project_dir: PathBuf,
    /// Staged standard-library root, when std sources were mirrored.
    pub new_std_root: Option<PathBuf>,
    pub rewritten_files: usize,
    pub mock_files: usize,
}

/// Run the full pipeline and materialise the staging root.
pub fn gen_rewrite(
    entries: &[String],
    root: &Path,
    opts: &GenRewriteOptions,
) -> Result<GenRewriteResult> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("creating staging root {}", root.display()))?;
    debug!(root = %root.display(), "staging root");

    let project_dir = match &opts.project_dir {
        Some(d) => crate::fsutil::absolutize(d)?,
        None => std::env::current_dir()?,
    };
    let stub_gen_dir = if opts.stub_gen_dir.is_empty() {
        DEFAULT_STUB_GEN_DIR
    } else {
        &opts.stub_gen_dir
    };
    let stub_root = if Path::new(stub_gen_dir).is_absolute() {
        PathBuf::from(stub_gen_dir)
    } else {
        project_dir.join(stub_gen_dir)
    };

    let load_opts = LoadOptions {
        project_dir: Some(project_dir.clone()),
        for_test: opts.for_test,
        build_flags: opts.build_flags.clone(),
    };
    let mut loaded = loader::load_packages(entries, &load_opts)?;
    let primary = loaded.primary.clone();
    info!(module = %primary.path, dir = %primary.dir.display(), "current module");

    let parts = partition::partition(
        &mut loaded,
        &opts.packages,
        &opts.modules,
        &opts.only,
        opts.allow_missing,
    )?;

    let mut all_pkgs: Vec<Arc<Package>> = parts.mod_pkgs.clone();
    all_pkgs.extend(parts.extra_pkgs.iter().cloned());
    let pkg_map: HashMap<String, Arc<Package>> = all_pkgs
        .iter()
        .map(|p| (p.pkg_path.clone(), Arc::clone(p)))
        .collect();
    info!(packages = all_pkgs.len(), "found packages");

    let contents = rewrite::rewrite_packages(&all_pkgs, &opts.rewrite)?;
    if parts.vendor_mod {
        info!("vendor mode");
    }

    // Bulk copy of every module tree involved.
    let mut dirs: Vec<PathBuf> = vec![primary.dir.clone()];
    if !parts.vendor_mod {
        for pkg in &parts.extra_pkgs {
            let dir = pkg.module.effective_dir().to_path_buf();
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    let mut new_std_root = None;
    if parts.uses_std {
        let std_mod = loader::std_module()?;
        new_std_root = Some(manifest::staged_module_dir(root, &std_mod));
        dirs.push(std_mod.dir);
    }

    let mut result = GenRewriteResult {
        staged_project_dir: PathBuf::from(clean_staged_path(
            &rebase_onto(root, &project_dir).to_string_lossy(),
        )),
        new_std_root,
        ..Default::default()
    };

    // Overlay entries are computed first so the bulk copy knows which
    // staged paths carry generated content and must survive the
    // delete-not-found pass.
    let mut generated: Vec<GeneratedFile> = Vec::new();
    for pkg_res in contents.values() {
        let pkg = pkg_map
            .get(&pkg_res.pkg_path)
            .with_context(|| format!("package not found: {}", pkg_res.pkg_path))?;
        for file in &pkg_res.files {
            result.rewritten_files += 1;
            generated.push(GeneratedFile {
                dest: staged_path(root, &file.orig_file),
                content: file.content.clone().into_bytes(),
                src_ref: file.orig_file.clone(),
            });
        }
        if !opts.skip_gen_mock && !pkg_res.mock_content.is_empty() {
            let anchor = &pkg_res.files[0].orig_file;
            let companion = companion_fs_path(anchor);
            let stub_copy = stub_fs_path(&primary, &stub_root, pkg);
            let pkg_dir = anchor.parent().unwrap_or(Path::new("/")).to_path_buf();
            let bytes = pkg_res.mock_content.as_bytes().to_vec();
            if opts.verbose_rewrite || (opts.verbose && all_pkgs.len() < 10) {
                info!(file = %stub_copy.display(), "generate mock file");
            }
            for dest in [
                staged_path(root, &companion),
                stub_copy.clone(),
                staged_path(root, &stub_copy),
            ] {
                generated.push(GeneratedFile {
                    dest,
                    content: bytes.clone(),
                    src_ref: pkg_dir.clone(),
                });
            }
            result.mock_files += 1;
        }
    }

    let preserved: Arc<std::collections::HashSet<PathBuf>> =
        Arc::new(generated.iter().map(|g| g.dest.clone()).collect());

    let dest_updated: Arc<DashMap<PathBuf, ()>> = Arc::new(DashMap::new());
    let updated = Arc::clone(&dest_updated);
    let keep = Arc::clone(&preserved);
    let copy_opts = SyncOptions {
        ignores: default_ignores(),
        delete_not_found: true,
        force: opts.force,
        process_dest_path: Some(Arc::new(|p: &Path| {
            PathBuf::from(clean_staged_path(&p.to_string_lossy()))
        })),
        did_copy: Some(Arc::new(move |_src, dest| {
            updated.insert(dest.to_path_buf(), ());
        })),
        preserve: Some(Arc::new(move |dest: &Path| keep.contains(dest))),
        on_stats: Some(sync::progress_logger(opts.verbose_copy, opts.verbose)),
    };
    info!(dirs = dirs.len(), "copying module trees into staging root");
    sync::sync_rebase(&dirs, root, copy_opts)?;

    // Module redirects only work at module level, so the fix-up runs
    // whenever modules were mirrored rather than vendored.
    if !parts.vendor_mod {
        let mut extra_mods: Vec<ModuleInfo> = Vec::new();
        for pkg in &parts.extra_pkgs {
            if !extra_mods.iter().any(|m| m.path == pkg.module.path) {
                extra_mods.push(pkg.module.clone());
            }
        }
        result.mapped_mod = manifest::make_manifest_replacements(&primary, &extra_mods, root)?;
    }

    let updated = Arc::clone(&dest_updated);
    sync::sync_generated(
        &generated,
        move |entry, _dest, dest_meta| {
            // A fresh source copy always invalidates the overlay.
            if updated.contains_key(&entry.dest) {
                return true;
            }
            match newest_mod_time(&entry.src_ref) {
                Ok(Some(newest)) => dest_meta.modified().map(|d| newest > d).unwrap_or(true),
                _ => true,
            }
        },
        SyncOptions {
            force: opts.force,
            ignores: default_ignores(),
            on_stats: Some(sync::progress_logger(opts.verbose_rewrite, opts.verbose)),
            ..Default::default()
        },
    )?;

    info!(
        rewritten = result.rewritten_files,
        mocks = result.mock_files,
        "staging root populated"
    );
    Ok(result)
}

/// Staged, cleaned destination of an original absolute path.
pub fn staged_path(root: &Path, orig: &Path) -> PathBuf {
    PathBuf::from(clean_staged_path(
        &rebase_onto(root, orig).to_string_lossy(),
    ))
}

/// Where a module file's companion child module lives.
pub fn companion_fs_path(module_file: &Path) -> PathBuf {
    let parent = module_file.parent().unwrap_or(Path::new("/"));
    let stem = module_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem {
        "lib" | "main" | "mod" => parent.join("mock_gen.rs"),
        _ => parent.join(stem).join("mock_gen.rs"),
    }
}

/// The browsable stub copy path for one package.
pub fn stub_fs_path(primary: &ModuleInfo, stub_root: &Path, pkg: &Package) -> PathBuf {
    let rel: PathBuf = if pkg.module.path == primary.path {
        pkg.rel_segments().iter().collect()
    } else {
        let mut p = PathBuf::from("ext");
        for seg in pkg.pkg_path.split("::") {
            p.push(seg);
        }
        p
    };
    stub_root.join(rel).join("mock.rs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_sits_beside_module_children() {
        assert_eq!(
            companion_fs_path(Path::new("/p/src/service.rs")),
            PathBuf::from("/p/src/service/mock_gen.rs")
        );
        assert_eq!(
            companion_fs_path(Path::new("/p/src/lib.rs")),
            PathBuf::from("/p/src/mock_gen.rs")
        );
        assert_eq!(
            companion_fs_path(Path::new("/p/src/a/mod.rs")),
            PathBuf::from("/p/src/a/mock_gen.rs")
        );
    }

    #[test]
    fn staged_path_is_rebased_and_cleaned() {
        assert_eq!(
            staged_path(Path::new("/tmp/s"), Path::new("/cache/x@1/lib.rs")),
            PathBuf::from("/tmp/s/cache/x/1/lib.rs")
        );
    }
}
