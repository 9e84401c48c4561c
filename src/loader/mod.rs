//! Package graph loading.
//!
//! Loading asks cargo for the package graph (`cargo metadata`), then parses
//! every source file of the selected cargo packages with `syn`, keeping the
//! raw bytes alongside the tree so later stages can edit by byte offset.
//! One Rust module file is one package of the pipeline: its path is the
//! module path (`crate_name::a::b`), its module is the owning cargo package.
//!
//! Any parse failure aborts the load; the pipeline never works on a
//! partially parsed graph.

pub mod resolver;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cargo_metadata::{Metadata, MetadataCommand};
use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::errors::RewriteError;
use resolver::{CrateCtx, TypeIndex, UseMap};

/// Version sentinel carried by the synthetic standard-library module.
pub const STD_VERSION_SENTINEL: &str = "pseudo-version: rust-std";

/// Redirection of a module to a local directory (a path dependency).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRedirect {
    pub path: String,
    pub dir: PathBuf,
}

/// A cargo package identity: name, version, root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub path: String,
    pub version: String,
    pub dir: PathBuf,
    pub replace: Option<ModuleRedirect>,
}

impl ModuleInfo {
    pub fn is_std(&self) -> bool {
        self.path.is_empty() && self.version == STD_VERSION_SENTINEL
    }

    /// The directory sources are actually read from.
    pub fn effective_dir(&self) -> &Path {
        match &self.replace {
            Some(r) => &r.dir,
            None => &self.dir,
        }
    }
}

/// One parsed source file with its original bytes.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub syntax: syn::File,
    pub uses: UseMap,
}

/// Shared file-position map: every parsed file, keyed by absolute path.
#[derive(Debug, Default)]
pub struct FileSet {
    files: BTreeMap<PathBuf, Arc<SourceFile>>,
}

impl FileSet {
    pub fn get(&self, path: &Path) -> Option<&Arc<SourceFile>> {
        self.files.get(path)
    }

    pub fn insert(&mut self, file: Arc<SourceFile>) {
        self.files.insert(file.path.clone(), file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<SourceFile>)) {
        for file in self.files.values() {
            f(file);
        }
    }
}

/// One pipeline package: a module file group plus its owning cargo package.
#[derive(Debug)]
pub struct Package {
    /// Module path, e.g. `demo::service`.
    pub pkg_path: String,
    /// Last path segment (the crate name for a crate root).
    pub name: String,
    /// Owning crate name, underscore-normalised.
    pub crate_name: String,
    pub files: Vec<Arc<SourceFile>>,
    pub module: ModuleInfo,
    /// Under `tests/`/`benches/`, or a `*_test.rs` file: traversed for
    /// dependency purposes but never rewritten.
    pub is_test_only: bool,
    /// Name-resolution context of the owning crate.
    pub ctx: Arc<CrateCtx>,
}

impl Package {
    /// Module path segments below the crate root.
    pub fn rel_segments(&self) -> Vec<&str> {
        self.pkg_path.split("::").skip(1).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub project_dir: Option<PathBuf>,
    pub for_test: bool,
    pub build_flags: Vec<String>,
}

/// Result of loading the primary cargo package and its metadata graph.
pub struct Loaded {
    pub fset: FileSet,
    /// All packages of the primary cargo package, test-only ones included.
    pub packages: Vec<Arc<Package>>,
    pub primary: ModuleInfo,
    pub metadata: Metadata,
}

/// Load the typed package graph rooted at the entry patterns.
///
/// Entries are file paths or cargo package names. All entries must resolve
/// into exactly one cargo package; more is an inconsistency the partitioner
/// rejects later with full context, none is an error here.
pub fn load_packages(entries: &[String], opts: &LoadOptions) -> Result<Loaded> {
    let project_dir = match &opts.project_dir {
        Some(d) => crate::fsutil::absolutize(d)?,
        None => std::env::current_dir()?,
    };

    let manifest = find_manifest(&project_dir, entries)?;
    let mut metadata_cmd = MetadataCommand::new();
    metadata_cmd.manifest_path(&manifest);
    if !opts.build_flags.is_empty() {
        metadata_cmd.other_options(opts.build_flags.clone());
    }
    let metadata = metadata_cmd
        .exec()
        .map_err(|e| RewriteError::load(format!("cargo metadata failed: {}", e)))?;

    let mut primary_ids: HashSet<String> = HashSet::new();
    for entry in entries {
        let path = Path::new(entry);
        if path.extension().is_some_and(|e| e == "rs") || path.exists() {
            let abs = crate::fsutil::absolutize(path)?;
            let owner = package_owning_file(&metadata, &abs).ok_or_else(|| {
                RewriteError::load_with_path("file belongs to no loaded cargo package", &abs)
            })?;
            primary_ids.insert(owner);
        } else {
            let name = entry.trim_start_matches("./");
            if !metadata.packages.iter().any(|p| p.name.as_str() == name) {
                return Err(RewriteError::load(format!("no such package: {}", name)).into());
            }
            primary_ids.insert(name.to_string());
        }
    }
    if primary_ids.is_empty() {
        return Err(RewriteError::inconsistent_entry("no entry packages").into());
    }
    if primary_ids.len() > 1 {
        let mut names: Vec<String> = primary_ids.into_iter().collect();
        names.sort();
        return Err(RewriteError::inconsistent_entry(format!(
            "entries span multiple cargo packages: {}",
            names.join(", ")
        ))
        .into());
    }
    let primary_name = primary_ids.into_iter().next().expect("one primary");

    let primary_pkg = metadata
        .packages
        .iter()
        .find(|p| p.name.as_str() == primary_name)
        .ok_or_else(|| RewriteError::load(format!("package {} not in metadata", primary_name)))?;
    let primary = module_of(primary_pkg, &metadata);

    let mut fset = FileSet::default();
    let packages = load_module_packages(&mut fset, primary_pkg, &primary, &metadata, opts.for_test)
        .with_context(|| format!("loading package {}", primary_name))?;

    debug!(
        packages = packages.len(),
        files = fset.len(),
        module = %primary.path,
        "loaded primary module"
    );

    Ok(Loaded {
        fset,
        packages,
        primary,
        metadata,
    })
}

/// Parse all module files of one cargo package into pipeline packages.
pub fn load_module_packages(
    fset: &mut FileSet,
    cargo_pkg: &cargo_metadata::Package,
    module: &ModuleInfo,
    metadata: &Metadata,
    for_test: bool,
) -> Result<Vec<Arc<Package>>> {
    let crate_name = cargo_pkg.name.as_str().replace('-', "_");
    let root = module.effective_dir().to_path_buf();

    let mut roots = vec![root.join("src")];
    if for_test {
        roots.push(root.join("tests"));
        roots.push(root.join("benches"));
    }

    let mut sources: Vec<(PathBuf, bool)> = Vec::new();
    for (idx, dir) in roots.iter().enumerate() {
        if !dir.is_dir() {
            continue;
        }
        let walker = WalkBuilder::new(dir).hidden(false).git_ignore(true).build();
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "rs") {
                sources.push((path.to_path_buf(), idx > 0));
            }
        }
    }
    sources.sort();

    // The runtime crate is always resolvable: the manifest fix-up injects
    // the dependency into the staged module.
    let dep_crates: HashSet<String> = metadata
        .packages
        .iter()
        .map(|p| p.name.as_str().replace('-', "_"))
        .chain([crate_name.clone(), "mockgraft".to_string()])
        .collect();

    let mut parsed: Vec<(String, Arc<SourceFile>, bool)> = Vec::new();
    let mut type_index = TypeIndex::default();
    for (path, from_test_root) in sources {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RewriteError::load_with_path(format!("read failed: {}", e), &path))?;
        let syntax = syn::parse_file(&content)
            .map_err(|e| RewriteError::load_with_path(format!("parse failed: {}", e), &path))?;
        let pkg_path = module_path_of_file(&crate_name, &root, &path)
            .ok_or_else(|| RewriteError::load_with_path("file outside module roots", &path))?;
        type_index.index_file(&pkg_path, &syntax);
        let uses = UseMap::from_file(&syntax);
        let file = Arc::new(SourceFile {
            path: path.clone(),
            content,
            syntax,
            uses,
        });
        fset.insert(Arc::clone(&file));
        let is_test = from_test_root
            || path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_test.rs"));
        parsed.push((pkg_path, file, is_test));
    }

    let ctx = Arc::new(CrateCtx {
        crate_name: crate_name.clone(),
        dep_crates,
        type_index,
    });

    let mut by_path: HashMap<String, (Vec<Arc<SourceFile>>, bool)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for (pkg_path, file, is_test) in parsed {
        let slot = by_path.entry(pkg_path.clone()).or_insert_with(|| {
            order.push(pkg_path.clone());
            (Vec::new(), is_test)
        });
        slot.0.push(file);
        slot.1 = slot.1 && is_test;
    }

    let mut packages = Vec::with_capacity(order.len());
    for pkg_path in order {
        let (files, is_test_only) = by_path.remove(&pkg_path).expect("ordered key");
        let name = pkg_path.rsplit("::").next().unwrap_or(&pkg_path).to_string();
        packages.push(Arc::new(Package {
            pkg_path,
            name,
            crate_name: crate_name.clone(),
            files,
            module: module.clone(),
            is_test_only,
            ctx: Arc::clone(&ctx),
        }));
    }
    Ok(packages)
}

/// Derive a module path from a file location inside its cargo package.
///
/// `src/lib.rs` and `src/main.rs` name the crate root; `src/a/b.rs` and
/// `src/a/b/mod.rs` both name `crate::a::b`. Files under `tests/` and
/// `benches/` keep their directory as a leading segment.
pub fn module_path_of_file(crate_name: &str, pkg_root: &Path, file: &Path) -> Option<String> {
    let rel = crate::fsutil::rel_path(pkg_root, file)?;
    let mut comps: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let last = comps.pop()?;
    let stem = last.strip_suffix(".rs")?;

    let mut segments = vec![crate_name.to_string()];
    let in_src = comps.first().map(String::as_str) == Some("src");
    if in_src {
        comps.remove(0);
    }
    segments.extend(comps);
    match stem {
        "lib" | "main" | "mod" if in_src || stem == "mod" => {}
        _ => segments.push(stem.to_string()),
    }
    Some(segments.join("::"))
}

fn find_manifest(project_dir: &Path, entries: &[String]) -> Result<PathBuf> {
    // Prefer the manifest above the first file entry; fall back to the
    // project directory.
    for entry in entries {
        let path = Path::new(entry);
        if path.extension().is_some_and(|e| e == "rs") {
            let abs = crate::fsutil::absolutize(path)?;
            if let Some(m) = manifest_above(&abs) {
                return Ok(m);
            }
        }
    }
    manifest_above(&project_dir.join("x")).ok_or_else(|| {
        anyhow!(
            "no Cargo.toml found above {}",
            project_dir.display()
        )
    })
}

fn manifest_above(path: &Path) -> Option<PathBuf> {
    let mut cur = path.parent();
    while let Some(dir) = cur {
        let candidate = dir.join("Cargo.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        cur = dir.parent();
    }
    None
}

fn package_owning_file(metadata: &Metadata, file: &Path) -> Option<String> {
    let mut best: Option<(usize, String)> = None;
    for pkg in &metadata.packages {
        let dir = pkg.manifest_path.parent()?;
        let dir = Path::new(dir.as_str());
        if file.starts_with(dir) {
            let depth = dir.components().count();
            if best.as_ref().map(|(d, _)| depth > *d).unwrap_or(true) {
                best = Some((depth, pkg.name.to_string()));
            }
        }
    }
    best.map(|(_, name)| name)
}

/// Build the module record of a cargo package, including path-dependency
/// redirection for local, unpublished packages.
pub fn module_of(pkg: &cargo_metadata::Package, metadata: &Metadata) -> ModuleInfo {
    let dir = pkg
        .manifest_path
        .parent()
        .map(|p| PathBuf::from(p.as_str()))
        .unwrap_or_default();
    let local = pkg.source.is_none();
    let in_workspace = metadata.workspace_members.iter().any(|m| *m == pkg.id);
    let replace = if local && !in_workspace {
        Some(ModuleRedirect {
            path: pkg.name.to_string(),
            dir: dir.clone(),
        })
    } else {
        None
    };
    ModuleInfo {
        path: pkg.name.to_string(),
        version: pkg.version.to_string(),
        dir,
        replace,
    }
}

static SYSROOT: Lazy<Option<PathBuf>> = Lazy::new(|| {
    if let Ok(root) = std::env::var("MOCKGRAFT_SYSROOT") {
        return Some(PathBuf::from(root));
    }
    let out = Command::new("rustc")
        .args(["--print", "sysroot"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let root = String::from_utf8(out.stdout).ok()?;
    Some(PathBuf::from(root.trim()))
});

/// The synthetic standard-library module: empty path, sentinel version,
/// sources under the toolchain sysroot.
pub fn std_module() -> Result<ModuleInfo> {
    let sysroot = SYSROOT
        .as_ref()
        .ok_or_else(|| anyhow!("cannot determine sysroot; set MOCKGRAFT_SYSROOT"))?;
    Ok(ModuleInfo {
        path: String::new(),
        version: STD_VERSION_SENTINEL.to_string(),
        dir: sysroot.join("lib/rustlib/src/rust/library"),
        replace: None,
    })
}

/// Crate names resolved to the standard library.
pub fn is_std_crate(name: &str) -> bool {
    matches!(name, "std" | "core" | "alloc" | "proc_macro" | "test")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_for_crate_roots() {
        let root = Path::new("/p");
        assert_eq!(
            module_path_of_file("demo", root, Path::new("/p/src/lib.rs")),
            Some("demo".into())
        );
        assert_eq!(
            module_path_of_file("demo", root, Path::new("/p/src/main.rs")),
            Some("demo".into())
        );
    }

    #[test]
    fn module_path_for_nested_files() {
        let root = Path::new("/p");
        assert_eq!(
            module_path_of_file("demo", root, Path::new("/p/src/a/b.rs")),
            Some("demo::a::b".into())
        );
        assert_eq!(
            module_path_of_file("demo", root, Path::new("/p/src/a/b/mod.rs")),
            Some("demo::a::b".into())
        );
    }

    #[test]
    fn module_path_for_test_roots() {
        let root = Path::new("/p");
        assert_eq!(
            module_path_of_file("demo", root, Path::new("/p/tests/smoke.rs")),
            Some("demo::tests::smoke".into())
        );
    }

    #[test]
    fn std_module_shape() {
        let m = ModuleInfo {
            path: String::new(),
            version: STD_VERSION_SENTINEL.into(),
            dir: PathBuf::from("/sysroot/lib/rustlib/src/rust/library"),
            replace: None,
        };
        assert!(m.is_std());
    }

    #[test]
    fn std_crate_names() {
        assert!(is_std_crate("core"));
        assert!(!is_std_crate("serde"));
    }
}
