//! Package classification: primary, extra, standard.
//!
//! Primary packages belong to the cargo package the entries named; extra
//! packages come from explicitly requested packages or modules. Test-only
//! packages of the primary module travel with the copy but are never
//! rewritten. Standard-library modules are recognised so the materializer
//! can mirror the sysroot sources when they are requested.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::AllowMissing;
use crate::errors::RewriteError;
use crate::loader::{self, FileSet, Loaded, Package};

#[derive(Debug, Default)]
pub struct Partitioned {
    /// Non-test packages of the primary module, rewrite candidates.
    pub mod_pkgs: Vec<Arc<Package>>,
    /// Requested extra packages found in the graph.
    pub extra_pkgs: Vec<Arc<Package>>,
    /// At least one extra package is vendored under the primary module.
    pub vendor_mod: bool,
    /// A standard-library module was requested.
    pub uses_std: bool,
}

/// Classify loaded packages and resolve requested extras.
///
/// `only` restricts the primary set to the named package paths while still
/// treating the set as wanted packages during extra resolution, matching
/// the original only-package semantics.
pub fn partition(
    loaded: &mut Loaded,
    wants_pkgs: &HashSet<String>,
    wants_mods: &HashSet<String>,
    only: &HashSet<String>,
    allow_missing: AllowMissing,
) -> Result<Partitioned> {
    let mut out = Partitioned::default();

    for pkg in &loaded.packages {
        if pkg.is_test_only {
            continue;
        }
        if !only.is_empty() && !only.contains(&pkg.pkg_path) {
            continue;
        }
        out.mod_pkgs.push(Arc::clone(pkg));
    }

    let effective_pkgs: &HashSet<String> = if only.is_empty() { wants_pkgs } else { only };

    // Crate name (normalised) -> loaded extra packages of that crate.
    let mut extra_cache: HashMap<String, Vec<Arc<Package>>> = HashMap::new();
    let mut found: HashSet<String> = HashSet::new();

    for module_name in sorted(wants_mods) {
        if loader::is_std_crate(&module_name) {
            out.uses_std = true;
            found.insert(module_name.clone());
            continue;
        }
        match load_extra_crate(loaded, &module_name, &mut extra_cache)? {
            Some(pkgs) => {
                found.insert(module_name.clone());
                out.extra_pkgs
                    .extend(pkgs.iter().filter(|p| !p.files.is_empty()).cloned());
            }
            None => {}
        }
    }

    for pkg_path in sorted(effective_pkgs) {
        // Already part of the primary module?
        if loaded.packages.iter().any(|p| p.pkg_path == pkg_path) {
            found.insert(pkg_path.clone());
            continue;
        }
        let crate_name = pkg_path.split("::").next().unwrap_or(&pkg_path).to_string();
        if loader::is_std_crate(&crate_name) {
            out.uses_std = true;
            found.insert(pkg_path.clone());
            continue;
        }
        let Some(pkgs) = load_extra_crate(loaded, &crate_name, &mut extra_cache)? else {
            continue;
        };
        if let Some(pkg) = pkgs.iter().find(|p| p.pkg_path == pkg_path) {
            if !pkg.files.is_empty() {
                found.insert(pkg_path.clone());
                if !out.extra_pkgs.iter().any(|p| p.pkg_path == pkg.pkg_path) {
                    out.extra_pkgs.push(Arc::clone(pkg));
                }
            }
        }
    }

    let mut missing: Vec<String> = Vec::new();
    for want in wants_mods.iter().chain(effective_pkgs.iter()) {
        if !found.contains(want) && !only.contains(want) {
            missing.push(want.clone());
        }
    }
    missing.sort();
    missing.dedup();
    if !missing.is_empty() {
        match allow_missing {
            AllowMissing::Error => {
                return Err(RewriteError::missing_extra(missing).into());
            }
            AllowMissing::Warn => warn!(packages = ?missing, "requested packages not found, skipped"),
            AllowMissing::Skip => debug!(packages = ?missing, "requested packages not found"),
        }
    }

    out.vendor_mod = out.extra_pkgs.iter().any(|p| {
        p.files
            .first()
            .is_some_and(|f| crate::fsutil::is_vendored(&loaded.primary.dir, &f.path))
    });

    debug!(
        primary = out.mod_pkgs.len(),
        extra = out.extra_pkgs.len(),
        vendor = out.vendor_mod,
        "partitioned packages"
    );
    Ok(out)
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut list: Vec<String> = set.iter().cloned().collect();
    list.sort();
    list
}

/// Load all packages of one extra cargo package, caching per crate name.
fn load_extra_crate(
    loaded: &mut Loaded,
    crate_name: &str,
    cache: &mut HashMap<String, Vec<Arc<Package>>>,
) -> Result<Option<Vec<Arc<Package>>>> {
    if let Some(pkgs) = cache.get(crate_name) {
        return Ok(Some(pkgs.clone()));
    }
    let Some(cargo_pkg) = loaded
        .metadata
        .packages
        .iter()
        .find(|p| p.name.as_str().replace('-', "_") == crate_name || p.name.as_str() == crate_name)
        .cloned()
    else {
        return Ok(None);
    };
    let module = loader::module_of(&cargo_pkg, &loaded.metadata);
    let mut fset = FileSet::default();
    let pkgs = loader::load_module_packages(&mut fset, &cargo_pkg, &module, &loaded.metadata, false)?;
    merge_fsets(&mut loaded.fset, fset);
    cache.insert(crate_name.to_string(), pkgs.clone());
    Ok(Some(pkgs))
}

fn merge_fsets(into: &mut FileSet, from: FileSet) {
    from.for_each(|file| into.insert(Arc::clone(file)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_is_deterministic() {
        let set: HashSet<String> = ["b", "a", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(sorted(&set), vec!["a", "b", "c"]);
    }
}
