//! Import tracking for generated files.
//!
//! Maps package paths to the locally chosen identifier, bijectively: one
//! effective name per path, one path per name. When the preferred name is
//! taken or reserved, numeric suffixes are tried in order.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

/// Allocate the first available name derived from `base`.
///
/// `claim` must return true when the candidate is acceptable (and record it
/// as taken). Tries `base`, then `base1`, `base2`, ….
pub fn next_name(mut claim: impl FnMut(&str) -> bool, base: &str) -> Result<String> {
    if claim(base) {
        return Ok(base.to_string());
    }
    for i in 1..100_000 {
        let candidate = format!("{}{}", base, i);
        if claim(&candidate) {
            return Ok(candidate);
        }
    }
    Err(anyhow!("no available name derived from {:?}", base))
}

/// One resolved import entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    /// Package path, e.g. `other_crate::dao`.
    pub path: String,
    /// Identifier the generated code uses for this package.
    pub use_name: String,
    /// Whether the entry needs an explicit `use` item. Pre-bound names
    /// (such as the `super` self-alias) do not.
    pub emit: bool,
}

/// Per-file import list.
#[derive(Debug, Default)]
pub struct ImportList {
    name_map: HashMap<String, String>,
    pkg_to_use: HashMap<String, String>,
    use_to_pkg: HashMap<String, String>,
    entries: Vec<ImportEntry>,
    reserved: HashSet<String>,
}

impl ImportList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names that may never be chosen as an import identifier.
    pub fn reserve(&mut self, names: &[&str]) {
        self.reserved.extend(names.iter().map(|s| s.to_string()));
    }

    /// Pre-bind a package path to a fixed identifier without emitting a
    /// `use` item. Used for the companion's `super` self-alias.
    pub fn bind(&mut self, pkg_path: &str, use_name: &str) {
        self.pkg_to_use
            .insert(pkg_path.to_string(), use_name.to_string());
        self.use_to_pkg
            .insert(use_name.to_string(), pkg_path.to_string());
        self.entries.push(ImportEntry {
            path: pkg_path.to_string(),
            use_name: use_name.to_string(),
            emit: false,
        });
    }

    /// Return the effective name for `pkg_path`, importing it if needed.
    ///
    /// On first sight the suggested alias (or the package's native name) is
    /// tried, then numeric suffixes, skipping reserved and taken names.
    /// The native name must stay consistent across calls for one path.
    pub fn ensure_or_next(
        &mut self,
        pkg_path: &str,
        suggested_alias: &str,
        native_name: &str,
    ) -> Result<String> {
        if pkg_path.is_empty() {
            return Err(anyhow!("import path cannot be empty"));
        }
        if native_name.is_empty() {
            return Err(anyhow!("native name for {:?} cannot be empty", pkg_path));
        }
        match self.name_map.get(pkg_path) {
            Some(prev) if prev != native_name => {
                return Err(anyhow!(
                    "inconsistent name of package {:?}: given {:?}, previous {:?}",
                    pkg_path,
                    native_name,
                    prev
                ));
            }
            Some(_) => {}
            None => {
                self.name_map
                    .insert(pkg_path.to_string(), native_name.to_string());
            }
        }

        if let Some(prev) = self.pkg_to_use.get(pkg_path) {
            return Ok(prev.clone());
        }

        let base = if suggested_alias.is_empty() {
            native_name
        } else {
            suggested_alias
        };
        let chosen = next_name(
            |candidate| {
                !self.reserved.contains(candidate) && !self.use_to_pkg.contains_key(candidate)
            },
            base,
        )?;
        self.use_to_pkg.insert(chosen.clone(), pkg_path.to_string());
        self.pkg_to_use.insert(pkg_path.to_string(), chosen.clone());
        self.entries.push(ImportEntry {
            path: pkg_path.to_string(),
            use_name: chosen.clone(),
            emit: true,
        });
        Ok(chosen)
    }

    /// True when the path already has a name.
    pub fn contains(&self, pkg_path: &str) -> bool {
        self.pkg_to_use.contains_key(pkg_path)
    }

    /// All entries needing a `use` item, sorted by path.
    pub fn sorted_entries(&self) -> Vec<&ImportEntry> {
        let mut list: Vec<&ImportEntry> = self.entries.iter().filter(|e| e.emit).collect();
        list.sort_by(|a, b| a.path.cmp(&b.path));
        list
    }
}
