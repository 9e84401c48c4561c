//! Project mock configuration.
//!
//! Read from a JSON file (default `test/mock_gen.json`); the special path
//! `none` skips reading entirely. Command-line `--mock-pkg`/`--mock-module`
//! lists supplement the file.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Policy for requested extra packages that are not in the loaded graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowMissing {
    /// Drop them silently.
    Skip,
    /// Log a warning and continue.
    Warn,
    /// Fail the pipeline.
    #[default]
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Extra package paths to rewrite, e.g. `other_crate::client`.
    #[serde(default)]
    pub packages: Vec<String>,

    /// Extra cargo packages to rewrite wholesale.
    #[serde(default)]
    pub modules: Vec<String>,

    #[serde(default)]
    pub allow_missing: AllowMissing,
}

impl MockConfig {
    /// Load from `path`. A missing file yields the default config; the
    /// literal path `none` skips reading.
    pub fn load(path: &Path) -> Result<Self> {
        if path.as_os_str() == "none" {
            return Ok(Self::default());
        }
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading mock config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing mock config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded mock config");
        Ok(cfg)
    }

    /// Merge comma-separated command-line supplements into the config.
    pub fn merge_cli(&mut self, packages: Option<&str>, modules: Option<&str>) {
        if let Some(list) = packages {
            self.packages
                .extend(split_list(list).map(str::to_string));
        }
        if let Some(list) = modules {
            self.modules.extend(split_list(list).map(str::to_string));
        }
    }

    pub fn package_set(&self) -> HashSet<String> {
        self.packages.iter().cloned().collect()
    }

    pub fn module_set(&self) -> HashSet<String> {
        self.modules.iter().cloned().collect()
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg: MockConfig = serde_json::from_str(
            r#"{"packages":["a::b"],"modules":["serde"],"allow_missing":"warn"}"#,
        )
        .unwrap();
        assert_eq!(cfg.packages, vec!["a::b"]);
        assert_eq!(cfg.modules, vec!["serde"]);
        assert_eq!(cfg.allow_missing, AllowMissing::Warn);
    }

    #[test]
    fn defaults_to_error_policy() {
        let cfg: MockConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.allow_missing, AllowMissing::Error);
        assert!(cfg.packages.is_empty());
    }

    #[test]
    fn cli_lists_are_split_and_trimmed() {
        let mut cfg = MockConfig::default();
        cfg.merge_cli(Some("a::b, c::d,"), Some("serde"));
        assert_eq!(cfg.packages, vec!["a::b", "c::d"]);
        assert_eq!(cfg.modules, vec!["serde"]);
    }
}
