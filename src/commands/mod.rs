//! Command implementations behind the CLI.

pub mod build;
pub mod print;
pub mod rewrite;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::cli::CommonOpts;
use crate::config::MockConfig;
use crate::materialize::GenRewriteOptions;
use crate::rewrite::{FilterFn, RewriteOptions};

/// Compile the user filter: a regex matched against
/// `<pkg>::<owner>::<func>`, inverted by a `not:` prefix.
pub fn build_filter(expr: &str) -> Result<FilterFn> {
    let (invert, pattern) = match expr.strip_prefix("not:") {
        Some(rest) => (true, rest),
        None => (false, expr),
    };
    let re = Regex::new(pattern).with_context(|| format!("bad filter regex {:?}", pattern))?;
    Ok(Arc::new(move |pkg, _file, owner, _owner_ptr, func| {
        let key = format!("{}::{}::{}", pkg, owner, func);
        re.is_match(&key) != invert
    }))
}

fn split_set(list: Option<&str>) -> HashSet<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Assemble pipeline options from the common CLI flags plus the project's
/// mock config file.
pub fn gen_options(common: &CommonOpts, verbose: u8, for_test: bool) -> Result<GenRewriteOptions> {
    let mut cfg = MockConfig::load(&common.mock_config)?;
    cfg.merge_cli(common.mock_pkg.as_deref(), common.mock_module.as_deref());

    let filter = match &common.filter {
        Some(expr) => Some(build_filter(expr)?),
        None => None,
    };

    Ok(GenRewriteOptions {
        verbose: verbose >= 1,
        verbose_copy: verbose >= 2,
        verbose_rewrite: verbose >= 2,
        project_dir: common.project_dir.clone(),
        rewrite: RewriteOptions {
            filter,
            skip_non_ctx: false,
        },
        stub_gen_dir: common.stub_gen_dir.clone(),
        skip_gen_mock: common.skip_mock_gen,
        only: split_set(common.only_pkg.as_deref()),
        packages: cfg.package_set(),
        modules: cfg.module_set(),
        allow_missing: common
            .allow_missing
            .map(Into::into)
            .unwrap_or(cfg.allow_missing),
        force: common.force,
        for_test,
        build_flags: common.mod_flags.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn filter_matches_joined_key() {
        let f = build_filter(".*::.*::run").unwrap();
        assert!(f("demo::service", Path::new("x.rs"), "", false, "run"));
        assert!(!f("demo::service", Path::new("x.rs"), "", false, "other"));
    }

    #[test]
    fn not_prefix_inverts() {
        let f = build_filter("not:.*::Status::.*").unwrap();
        assert!(!f("demo", Path::new("x.rs"), "Status", true, "run"));
        assert!(f("demo", Path::new("x.rs"), "", false, "run"));
    }

    #[test]
    fn split_set_handles_commas() {
        let set = split_set(Some("a::b, c::d,"));
        assert!(set.contains("a::b"));
        assert!(set.contains("c::d"));
        assert_eq!(set.len(), 2);
    }
}
