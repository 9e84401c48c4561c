//! `build`, `run`, `test`: compile the staged workspace and execute.
//!
//! The compiler runs inside the staged project directory with one
//! `--remap-path-prefix` per mapped directory, so debugger locations point
//! back at the original sources.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use crate::cli::{BuildOpts, CommonOpts};
use crate::fsutil::{absolutize, rewrite_root};
use crate::materialize::{self, GenRewriteResult};

pub struct BuildResult {
    pub output: PathBuf,
}

pub fn run_build(args: &[String], common: &CommonOpts, build: &BuildOpts, verbose: u8) -> Result<()> {
    let res = build_rewrite(args, common, build, verbose, false)?;
    info!(output = %res.output.display(), "build successful");
    Ok(())
}

pub fn run_run(
    args: &[String],
    common: &CommonOpts,
    build: &BuildOpts,
    exec_args: &[String],
    verbose: u8,
) -> Result<()> {
    let res = build_rewrite(args, common, build, verbose, false)?;
    let status = Command::new(&res.output)
        .args(exec_args)
        .status()
        .with_context(|| format!("spawning {}", res.output.display()))?;
    if !status.success() {
        bail!("{} exited with {}", res.output.display(), status);
    }
    Ok(())
}

pub fn run_test(
    args: &[String],
    common: &CommonOpts,
    build: &BuildOpts,
    coverprofile: Option<&Path>,
    coverpkg: Option<&str>,
    exec_args: &[String],
    verbose: u8,
) -> Result<()> {
    let opts = super::gen_options(common, verbose, true)?;
    let root = rewrite_root();
    let staged = materialize::gen_rewrite(args, &root, &opts)?;

    let mut flags = remap_flags(&root, &staged, common)?;
    let mut cmd = Command::new("cargo");
    cmd.current_dir(&staged.staged_project_dir);
    cmd.arg("test");
    if !build.debug {
        cmd.arg("--release");
    }
    for flag in &build.cargo_flags {
        cmd.arg(flag);
    }
    if let Some(profile) = coverprofile {
        // Coverage rides the LLVM instrumented-profile environment.
        cmd.env("LLVM_PROFILE_FILE", profile);
        flags = append_flag(&flags, "-Cinstrument-coverage");
    }
    cmd.env("RUSTFLAGS", &flags);
    if let Some(pkgs) = coverpkg {
        for pkg in pkgs.split(',').filter(|s| !s.is_empty()) {
            cmd.arg("--package").arg(pkg);
        }
    }
    if !exec_args.is_empty() {
        cmd.arg("--");
        cmd.args(exec_args);
    }
    info!(dir = %staged.staged_project_dir.display(), "running staged tests");
    let status = cmd.status().context("spawning cargo test")?;
    if !status.success() {
        bail!("cargo test failed with {}", status);
    }
    Ok(())
}

fn build_rewrite(
    args: &[String],
    common: &CommonOpts,
    build: &BuildOpts,
    verbose: u8,
    for_test: bool,
) -> Result<BuildResult> {
    let opts = super::gen_options(common, verbose, for_test)?;
    let root = rewrite_root();
    let staged = materialize::gen_rewrite(args, &root, &opts)?;
    compile(&root, &staged, common, build, for_test)
}

fn compile(
    root: &Path,
    staged: &GenRewriteResult,
    common: &CommonOpts,
    build: &BuildOpts,
    for_test: bool,
) -> Result<BuildResult> {
    let project_dir = match &common.project_dir {
        Some(d) => absolutize(d)?,
        None => std::env::current_dir()?,
    };
    let output = match &build.output {
        Some(o) => absolutize(o)?,
        None => {
            let mut name = if build.debug { "debug" } else { "exec" }.to_string();
            if for_test {
                name.push_str("-test");
            }
            name.push_str(".bin");
            project_dir.join(name)
        }
    };

    let mut cmd = Command::new("cargo");
    cmd.current_dir(&staged.staged_project_dir);
    if for_test {
        cmd.args(["test", "--no-run"]);
    } else {
        cmd.arg("build");
    }
    if !build.debug && !for_test {
        cmd.arg("--release");
    }
    for flag in &build.cargo_flags {
        cmd.arg(flag);
    }
    cmd.env("RUSTFLAGS", remap_flags(root, staged, common)?);

    info!(dir = %staged.staged_project_dir.display(), "compiling staged workspace");
    let status = cmd.status().context("spawning cargo")?;
    if !status.success() {
        bail!("cargo build failed with {}", status);
    }
    if for_test {
        return Ok(BuildResult { output });
    }

    let profile = if build.debug { "debug" } else { "release" };
    let produced = find_binary(&staged.staged_project_dir.join("target").join(profile))?;
    std::fs::copy(&produced, &output).with_context(|| {
        format!("copying {} to {}", produced.display(), output.display())
    })?;
    Ok(BuildResult { output })
}

/// `RUSTFLAGS` with one remap per mapped directory, staged back to
/// original. The replacement must keep at least one child below the root.
fn remap_flags(root: &Path, staged: &GenRewriteResult, common: &CommonOpts) -> Result<String> {
    let project_dir = match &common.project_dir {
        Some(d) => absolutize(d)?,
        None => std::env::current_dir()?,
    };
    let mut flags = std::env::var("RUSTFLAGS").unwrap_or_default();
    let mut add = |flags: &mut String, from: &Path, to: &Path| {
        if to.as_os_str().is_empty() || to == Path::new("/") {
            warn!(from = %from.display(), "path remap target has no child, skipped");
            return;
        }
        *flags = append_flag(
            flags,
            &format!("--remap-path-prefix={}={}", from.display(), to.display()),
        );
    };
    add(&mut flags, &staged.staged_project_dir, &project_dir);
    for (orig, cleaned) in &staged.mapped_mod {
        add(&mut flags, &crate::fsutil::rebase_onto(root, cleaned), orig);
    }
    if let Some(std_root) = &staged.new_std_root {
        warn!(
            std = %std_root.display(),
            "standard-library sources staged; building them needs a build-std toolchain"
        );
    }
    Ok(flags)
}

fn append_flag(existing: &str, flag: &str) -> String {
    if existing.is_empty() {
        flag.to_string()
    } else {
        format!("{} {}", existing, flag)
    }
}

/// The freshly built executable under a cargo profile directory.
fn find_binary(profile_dir: &Path) -> Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(profile_dir)
        .with_context(|| format!("reading {}", profile_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_some() {
            continue;
        }
        let meta = entry.metadata()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                continue;
            }
        }
        let modified = meta.modified()?;
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    newest
        .map(|(_, p)| p)
        .ok_or_else(|| anyhow!("no executable produced under {}", profile_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_flag_spaces_flags() {
        assert_eq!(append_flag("", "-Ca"), "-Ca");
        assert_eq!(append_flag("-Ca", "-Cb"), "-Ca -Cb");
    }
}
