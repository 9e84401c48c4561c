//! Full pipeline against a real temporary cargo project: staging layout,
//! manifest fix-up, and second-run idempotence.
//!
//! These tests shell out to `cargo metadata`; the project has no
//! dependencies, so resolution stays offline.

use std::fs;
use std::path::{Path, PathBuf};

use mockgraft::fsutil::rebase_onto;
use mockgraft::materialize::{gen_rewrite, GenRewriteOptions};

fn write_project(dir: &Path) {
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("Cargo.toml"),
        "[package]\nname = \"demo\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
    )
    .unwrap();
    fs::write(
        dir.join("src/main.rs"),
        r#"use mockgraft::runtime::Context;

fn main() {}

pub fn run(ctx: &Context, status: i32) -> Result<i32, String> {
    let _ = ctx;
    Ok(status)
}
"#,
    )
    .unwrap();
}

fn options(project: &Path) -> GenRewriteOptions {
    GenRewriteOptions {
        project_dir: Some(project.to_path_buf()),
        ..Default::default()
    }
}

#[test]
fn staging_contains_rewrite_mock_and_fixed_manifest() {
    let project = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_project(project.path());

    let entry = project.path().join("src/main.rs");
    let res = gen_rewrite(
        &[entry.to_string_lossy().into_owned()],
        root.path(),
        &options(project.path()),
    )
    .unwrap();

    assert_eq!(res.rewritten_files, 1);
    assert_eq!(res.mock_files, 1);

    let staged_main = rebase_onto(root.path(), &entry);
    let rewritten = fs::read_to_string(&staged_main).unwrap();
    assert!(rewritten.contains("use mockgraft::runtime as _mock;"));
    assert!(rewritten.contains("_mock::trap_fn("));
    assert!(rewritten.contains("pub mod mock_gen;"));

    // Companion beside the rewritten crate root, browsable copy in the
    // user tree, plus its staged mirror.
    let staged_companion = rebase_onto(root.path(), &project.path().join("src/mock_gen.rs"));
    assert!(staged_companion.is_file());
    let user_stub = project.path().join("test/mock_gen/mock.rs");
    assert!(user_stub.is_file());
    assert!(rebase_onto(root.path(), &user_stub).is_file());
    let stub = fs::read_to_string(&user_stub).unwrap();
    assert!(stub.contains("pub const FULL_PKG_NAME: &str = \"demo\";"));
    assert!(stub.contains("pub struct M {"));

    let staged_manifest = rebase_onto(root.path(), &project.path().join("Cargo.toml"));
    let manifest = fs::read_to_string(&staged_manifest).unwrap();
    assert!(manifest.contains("[dependencies.mockgraft]"));

    assert_eq!(
        res.staged_project_dir,
        rebase_onto(root.path(), project.path())
    );
}

#[test]
fn second_run_rewrites_nothing() {
    let project = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_project(project.path());
    let entry = project.path().join("src/main.rs");
    let entries = [entry.to_string_lossy().into_owned()];
    let opts = options(project.path());

    gen_rewrite(&entries, root.path(), &opts).unwrap();

    let staged_main = rebase_onto(root.path(), &entry);
    let staged_companion = rebase_onto(root.path(), &project.path().join("src/mock_gen.rs"));
    let mtime = |p: &PathBuf| fs::metadata(p).unwrap().modified().unwrap();
    let main_before = mtime(&staged_main);
    let companion_before = mtime(&staged_companion);

    std::thread::sleep(std::time::Duration::from_millis(50));
    gen_rewrite(&entries, root.path(), &opts).unwrap();

    assert_eq!(mtime(&staged_main), main_before);
    assert_eq!(mtime(&staged_companion), companion_before);
}

#[test]
fn force_regenerates_everything() {
    let project = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_project(project.path());
    let entry = project.path().join("src/main.rs");
    let entries = [entry.to_string_lossy().into_owned()];
    let opts = options(project.path());

    gen_rewrite(&entries, root.path(), &opts).unwrap();
    let staged_main = rebase_onto(root.path(), &entry);
    let before = fs::metadata(&staged_main).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(50));
    let forced = GenRewriteOptions {
        force: true,
        ..options(project.path())
    };
    gen_rewrite(&entries, root.path(), &forced).unwrap();
    let after = fs::metadata(&staged_main).unwrap().modified().unwrap();
    assert!(after > before);
}

#[test]
fn missing_extra_package_is_an_error_by_default() {
    let project = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    write_project(project.path());
    let entry = project.path().join("src/main.rs");

    let mut opts = options(project.path());
    opts.packages.insert("nonexistent::pkg".to_string());
    let err = gen_rewrite(
        &[entry.to_string_lossy().into_owned()],
        root.path(),
        &opts,
    )
    .unwrap_err();
    assert!(err.to_string().contains("nonexistent::pkg"));

    // Downgraded policy lets the run proceed.
    opts.allow_missing = mockgraft::config::AllowMissing::Warn;
    gen_rewrite(
        &[entry.to_string_lossy().into_owned()],
        root.path(),
        &opts,
    )
    .unwrap();
}
