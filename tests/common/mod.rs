//! Shared helpers for pipeline tests: build packages straight from source
//! strings, without going through cargo.

use std::path::PathBuf;
use std::sync::Arc;

use mockgraft::loader::resolver::{CrateCtx, TypeIndex, UseMap};
use mockgraft::loader::{ModuleInfo, Package, SourceFile};

pub fn module() -> ModuleInfo {
    ModuleInfo {
        path: "demo".to_string(),
        version: "0.1.0".to_string(),
        dir: PathBuf::from("/project/demo"),
        replace: None,
    }
}

/// One-file package with a ready resolver context.
pub fn make_package(pkg_path: &str, source: &str) -> Package {
    let syntax = syn::parse_file(source).expect("test source parses");
    let mut index = TypeIndex::default();
    index.index_file(pkg_path, &syntax);
    let ctx = Arc::new(CrateCtx {
        crate_name: "demo".to_string(),
        dep_crates: ["demo", "mockgraft", "serde"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        type_index: index,
    });
    let uses = UseMap::from_file(&syntax);
    let rel: Vec<&str> = pkg_path.split("::").skip(1).collect();
    let file_path = if rel.is_empty() {
        PathBuf::from("/project/demo/src/lib.rs")
    } else {
        PathBuf::from(format!("/project/demo/src/{}.rs", rel.join("/")))
    };
    let file = Arc::new(SourceFile {
        path: file_path,
        content: source.to_string(),
        syntax,
        uses,
    });
    let name = pkg_path.rsplit("::").next().unwrap().to_string();
    Package {
        pkg_path: pkg_path.to_string(),
        name,
        crate_name: "demo".to_string(),
        files: vec![file],
        module: module(),
        is_test_only: false,
        ctx,
    }
}
