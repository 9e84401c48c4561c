//! # mockgraft
//!
//! A source-to-source rewriter that grafts mock interception shims onto
//! Rust crates. Given one or more entry packages, it materialises a
//! parallel, overlaid workspace in a staging root where selected functions
//! have been trapped, each transformed package accompanied by a generated
//! companion module exposing a strongly-typed mock table. The staged tree
//! builds with the stock toolchain; path mappings translate debugger
//! locations back to the original sources.
//!
//! ## Pipeline
//!
//! ```text
//! Loader ──▶ Partitioner ──▶ Rewriter ──▶ Mock Stub Generator ──▶ Materializer
//! ```
//!
//! 1. **[`loader`]** asks cargo for the package graph and parses every
//!    source file with `syn`, keeping byte offsets alongside the trees.
//! 2. **[`partition`]** classifies packages into primary, extra, and
//!    standard, and detects vendored extras.
//! 3. **[`rewrite`]** collects an edit plan per file: renames, the runtime
//!    import, and the single-line trap prelude that hands control to the
//!    runtime while the original body moves into an inner function.
//! 4. **[`mockgen`]** emits one companion module per rewritten package
//!    whose mock-table type mirrors the trapped signatures.
//! 5. **[`materialize`]** mirrors the module trees into the staging root
//!    through a parallel copier with a staleness oracle, overlays the
//!    rewritten and generated contents, and fixes up the staged manifests.
//!
//! ## Example
//!
//! ```no_run
//! use mockgraft::materialize::{gen_rewrite, GenRewriteOptions};
//!
//! let opts = GenRewriteOptions::default();
//! let root = mockgraft::fsutil::rewrite_root();
//! let result = gen_rewrite(&["src/main.rs".to_string()], &root, &opts).unwrap();
//! println!("staged at {}", result.staged_project_dir.display());
//! ```
//!
//! The [`runtime`] module is the surface rewritten code and generated
//! companions link against: the call [`runtime::Context`], the trap entry
//! point, and the process-wide stub registry.

pub mod cli;
pub mod commands;
pub mod config;
pub mod edit;
pub mod errors;
pub mod fsutil;
pub mod gen;
pub mod imports;
pub mod loader;
pub mod materialize;
pub mod mockgen;
pub mod observability;
pub mod partition;
pub mod rewrite;
pub mod runtime;

pub use crate::errors::RewriteError;
pub use crate::loader::{load_packages, LoadOptions, Loaded, ModuleInfo, Package};
pub use crate::materialize::{gen_rewrite, GenRewriteOptions, GenRewriteResult};
pub use crate::rewrite::{rewrite_packages, PackageRewrite, RewriteOptions};
pub use crate::runtime::{registry, Context, StubId};
