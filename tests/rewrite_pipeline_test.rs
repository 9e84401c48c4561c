//! End-to-end rewriter and stub-generator behaviour on synthetic packages.

mod common;

use common::make_package;
use mockgraft::rewrite::{rewrite_package, RewriteOptions};

const SIMPLE: &str = r#"use mockgraft::runtime::Context;

pub fn run(ctx: &Context, status: i32, _: String) -> Result<i32, String> {
    let _ = status;
    Ok(0)
}
"#;

#[test]
fn ownerless_function_is_trapped() {
    let pkg = make_package("demo::service", SIMPLE);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .expect("run is trapped");

    let content = &res.files[0].content;
    assert!(content.starts_with("use mockgraft::runtime as _mock; "));
    assert!(content.contains(
        "static _MOCK_STUB: _mock::StubId = _mock::StubId { pkg: \"demo::service\", owner: \"\", owner_ptr: false, name: \"run\" };"
    ));
    assert!(content.contains("static _MOCK_REQ_FIELDS: &[&str] = &[\"Status\", \"Unused_2\"];"));
    // The blank parameter got an effective name in the outer signature.
    assert!(content.contains("unused_2: String"));
    // The original body moved into the inner function, original names kept.
    assert!(content.contains(
        "}#[allow(non_snake_case)] fn _mockrun(ctx: &Context, status: i32, _: String) -> Result<i32, String> {"
    ));
    assert!(content.contains("let _mockreq = (status, unused_2);"));
    assert!(content.contains("_mockrun(ctx, _mockreq.0, _mockreq.1)"));
    assert!(content.contains("false, true, true);"));
    assert!(content.trim_end().ends_with("pub mod mock_gen;"));
}

#[test]
fn mock_stub_mirrors_signature() {
    let pkg = make_package("demo::service", SIMPLE);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    let mock = &res.mock_content;

    assert!(mock.contains("pub const SKIP_MOCK_PKG: bool = true;"));
    assert!(mock.contains("pub const FULL_PKG_NAME: &str = \"demo::service\";"));
    assert!(mock.contains("use mockgraft::runtime;"));
    assert!(mock.contains(
        "pub run: Option<fn(ctx: &runtime::Context, status: i32, _: String) -> Result<i32, String>>,"
    ));
    assert!(mock.contains("pub fn Setup(ctx: &runtime::Context, setup: impl FnOnce(&mut M)) -> runtime::Context {"));
    assert!(mock.contains("let _ = (\"run\", e.run, super::run);"));
    assert!(mock.contains("args: &[(\"Status\", \"i32\"), (\"Unused_2\", \"String\")]"));
    assert!(mock.contains("first_is_ctx: true, last_is_err: true"));
}

#[test]
fn method_on_exported_owner_gets_nested_table() {
    let source = r#"use mockgraft::runtime::Context;

pub struct Status(pub i32);

impl Status {
    pub fn run(&self, ctx: &Context, status: i32) -> Result<i32, String> {
        Ok(status + self.0)
    }
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();

    let content = &res.files[0].content;
    assert!(content.contains("owner: \"Status\", owner_ptr: true"));
    assert!(content.contains(".and_then(|t| t.Status.run);"));
    assert!(content.contains("self._mockStatus_run(ctx, _mockreq.0)"));
    assert!(content.contains(
        "}#[allow(non_snake_case)] fn _mockStatus_run(&self, ctx: &Context, status: i32) -> Result<i32, String> {"
    ));

    let mock = &res.mock_content;
    assert!(mock.contains("pub Status: MStatus,"));
    assert!(mock.contains("pub struct MStatus {"));
    assert!(mock.contains(
        "pub run: Option<fn(_: &super::Status, ctx: &runtime::Context, status: i32) -> Result<i32, String>>,"
    ));
    assert!(mock.contains("let _ = (\"run\", e.Status.run, super::Status::run);"));
}

#[test]
fn method_on_unexported_owner_is_reified_opaquely() {
    let source = r#"use mockgraft::runtime::Context;

struct unexp(i32);

impl unexp {
    pub fn run(&self, ctx: &Context) -> i32 {
        let _ = ctx;
        self.0
    }
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();

    let content = &res.files[0].content;
    assert!(content.contains("self as &dyn ::core::any::Any"));

    let mock = &res.mock_content;
    assert!(mock.contains("pub M_unexp: MM_unexp,"));
    assert!(mock.contains("pub run: Option<fn(_: &dyn ::core::any::Any, ctx: &runtime::Context) -> i32>,"));
    // No quick link for unexported owners.
    assert!(!mock.contains("super::unexp::run"));
}

#[test]
fn function_returning_context_is_left_alone() {
    let source = r#"use mockgraft::runtime::Context;

pub fn derive(ctx: &Context) -> Context {
    ctx.clone()
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default()).unwrap();
    assert!(res.is_none());
}

#[test]
fn slice_parameters_are_not_expanded() {
    let source = r#"use mockgraft::runtime::Context;

pub fn run4(ctx: &Context, items: Vec<String>) -> Result<i32, String> {
    Ok(items.len() as i32)
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    assert!(res.mock_content.contains("items: Vec<String>"));
    assert!(res.files[0].content.contains("let _mockreq = (items,);"));
}

#[test]
fn error_result_name_stays_distinct_from_parameters() {
    let source = r#"use mockgraft::runtime::Context;

pub fn run5(ctx: &Context, status: i32, e: String) -> Result<i32, String> {
    let _ = e;
    Ok(status)
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    let content = &res.files[0].content;
    // Both the parameter `e` and the error slot keep their own names.
    assert!(content.contains("static _MOCK_REQ_FIELDS: &[&str] = &[\"Status\", \"E\"];"));
    assert!(content.contains("true, true);"));
    let func = &res.details[0].funcs[0].config;
    assert_eq!(func.err_name, "err");
    assert!(func.last_is_err);
}

#[test]
fn filter_excludes_functions() {
    let filter = mockgraft::commands::build_filter("not:.*::.*::run").unwrap();
    let pkg = make_package("demo::service", SIMPLE);
    let opts = RewriteOptions {
        filter: Some(filter),
        skip_non_ctx: false,
    };
    assert!(rewrite_package(&pkg, &opts).unwrap().is_none());
}

#[test]
fn sentinel_constants_skip_rewriting() {
    let source = r#"use mockgraft::runtime::Context;

pub const SKIP_MOCK_FILE: bool = true;

pub fn run(ctx: &Context) -> i32 {
    let _ = ctx;
    1
}
"#;
    let pkg = make_package("demo::service", source);
    assert!(rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .is_none());

    let pkg_sentinel = make_package(
        "demo::service",
        &source.replace("SKIP_MOCK_FILE", "SKIP_MOCK_PKG"),
    );
    assert!(rewrite_package(&pkg_sentinel, &RewriteOptions::default())
        .unwrap()
        .is_none());
}

#[test]
fn rewriting_is_deterministic() {
    let pkg = make_package("demo::service", SIMPLE);
    let a = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    let b = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(a.files[0].content, b.files[0].content);
    assert_eq!(a.mock_content, b.mock_content);
}

#[test]
fn generic_and_async_functions_are_skipped() {
    let source = r#"use mockgraft::runtime::Context;

pub fn plain<T: Clone>(ctx: &Context, x: T) -> T {
    let _ = ctx;
    x
}

pub async fn fetch(ctx: &Context) -> i32 {
    let _ = ctx;
    1
}
"#;
    let pkg = make_package("demo::service", source);
    assert!(rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .is_none());
}

#[test]
fn skip_non_ctx_requires_context_first() {
    let source = r#"pub fn helper(status: i32) -> i32 {
    status
}
"#;
    let pkg = make_package("demo::util", source);
    let opts = RewriteOptions {
        filter: None,
        skip_non_ctx: true,
    };
    assert!(rewrite_package(&pkg, &opts).unwrap().is_none());

    // Without the restriction the function is trapped, context slot empty.
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    assert!(res.files[0].content.contains("_mock::trap_fn(None, "));
}

#[test]
fn unexported_function_field_gets_prefix() {
    let source = r#"use mockgraft::runtime::Context;

fn quiet(ctx: &Context) -> i32 {
    let _ = ctx;
    0
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    assert!(res.mock_content.contains("pub M_quiet: Option<fn"));
    // Unexported functions have no quick link.
    assert!(!res.mock_content.contains("super::quiet"));
}

#[test]
fn invisible_types_are_fenced_out() {
    let source = r#"use mockgraft::runtime::Context;

struct secret(i32);

pub fn reveal(ctx: &Context, s: secret) -> i32 {
    let _ = ctx;
    s.0
}

pub fn clean(ctx: &Context, x: i32) -> i32 {
    let _ = ctx;
    x
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    let mock = &res.mock_content;
    // The invisible entry is commented out, the clean one is live.
    assert!(mock.contains("// reveal: Option<fn"));
    assert!(mock.contains("references invisible types"));
    assert!(mock.contains("pub clean: Option<fn"));
    assert!(!mock.contains("(\"reveal\", e.reveal"));
    assert!(mock.contains("(\"clean\", e.clean, super::clean)"));
    // The prelude of the fenced function never touches the table.
    let content = &res.files[0].content;
    assert!(!content.contains("t.reveal"));
    assert!(content.contains("t.clean"));
}

#[test]
fn details_surface_import_and_export_maps() {
    let source = r#"use mockgraft::runtime::Context;
use serde::de::IgnoredAny;

struct hidden(i32);

pub fn run(ctx: &Context, any: IgnoredAny, h: hidden) -> i32 {
    let _ = (ctx, any, h);
    0
}
"#;
    let pkg = make_package("demo::service", source);
    let res = rewrite_package(&pkg, &RewriteOptions::default())
        .unwrap()
        .unwrap();
    let detail = &res.details[0];
    assert!(detail.import_pkg_by_types.contains_key("serde::de"));
    assert_eq!(
        detail.export_names.get("hidden").map(String::as_str),
        Some("MExport_hidden")
    );
}
