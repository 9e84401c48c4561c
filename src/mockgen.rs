//! Companion module generation.
//!
//! Each rewritten package gets exactly one generated child module exposing
//! its mock table: sentinel constants, a `Setup` entry point, the table
//! type `M` whose fields mirror the trapped signatures, a quick-link
//! function whose only purpose is the compile-time existence check of every
//! referenced entry, and the registry hookup.
//!
//! Type expressions are re-packaged on the way out: identifiers resolving
//! to named types of the package itself become `super::` references, and
//! qualifiers bound by the file's `use` declarations are re-qualified under
//! this module's own import list.

use std::ops::Range;

use anyhow::{anyhow, Result};
use syn::spanned::Spanned;
use syn::visit::Visit;

use crate::gen::{indent, line, TemplateBuilder, VarMap};
use crate::imports::{ImportEntry, ImportList};
use crate::loader::resolver::{is_primitive_name, prelude_path, FileResolver, RefKind, RUNTIME_PKG};
use crate::loader::{Package, SourceFile};
use crate::rewrite::config::RewriteConfig;
use crate::rewrite::{RewriteFileDetail, MOCK_ALIAS, SKIP_MOCK_FILE, SKIP_MOCK_PKG};

/// Generate the companion source for one rewritten package.
pub fn gen_mock_stub(pkg: &Package, details: &[RewriteFileDetail]) -> Result<String> {
    let mut imports = ImportList::new();
    let mut reserved: Vec<String> = vec![
        "Setup".into(),
        "M".into(),
        SKIP_MOCK_PKG.into(),
        SKIP_MOCK_FILE.into(),
        "FULL_PKG_NAME".into(),
        "ensure_registered".into(),
        "REGISTER".into(),
    ];

    // Owner struct names are part of the module surface too.
    let mut owners: Vec<String> = Vec::new();
    for detail in details {
        for func in &detail.funcs {
            let owner_field = func.config.table_owner_field();
            if !owner_field.is_empty() && !owners.contains(&owner_field) {
                owners.push(owner_field);
            }
        }
    }
    for owner_field in &owners {
        reserved.push(owner_struct_name(owner_field));
    }
    let reserved_refs: Vec<&str> = reserved.iter().map(String::as_str).collect();
    imports.reserve(&reserved_refs);
    imports.bind(&pkg.pkg_path, "super");

    struct OwnerGroup {
        field: String,
        strukt: String,
        decls: Vec<String>,
        links: Vec<String>,
    }
    let mut ownerless_decls: Vec<String> = Vec::new();
    let mut ownerless_links: Vec<String> = Vec::new();
    let mut groups: Vec<OwnerGroup> = Vec::new();
    let mut stub_sigs: Vec<String> = Vec::new();

    for detail in details {
        let file = pkg
            .files
            .iter()
            .find(|f| f.path == detail.file_path)
            .ok_or_else(|| anyhow!("no source for {}", detail.file_path.display()))?;
        let resolver = FileResolver::new(&pkg.ctx, &pkg.pkg_path, &file.uses);

        for func in &detail.funcs {
            let rc = &func.config;
            let commented = !rc.signature_visible;

            let fn_type = emit_fn_type(
                file,
                &resolver,
                &mut imports,
                &pkg.pkg_path,
                rc,
                func.return_ty.as_ref(),
                commented,
            )?;
            let field_name = rc.table_func_field();

            let (decls, links) = match rc.owner.is_empty() {
                true => (&mut ownerless_decls, &mut ownerless_links),
                false => {
                    let owner_field = rc.table_owner_field();
                    if !groups.iter().any(|g| g.field == owner_field) {
                        groups.push(OwnerGroup {
                            strukt: owner_struct_name(&owner_field),
                            field: owner_field.clone(),
                            decls: Vec::new(),
                            links: Vec::new(),
                        });
                    }
                    let group = groups
                        .iter_mut()
                        .find(|g| g.field == owner_field)
                        .expect("group just ensured");
                    (&mut group.decls, &mut group.links)
                }
            };

            if commented {
                decls.push(format!(
                    "// {}: Option<{}>, // NOTE: {} references invisible types",
                    field_name, fn_type, field_name
                ));
            } else {
                decls.push(format!("pub {}: Option<{}>,", field_name, fn_type));
                // Only publicly reachable pairs get an existence check.
                if rc.exported && (rc.owner.is_empty() || rc.owner_exported) {
                    let original = if rc.owner.is_empty() {
                        format!("super::{}", rc.func_name)
                    } else {
                        format!("super::{}::{}", rc.owner, rc.func_name)
                    };
                    let xref = if rc.owner.is_empty() {
                        format!("e.{}", field_name)
                    } else {
                        format!("e.{}.{}", rc.table_owner_field(), field_name)
                    };
                    links.push(format!(
                        "let _ = ({:?}, {}, {});",
                        field_name, xref, original
                    ));
                }
            }

            stub_sigs.push(stub_sig_literal(rc));
        }
    }

    // Predefined imports come last; their preferred names stay stable.
    let mock_name = imports.ensure_or_next(RUNTIME_PKG, MOCK_ALIAS, "runtime")?;

    let use_items: Vec<String> = imports
        .sorted_entries()
        .iter()
        .map(|e| format_use_item(e, &pkg.crate_name))
        .collect();

    let mut struct_m: Vec<String> = Vec::new();
    struct_m.extend(ownerless_decls.iter().cloned());
    for group in &groups {
        struct_m.push(format!("pub {}: {},", group.field, group.strukt));
    }

    let mut owner_structs: Vec<String> = Vec::new();
    for group in &groups {
        owner_structs.push(String::new());
        owner_structs.push("#[derive(Default)]".to_string());
        owner_structs.push(format!("pub struct {} {{", group.strukt));
        for decl in &group.decls {
            owner_structs.push(format!("    {}", decl));
        }
        owner_structs.push("}".to_string());
    }

    let mut links: Vec<String> = Vec::new();
    links.extend(ownerless_links.iter().cloned());
    for group in &groups {
        links.extend(group.links.iter().cloned());
    }

    let mut vars = VarMap::new();
    vars.set("__FULL_PKG__", pkg.pkg_path.clone());
    vars.set("__MOCKP__", mock_name);

    let mut t = TemplateBuilder::new();
    t.block(vec![
        line("// Code generated by mockgraft; DO NOT EDIT."),
        line("#![allow(non_snake_case, non_camel_case_types, dead_code, unused_imports, clippy::type_complexity)]"),
        line(""),
        crate::gen::Stmt::Lines(use_items),
        line(""),
        line(format!("pub const {}: bool = true;", SKIP_MOCK_PKG)),
        line("pub const FULL_PKG_NAME: &str = \"__FULL_PKG__\";"),
        line(""),
        line("pub fn Setup(ctx: &__MOCKP__::Context, setup: impl FnOnce(&mut M)) -> __MOCKP__::Context {"),
        line("    ensure_registered();"),
        line("    let mut m = M::default();"),
        line("    setup(&mut m);"),
        line("    __MOCKP__::with_mock_table(ctx, FULL_PKG_NAME, m)"),
        line("}"),
        line(""),
        line("#[derive(Default)]"),
        line("pub struct M {"),
        indent("    ", vec![crate::gen::Stmt::Lines(struct_m)]),
        line("}"),
        crate::gen::Stmt::Lines(owner_structs),
        line(""),
        line("/* provides quick link */"),
        line("fn _quick_link() {"),
        line("    let e = M::default();"),
        indent("    ", vec![crate::gen::Stmt::Lines(links)]),
        line("    let _ = e;"),
        line("}"),
        line(""),
        line("static REGISTER: ::std::sync::Once = ::std::sync::Once::new();"),
        line(""),
        line("fn ensure_registered() {"),
        line("    REGISTER.call_once(|| {"),
        line("        __MOCKP__::registry()"),
        line("            .register_package(FULL_PKG_NAME, &["),
        indent("                ", vec![crate::gen::Stmt::Lines(stub_sigs)]),
        line("            ])"),
        line("            .expect(\"duplicate mock stub registration\");"),
        line("    });"),
        line("}"),
        line(""),
    ]);
    Ok(t.format(&vars))
}

fn owner_struct_name(owner_field: &str) -> String {
    format!("M{}", owner_field)
}

/// The fn-pointer type of one trapped function, receiver reified as the
/// first parameter.
fn emit_fn_type(
    file: &SourceFile,
    resolver: &FileResolver<'_>,
    imports: &mut ImportList,
    pkg_path: &str,
    rc: &RewriteConfig,
    return_ty: Option<&syn::Type>,
    commented: bool,
) -> Result<String> {
    let mut params: Vec<String> = Vec::new();
    if let Some(recv) = &rc.recv {
        let recv_ty = if rc.owner_exported {
            let amp = if recv.type_desc.is_pointer { "&" } else { "" };
            format!("{}super::{}", amp, rc.owner)
        } else {
            // The unexported owner is reified as an opaque reference.
            "&dyn ::core::any::Any".to_string()
        };
        params.push(format!("_: {}", recv_ty));
    }
    for field in &rc.full_args {
        let name = if field.orig_name.is_empty() {
            "_"
        } else {
            field.orig_name.as_str()
        };
        let ty = repackage_type(file, resolver, imports, pkg_path, &field.ty, commented)?;
        params.push(format!("{}: {}", name, ty));
    }
    let ret = match return_ty {
        Some(ty) => format!(
            " -> {}",
            repackage_type(file, resolver, imports, pkg_path, ty, commented)?
        ),
        None => String::new(),
    };
    Ok(format!("fn({}){}", params.join(", "), ret))
}

/// Registry descriptor literal of one trapped function.
fn stub_sig_literal(rc: &RewriteConfig) -> String {
    let fields = |list: &[crate::rewrite::config::Field]| -> String {
        list.iter()
            .map(|f| format!("({:?}, {:?})", f.exported_name, f.type_text))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "__MOCKP__::StubSig {{ owner: {:?}, owner_ptr: {}, name: {:?}, args: &[{}], results: &[{}], first_is_ctx: {}, last_is_err: {} }},",
        rc.owner,
        rc.owner_ptr,
        rc.func_name,
        fields(rc.args()),
        fields(rc.results()),
        rc.first_is_ctx,
        rc.last_is_err,
    )
}

fn format_use_item(entry: &ImportEntry, crate_name: &str) -> String {
    let native = entry.path.rsplit("::").next().unwrap_or(&entry.path);
    let target = if entry.path == crate_name {
        "crate".to_string()
    } else if let Some(rest) = entry.path.strip_prefix(&format!("{}::", crate_name)) {
        format!("crate::{}", rest)
    } else {
        entry.path.clone()
    };
    if entry.use_name == native && target != "crate" {
        format!("use {};", target)
    } else {
        format!("use {} as {};", target, entry.use_name)
    }
}

/// Re-packaged source text of a type expression.
///
/// The original bytes are copied verbatim except for path qualifiers that
/// would not resolve from the companion module: same-package names become
/// `super::Name`, `use`-bound and relative qualifiers are re-qualified
/// through the import list. With `commented` set the import list is left
/// untouched and native names are used instead.
pub fn repackage_type(
    file: &SourceFile,
    resolver: &FileResolver<'_>,
    imports: &mut ImportList,
    pkg_path: &str,
    ty: &syn::Type,
    commented: bool,
) -> Result<String> {
    let range = ty.span().byte_range();
    let src = file.content.as_str();
    if range.start >= range.end || range.end > src.len() {
        return Err(anyhow!("type span out of range for {}", file.path.display()));
    }

    struct V<'a, 'r> {
        file: &'a SourceFile,
        resolver: &'r FileResolver<'r>,
        imports: &'a mut ImportList,
        pkg_path: &'a str,
        commented: bool,
        edits: Vec<(Range<usize>, String)>,
        err: Option<anyhow::Error>,
    }

    impl V<'_, '_> {
        fn rewrite_of(&mut self, path: &syn::Path) -> Option<String> {
            if path.leading_colon.is_some() {
                return None;
            }
            let first = path.segments.first()?.ident.to_string();
            if first == "crate" {
                return None;
            }
            let single = path.segments.len() == 1;
            let bound = self.file.uses.get(&first).is_some();
            let relative = first == "self" || first == "super";
            if !single && !bound && !relative {
                // Already an absolute external path.
                return None;
            }
            if single && !bound {
                if is_primitive_name(&first) || prelude_path(&first).is_some() {
                    return None;
                }
                if first == "Self" {
                    return None;
                }
            }
            let target = self.resolver.resolve_path(path)?;
            if matches!(target.kind, RefKind::Primitive) {
                return None;
            }
            if target.pkg_path == self.pkg_path {
                return Some(format!("super::{}", target.name));
            }
            if self.commented {
                let native = target.pkg_path.rsplit("::").next().unwrap_or("");
                return Some(format!("{}::{}", native, target.name));
            }
            let native = target
                .pkg_path
                .rsplit("::")
                .next()
                .unwrap_or(&target.pkg_path)
                .to_string();
            match self.imports.ensure_or_next(&target.pkg_path, "", &native) {
                Ok(alias) => Some(format!("{}::{}", alias, target.name)),
                Err(e) => {
                    self.err = Some(e);
                    None
                }
            }
        }

        fn push_path_edit(&mut self, path: &syn::Path) {
            if let Some(replacement) = self.rewrite_of(path) {
                let begin = path.span().byte_range().start;
                let end = path
                    .segments
                    .last()
                    .map(|s| s.ident.span().byte_range().end)
                    .unwrap_or(begin);
                self.edits.push((begin..end, replacement));
            }
        }
    }

    impl<'ast> Visit<'ast> for V<'_, '_> {
        fn visit_type_path(&mut self, node: &'ast syn::TypePath) {
            if node.qself.is_none() {
                self.push_path_edit(&node.path);
            }
            syn::visit::visit_type_path(self, node);
        }

        fn visit_trait_bound(&mut self, node: &'ast syn::TraitBound) {
            self.push_path_edit(&node.path);
            syn::visit::visit_trait_bound(self, node);
        }
    }

    let mut v = V {
        file,
        resolver,
        imports,
        pkg_path,
        commented,
        edits: Vec::new(),
        err: None,
    };
    v.visit_type(ty);
    if let Some(err) = v.err {
        return Err(err);
    }

    let mut edits = v.edits;
    edits.sort_by_key(|(r, _)| r.start);
    let mut out = String::new();
    let mut off = range.start;
    for (r, text) in edits {
        if r.start < off {
            continue;
        }
        out.push_str(&src[off..r.start]);
        out.push_str(&text);
        off = r.end;
    }
    out.push_str(&src[off..range.end]);
    Ok(out)
}
