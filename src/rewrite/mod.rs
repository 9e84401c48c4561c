//! Source rewriting: trap eligible functions in place.
//!
//! For each source file the rewriter walks the syntax tree, decides which
//! top-level functions to trap, and collects an edit plan: rename parameters
//! to their effective names, ensure the runtime import, insert the trap
//! prelude one byte past the body's opening brace, and move the original
//! body into a renamed inner function declared immediately afterwards. The
//! plan is applied through the edit buffer, so the tree itself is never
//! mutated and line numbers outside the prelude survive.

pub mod config;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use syn::spanned::Spanned;
use syn::visit::Visit;
use tracing::debug;

use crate::edit::Buffer;
use crate::errors::RewriteError;
use crate::loader::resolver::{FileResolver, RefKind, RUNTIME_PKG};
use crate::loader::{Package, SourceFile};
use config::{to_exported, Field, RewriteConfig, TypeDesc, EXPORT_PREFIX};

/// Fixed local alias of the mock runtime in rewritten files.
pub const MOCK_ALIAS: &str = "_mock";
/// Package-scope sentinel: its presence skips the whole package.
pub const SKIP_MOCK_PKG: &str = "SKIP_MOCK_PKG";
/// File-scope sentinel: its presence skips one file.
pub const SKIP_MOCK_FILE: &str = "SKIP_MOCK_FILE";

/// User filter over `(pkg_path, file, owner, owner_is_ptr, func)`.
pub type FilterFn = Arc<dyn Fn(&str, &Path, &str, bool, &str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct RewriteOptions {
    pub filter: Option<FilterFn>,
    /// Only trap functions whose first parameter is the context type.
    pub skip_non_ctx: bool,
}

/// A package imported because trapped signatures reference its types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAlias {
    /// Native package name (last path segment).
    pub name: String,
    /// Alias the source file bound it to, if any.
    pub alias: String,
    /// The effective appearance in this file.
    pub use_name: String,
}

/// One trapped function, ready for prelude and stub generation.
#[derive(Debug, Clone)]
pub struct RewriteFuncDetail {
    pub config: RewriteConfig,
    /// Original return type, kept for re-packaged emission.
    pub return_ty: Option<syn::Type>,
}

/// Per-file rewrite output consumed by the stub generator.
#[derive(Debug)]
pub struct RewriteFileDetail {
    pub file_path: PathBuf,
    pub funcs: Vec<RewriteFuncDetail>,
    /// Same-package unexported type names and their would-be exported
    /// aliases. Surfaced for external generators.
    pub export_names: HashMap<String, String>,
    /// Packages imported by trapped signature types.
    pub import_pkg_by_types: HashMap<String, NameAlias>,
}

/// Rewritten bytes of one file.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub orig_file: PathBuf,
    pub content: String,
}

/// Rewrite result of one package.
#[derive(Debug)]
pub struct PackageRewrite {
    pub pkg_path: String,
    pub files: Vec<FileContent>,
    /// Generated companion module source.
    pub mock_content: String,
    pub details: Vec<RewriteFileDetail>,
}

/// Rewrite every non-skipped package, in path order.
pub fn rewrite_packages(
    pkgs: &[Arc<Package>],
    opts: &RewriteOptions,
) -> Result<BTreeMap<String, PackageRewrite>> {
    let mut out = BTreeMap::new();
    for pkg in pkgs {
        if let Some(res) = rewrite_package(pkg, opts)
            .with_context(|| format!("rewriting package {}", pkg.pkg_path))?
        {
            out.insert(res.pkg_path.clone(), res);
        }
    }
    Ok(out)
}

/// Rewrite one package; `None` when nothing in it is trapped or the
/// package opted out.
pub fn rewrite_package(pkg: &Package, opts: &RewriteOptions) -> Result<Option<PackageRewrite>> {
    if pkg
        .files
        .iter()
        .any(|f| has_sentinel_const(&f.syntax, SKIP_MOCK_PKG))
    {
        debug!(pkg = %pkg.pkg_path, "package skipped by sentinel");
        return Ok(None);
    }

    let mut files = Vec::new();
    let mut details = Vec::new();
    let mut companion_attached = false;
    for file in &pkg.files {
        let fname = &file.path;
        if fname.extension().map_or(true, |e| e != "rs") {
            continue;
        }
        if fname
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_test.rs"))
        {
            continue;
        }
        if has_sentinel_const(&file.syntax, SKIP_MOCK_FILE) {
            continue;
        }
        let attach = !companion_attached;
        match rewrite_source(&pkg.pkg_path, pkg, file, opts, attach)? {
            Some((content, detail)) => {
                companion_attached = true;
                files.push(FileContent {
                    orig_file: fname.clone(),
                    content,
                });
                details.push(detail);
            }
            None => continue,
        }
    }
    if files.is_empty() {
        return Ok(None);
    }

    let mock_content = crate::mockgen::gen_mock_stub(pkg, &details)?;
    Ok(Some(PackageRewrite {
        pkg_path: pkg.pkg_path.clone(),
        files,
        mock_content,
        details,
    }))
}

fn has_sentinel_const(file: &syn::File, name: &str) -> bool {
    file.items.iter().any(|item| match item {
        syn::Item::Const(c) => c.ident == name,
        _ => false,
    })
}

/// Rewrite one file; `None` when no function in it is trapped.
pub fn rewrite_source(
    pkg_path: &str,
    pkg: &Package,
    file: &SourceFile,
    opts: &RewriteOptions,
    attach_companion: bool,
) -> Result<Option<(String, RewriteFileDetail)>> {
    let content = file.content.as_str();
    let mut buf = Buffer::new(content);
    let mut funcs: Vec<RewriteFuncDetail> = Vec::new();
    let mut mock_imported = file.uses.binds(MOCK_ALIAS, &["mockgraft", "runtime"]);

    let resolver = FileResolver::new(&pkg.ctx, pkg_path, &file.uses);

    let mut handle = |owner: Option<OwnerInfo>, vis: &syn::Visibility, sig: &syn::Signature, block: &syn::Block| -> Result<()> {
        let Some(mut rc) = init_rewrite_config(pkg_path, &resolver, owner.as_ref(), vis, sig, file, opts)?
        else {
            return Ok(());
        };

        let forbidden = selector_qualifiers(sig);
        rc.assign_unique_names(&forbidden)?;

        if !mock_imported {
            let off = import_offset(file);
            buf.insert(off, format!("use mockgraft::runtime as {}; ", MOCK_ALIAS));
            mock_imported = true;
        }

        // Rename parameters in place so the prelude can reference every
        // effective name.
        for field in &rc.full_args {
            if field.needs_rename() {
                if let Some((begin, end)) = field.name_span {
                    buf.replace(begin, end, field.name.clone());
                }
            }
        }

        let args_src = span_text(content, sig.paren_token.span.open().byte_range().start, sig.paren_token.span.close().byte_range().end);
        let results_src = match &sig.output {
            syn::ReturnType::Default => String::new(),
            syn::ReturnType::Type(arrow, ty) => {
                let begin = arrow.spans[0].byte_range().start;
                let end = ty.span().byte_range().end;
                format!(" {}", span_text(content, begin, end))
            }
        };

        let prelude = rc.gen_prelude(false)?;
        let patch = format!(
            "{}}}#[allow(non_snake_case)] fn {}{}{} {{",
            prelude,
            rc.new_func_name,
            strip_newline(&args_src),
            strip_newline(&results_src),
        );
        let body_open = block.brace_token.span.open().byte_range().end;
        buf.insert(body_open, patch);

        let return_ty = match &sig.output {
            syn::ReturnType::Default => None,
            syn::ReturnType::Type(_, ty) => Some((**ty).clone()),
        };
        funcs.push(RewriteFuncDetail {
            config: rc,
            return_ty,
        });
        Ok(())
    };

    for item in &file.syntax.items {
        match item {
            syn::Item::Fn(f) => {
                handle(None, &f.vis, &f.sig, &f.block)?;
            }
            syn::Item::Impl(imp) => {
                if imp.trait_.is_some() || !imp.generics.params.is_empty() {
                    continue;
                }
                let Some(owner) = owner_of_impl(&resolver, imp) else {
                    continue;
                };
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(m) = impl_item {
                        handle(Some(owner.clone()), &m.vis, &m.sig, &m.block)?;
                    }
                }
            }
            _ => {}
        }
    }

    if funcs.is_empty() {
        return Ok(None);
    }

    if attach_companion {
        buf.insert(content.len(), "\npub mod mock_gen;\n".to_string());
    }

    // Record which packages the trapped signatures pull in, and which
    // same-package names would need an exported alias.
    let mut export_names: HashMap<String, String> = HashMap::new();
    let mut import_pkg_by_types: HashMap<String, NameAlias> = HashMap::new();
    for func in &funcs {
        for field in func.config.all_fields() {
            collect_type_refs(
                &resolver,
                &field.ty,
                pkg_path,
                file,
                &mut export_names,
                &mut import_pkg_by_types,
            );
        }
    }

    let rewritten = buf
        .output()
        .map_err(|e| RewriteError::overlapping_edits(&file.path, e.to_string()))?;
    let detail = RewriteFileDetail {
        file_path: file.path.clone(),
        funcs,
        export_names,
        import_pkg_by_types,
    };
    Ok(Some((rewritten, detail)))
}

#[derive(Debug, Clone)]
struct OwnerInfo {
    name: String,
    public: bool,
}

fn owner_of_impl(resolver: &FileResolver<'_>, imp: &syn::ItemImpl) -> Option<OwnerInfo> {
    let syn::Type::Path(p) = &*imp.self_ty else {
        return None;
    };
    if p.qself.is_some() || p.path.segments.len() != 1 {
        return None;
    }
    let seg = p.path.segments.first()?;
    if !matches!(seg.arguments, syn::PathArguments::None) {
        return None;
    }
    let name = seg.ident.to_string();
    let target = resolver.resolve_path(&p.path)?;
    let public = matches!(target.kind, RefKind::Local { public: true });
    Some(OwnerInfo { name, public })
}

/// Collect identifiers used as path qualifiers in the declaration, which
/// effective field names must not collide with.
fn selector_qualifiers(sig: &syn::Signature) -> HashSet<String> {
    struct V(HashSet<String>);
    impl<'ast> Visit<'ast> for V {
        fn visit_type_path(&mut self, node: &'ast syn::TypePath) {
            if node.path.leading_colon.is_none() && node.path.segments.len() > 1 {
                if let Some(first) = node.path.segments.first() {
                    self.0.insert(first.ident.to_string());
                }
            }
            syn::visit::visit_type_path(self, node);
        }
    }
    let mut v = V(HashSet::new());
    v.visit_signature(sig);
    v.0
}

/// Byte offset at which a missing `use` can be inserted: after a shebang
/// and any inner attributes.
fn import_offset(file: &SourceFile) -> usize {
    let mut off = 0usize;
    if let Some(shebang) = &file.syntax.shebang {
        off = shebang.len();
        if file.content[off..].starts_with('\n') {
            off += 1;
        }
    }
    for attr in &file.syntax.attrs {
        if matches!(attr.style, syn::AttrStyle::Inner(_)) {
            off = off.max(attr.span().byte_range().end);
        }
    }
    if off > 0 && !file.content[..off].ends_with(['\n', ' ']) {
        // Land after the attribute token, not inside it.
        if file.content[off..].starts_with('\n') {
            off += 1;
        }
    }
    off
}

fn span_text(content: &str, begin: usize, end: usize) -> String {
    content[begin..end].to_string()
}

fn strip_newline(s: &str) -> String {
    s.replace('\n', "")
}

/// Build the rewrite configuration of one declaration, or `None` when it
/// is not eligible.
#[allow(clippy::too_many_arguments)]
fn init_rewrite_config(
    pkg_path: &str,
    resolver: &FileResolver<'_>,
    owner: Option<&OwnerInfo>,
    vis: &syn::Visibility,
    sig: &syn::Signature,
    file: &SourceFile,
    opts: &RewriteOptions,
) -> Result<Option<RewriteConfig>> {
    let func_name = sig.ident.to_string();

    // The entry point plays the package-init role and is never trapped.
    if owner.is_none() && func_name == "main" {
        return Ok(None);
    }
    // Shapes whose inner function or table field cannot be expressed.
    if sig.asyncness.is_some()
        || sig.constness.is_some()
        || sig.unsafety.is_some()
        || sig.abi.is_some()
        || sig.variadic.is_some()
        || !sig.generics.params.is_empty()
        || sig.generics.where_clause.is_some()
    {
        return Ok(None);
    }

    let receivers: Vec<&syn::Receiver> = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            syn::FnArg::Receiver(r) => Some(r),
            _ => None,
        })
        .collect();
    if receivers.len() > 1 {
        return Err(RewriteError::malformed(
            format!("{}::{}", pkg_path, func_name),
            "multiple receivers",
        )
        .into());
    }
    let receiver = receivers.first().copied();
    if let Some(r) = receiver {
        // `self: Pin<...>`-style receivers cannot be reified.
        if r.colon_token.is_some() {
            return Ok(None);
        }
    }
    if receiver.is_some() && owner.is_none() {
        return Ok(None);
    }
    // Associated functions without a receiver are neither methods nor free
    // functions; they stay untouched.
    if owner.is_some() && receiver.is_none() {
        return Ok(None);
    }

    let (owner_name, owner_public, owner_ptr) = match (owner, receiver) {
        (Some(info), Some(r)) => (info.name.clone(), info.public, r.reference.is_some()),
        _ => (String::new(), false, false),
    };

    if let Some(filter) = &opts.filter {
        if !filter(pkg_path, &file.path, &owner_name, owner_ptr, &func_name) {
            return Ok(None);
        }
    }

    // Typed parameters must be plain identifier (or blank) patterns.
    let mut params: Vec<(&syn::PatType, Option<String>)> = Vec::new();
    for arg in &sig.inputs {
        if let syn::FnArg::Typed(pt) = arg {
            match &*pt.pat {
                syn::Pat::Ident(pi) => params.push((pt, Some(pi.ident.to_string()))),
                syn::Pat::Wild(_) => params.push((pt, None)),
                _ => return Ok(None),
            }
        }
    }

    // Functions handing a context out cannot be trapped.
    let results = flatten_results(&sig.output);
    for res in &results.fields {
        if type_mentions_context(resolver, res) {
            return Ok(None);
        }
    }

    let first_is_ctx = params
        .first()
        .is_some_and(|(pt, _)| is_context_param(resolver, &pt.ty));
    if !first_is_ctx && opts.skip_non_ctx {
        return Ok(None);
    }
    let ctx_name = if first_is_ctx {
        match &params[0].1 {
            Some(name) if name != "_" => name.clone(),
            _ => "ctx".to_string(),
        }
    } else {
        String::new()
    };

    let content = file.content.as_str();
    let mut full_args = Vec::with_capacity(params.len());
    for (i, (pt, name)) in params.iter().enumerate() {
        let orig = name.clone().unwrap_or_default();
        let effective = if orig.is_empty() || orig == "_" {
            format!("unused_{}", i)
        } else {
            orig.clone()
        };
        let span = pt.pat.span().byte_range();
        full_args.push(make_field(
            resolver,
            content,
            effective,
            orig,
            Some((span.start, span.end)),
            (*pt.ty).clone(),
        ));
    }
    if first_is_ctx {
        full_args[0].name = ctx_name.clone();
    }

    let mut full_results = Vec::with_capacity(results.fields.len() + 1);
    for (i, ty) in results.fields.iter().enumerate() {
        let effective = format!("Resp_{}", i);
        full_results.push(make_field(
            resolver,
            content,
            effective,
            String::new(),
            None,
            ty.clone(),
        ));
    }
    let last_is_err = results.err.is_some();
    let err_name = if last_is_err { "err".to_string() } else { String::new() };
    if let Some(err_ty) = results.err.clone() {
        full_results.push(make_field(
            resolver,
            content,
            err_name.clone(),
            String::new(),
            None,
            err_ty,
        ));
    }

    let recv = receiver.map(|r| {
        let is_ptr = r.reference.is_some();
        let owner_ty = syn::Type::Path(syn::TypePath {
            qself: None,
            path: syn::Path::from(syn::Ident::new(&owner_name, proc_macro2::Span::call_site())),
        });
        let visible = owner_public && resolver.type_visible(&owner_ty);
        let exported_name = if owner_public {
            owner_name.clone()
        } else {
            format!("{}{}", EXPORT_PREFIX, owner_name)
        };
        Field {
            name: "self".to_string(),
            exported_name: to_exported("self"),
            orig_name: "self".to_string(),
            type_desc: TypeDesc {
                is_pointer: is_ptr,
                name: owner_name.clone(),
                exported: owner_public,
                exported_name,
                visible,
            },
            type_text: span_text(content, r.span().byte_range().start, r.span().byte_range().end),
            type_span: (r.span().byte_range().start, r.span().byte_range().end),
            name_span: None,
            variadic: false,
            ty: (*r.ty).clone(),
        }
    });

    let exported = matches!(vis, syn::Visibility::Public(_));
    let full_name = if owner_name.is_empty() {
        func_name.clone()
    } else {
        format!("{}_{}", owner_name, func_name)
    };
    let signature_visible = full_args.iter().all(|f| f.type_desc.visible)
        && full_results.iter().all(|f| f.type_desc.visible);

    Ok(Some(RewriteConfig {
        names: HashSet::new(),
        support_ref: MOCK_ALIAS.to_string(),
        var_prefix: MOCK_ALIAS.to_string(),
        pkg: pkg_path.to_string(),
        owner: owner_name,
        owner_ptr,
        exported,
        owner_exported: owner_public,
        func_name: func_name.clone(),
        new_func_name: format!("_mock{}", full_name),
        ctx_name,
        err_name,
        results_name_gen: true,
        signature_visible,
        first_is_ctx,
        last_is_err,
        recv,
        full_args,
        full_results,
    }))
}

fn make_field(
    resolver: &FileResolver<'_>,
    content: &str,
    name: String,
    orig_name: String,
    name_span: Option<(usize, usize)>,
    ty: syn::Type,
) -> Field {
    let range = ty.span().byte_range();
    let type_text = if range.end <= content.len() && range.start < range.end {
        content[range.start..range.end].to_string()
    } else {
        String::new()
    };
    Field {
        exported_name: to_exported(&name),
        name,
        orig_name,
        type_desc: type_desc_of(resolver, &ty),
        type_text,
        type_span: (range.start, range.end),
        name_span,
        variadic: false,
        ty,
    }
}

fn type_desc_of(resolver: &FileResolver<'_>, ty: &syn::Type) -> TypeDesc {
    let visible = resolver.type_visible(ty);
    let (is_pointer, inner) = peel_references(ty);
    let (name, exported) = match inner {
        syn::Type::Path(p) => match resolver.resolve_path(&p.path) {
            Some(target) => {
                let exported = !matches!(target.kind, RefKind::Local { public: false });
                (target.name, exported)
            }
            None => (String::new(), false),
        },
        _ => (String::new(), false),
    };
    let exported_name = if name.is_empty() || exported {
        name.clone()
    } else {
        format!("{}{}", EXPORT_PREFIX, name)
    };
    TypeDesc {
        is_pointer,
        name,
        exported,
        exported_name,
        visible,
    }
}

fn peel_references(ty: &syn::Type) -> (bool, &syn::Type) {
    let mut is_pointer = false;
    let mut cur = ty;
    loop {
        match cur {
            syn::Type::Reference(r) => {
                is_pointer = true;
                cur = &r.elem;
            }
            syn::Type::Paren(p) => cur = &p.elem,
            syn::Type::Group(g) => cur = &g.elem,
            _ => return (is_pointer, cur),
        }
    }
}

fn is_context_param(resolver: &FileResolver<'_>, ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Reference(r) if r.mutability.is_none() => resolver.is_context_path(&r.elem),
        _ => false,
    }
}

fn type_mentions_context(resolver: &FileResolver<'_>, ty: &syn::Type) -> bool {
    let (_, inner) = peel_references(ty);
    resolver.is_context_path(inner)
}

struct FlatResults {
    fields: Vec<syn::Type>,
    err: Option<syn::Type>,
}

/// Flatten a return type into positional result fields plus an optional
/// trailing error: a two-argument `Result` marks last-is-error, literal
/// top-level tuples flatten element-wise.
fn flatten_results(output: &syn::ReturnType) -> FlatResults {
    let ty = match output {
        syn::ReturnType::Default => {
            return FlatResults {
                fields: Vec::new(),
                err: None,
            }
        }
        syn::ReturnType::Type(_, ty) => (**ty).clone(),
    };
    if let Some((ok, err)) = split_result(&ty) {
        return FlatResults {
            fields: flatten_tuple(ok),
            err: Some(err),
        };
    }
    FlatResults {
        fields: flatten_tuple(ty),
        err: None,
    }
}

fn flatten_tuple(ty: syn::Type) -> Vec<syn::Type> {
    match ty {
        syn::Type::Tuple(t) => t.elems.into_iter().collect(),
        other => vec![other],
    }
}

/// `Result<T, E>` (any path qualification) with two explicit arguments.
fn split_result(ty: &syn::Type) -> Option<(syn::Type, syn::Type)> {
    let syn::Type::Path(p) = ty else { return None };
    let last = p.path.segments.last()?;
    if last.ident != "Result" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &last.arguments else {
        return None;
    };
    let types: Vec<&syn::Type> = args
        .args
        .iter()
        .filter_map(|a| match a {
            syn::GenericArgument::Type(t) => Some(t),
            _ => None,
        })
        .collect();
    if types.len() != 2 {
        return None;
    }
    Some((types[0].clone(), types[1].clone()))
}

fn collect_type_refs(
    resolver: &FileResolver<'_>,
    ty: &syn::Type,
    pkg_path: &str,
    file: &SourceFile,
    export_names: &mut HashMap<String, String>,
    import_pkg_by_types: &mut HashMap<String, NameAlias>,
) {
    struct V<'a, 'r> {
        resolver: &'r FileResolver<'r>,
        pkg_path: &'a str,
        file: &'a SourceFile,
        export_names: &'a mut HashMap<String, String>,
        imports: &'a mut HashMap<String, NameAlias>,
    }
    impl<'ast> Visit<'ast> for V<'_, '_> {
        fn visit_type_path(&mut self, node: &'ast syn::TypePath) {
            if let Some(target) = self.resolver.resolve_path(&node.path) {
                match &target.kind {
                    RefKind::Local { public } if target.pkg_path == self.pkg_path => {
                        if !*public {
                            self.export_names.insert(
                                target.name.clone(),
                                format!("{}{}", EXPORT_PREFIX, target.name),
                            );
                        }
                    }
                    RefKind::Local { .. } | RefKind::External | RefKind::Std => {
                        if !target.pkg_path.is_empty()
                            && !self.imports.contains_key(&target.pkg_path)
                        {
                            let name = target
                                .pkg_path
                                .rsplit("::")
                                .next()
                                .unwrap_or(&target.pkg_path)
                                .to_string();
                            let alias = self.file.uses.alias_for(&target.pkg_path);
                            let use_name = alias.clone().unwrap_or_else(|| name.clone());
                            self.imports.insert(
                                target.pkg_path.clone(),
                                NameAlias {
                                    name,
                                    alias: alias.unwrap_or_default(),
                                    use_name,
                                },
                            );
                        }
                    }
                    RefKind::Primitive => {}
                }
            }
            syn::visit::visit_type_path(self, node);
        }
    }
    let mut v = V {
        resolver,
        pkg_path,
        file,
        export_names,
        imports: import_pkg_by_types,
    };
    v.visit_type(ty);
}
