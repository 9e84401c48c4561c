//! Signature-level name resolution.
//!
//! The rewriter and the stub generator only ever need to know what the
//! identifiers inside a function *signature* refer to: which package a named
//! type lives in, whether it is public, and whether its transitive closure
//! stays public. That is resolved here from three inputs: the file's `use`
//! declarations, an index of type declarations across the owning crate, and
//! the dependency names reported by cargo.
//!
//! Resolution is a fixed-point walk with a visited set; self-referential
//! types terminate without special handling.

use std::collections::{HashMap, HashSet};

use syn::{Item, UseTree};

/// The package path of the mock runtime, fixed for generated code.
pub const RUNTIME_PKG: &str = "mockgraft::runtime";

/// Where a resolved name lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind {
    /// Built-in primitive (`i32`, `bool`, `str`, …).
    Primitive,
    /// Standard library (including prelude names).
    Std,
    /// An external dependency crate.
    External,
    /// Declared in the crate being rewritten.
    Local { public: bool },
}

/// A resolved named type: owning package path plus the bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub pkg_path: String,
    pub name: String,
    pub kind: RefKind,
}

impl TypeRef {
    pub fn is_context(&self) -> bool {
        self.pkg_path == RUNTIME_PKG && self.name == "Context"
    }
}

/// `use`-declaration bindings of one file: bound identifier → full path.
#[derive(Debug, Clone, Default)]
pub struct UseMap {
    map: HashMap<String, Vec<String>>,
}

impl UseMap {
    pub fn from_file(file: &syn::File) -> Self {
        let mut map = HashMap::new();
        for item in &file.items {
            if let Item::Use(item_use) = item {
                collect_use_tree(&item_use.tree, &mut Vec::new(), &mut map);
            }
        }
        Self { map }
    }

    pub fn get(&self, ident: &str) -> Option<&[String]> {
        self.map.get(ident).map(Vec::as_slice)
    }

    /// True when the file already binds `alias` to exactly `path`.
    pub fn binds(&self, alias: &str, path: &[&str]) -> bool {
        self.get(alias)
            .is_some_and(|bound| bound.iter().map(String::as_str).eq(path.iter().copied()))
    }

    pub fn merge(&mut self, other: UseMap) {
        self.map.extend(other.map);
    }

    /// The alias the file binds for exactly this package path, when the
    /// binding renames it.
    pub fn alias_for(&self, pkg_path: &str) -> Option<String> {
        for (ident, segs) in &self.map {
            if segs.join("::") == pkg_path && segs.last().is_some_and(|last| last != ident) {
                return Some(ident.clone());
            }
        }
        None
    }
}

fn collect_use_tree(tree: &UseTree, prefix: &mut Vec<String>, map: &mut HashMap<String, Vec<String>>) {
    match tree {
        UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            collect_use_tree(&p.tree, prefix, map);
            prefix.pop();
        }
        UseTree::Name(n) => {
            let mut path = prefix.clone();
            path.push(n.ident.to_string());
            map.insert(n.ident.to_string(), path);
        }
        UseTree::Rename(r) => {
            let mut path = prefix.clone();
            path.push(r.ident.to_string());
            map.insert(r.rename.to_string(), path);
        }
        UseTree::Glob(_) => {
            // Glob imports carry no binding information; identifiers they
            // would supply resolve conservatively as unknown.
        }
        UseTree::Group(g) => {
            for item in &g.items {
                collect_use_tree(item, prefix, map);
            }
        }
    }
}

/// One indexed type declaration.
#[derive(Debug, Clone)]
struct TypeDecl {
    public: bool,
    refs: Vec<syn::Type>,
}

/// Crate-wide index of type declarations, keyed by `(module path, name)`,
/// together with each module's `use` bindings so declarations can be
/// followed from their own module's perspective.
#[derive(Debug, Default)]
pub struct TypeIndex {
    decls: HashMap<(String, String), TypeDecl>,
    module_uses: HashMap<String, UseMap>,
}

impl TypeIndex {
    pub fn index_file(&mut self, pkg_path: &str, file: &syn::File) {
        self.module_uses
            .entry(pkg_path.to_string())
            .or_default()
            .merge(UseMap::from_file(file));
        self.index_items(pkg_path, &file.items);
    }

    fn uses_for(&self, pkg_path: &str) -> Option<&UseMap> {
        self.module_uses.get(pkg_path)
    }

    fn index_items(&mut self, pkg_path: &str, items: &[Item]) {
        for item in items {
            match item {
                Item::Struct(s) => {
                    let refs = s.fields.iter().map(|f| f.ty.clone()).collect();
                    self.insert(pkg_path, s.ident.to_string(), &s.vis, refs);
                }
                Item::Enum(e) => {
                    let refs = e
                        .variants
                        .iter()
                        .flat_map(|v| v.fields.iter().map(|f| f.ty.clone()))
                        .collect();
                    self.insert(pkg_path, e.ident.to_string(), &e.vis, refs);
                }
                Item::Type(t) => {
                    self.insert(pkg_path, t.ident.to_string(), &t.vis, vec![(*t.ty).clone()]);
                }
                Item::Union(u) => {
                    let refs = u.fields.named.iter().map(|f| f.ty.clone()).collect();
                    self.insert(pkg_path, u.ident.to_string(), &u.vis, refs);
                }
                Item::Trait(t) => {
                    self.insert(pkg_path, t.ident.to_string(), &t.vis, Vec::new());
                }
                Item::Mod(m) => {
                    if let Some((_, nested)) = &m.content {
                        let nested_path = format!("{}::{}", pkg_path, m.ident);
                        self.index_items(&nested_path, nested);
                    }
                }
                _ => {}
            }
        }
    }

    fn insert(&mut self, pkg_path: &str, name: String, vis: &syn::Visibility, refs: Vec<syn::Type>) {
        let public = matches!(vis, syn::Visibility::Public(_));
        self.decls
            .insert((pkg_path.to_string(), name), TypeDecl { public, refs });
    }

    fn get(&self, pkg_path: &str, name: &str) -> Option<&TypeDecl> {
        self.decls.get(&(pkg_path.to_string(), name.to_string()))
    }

    pub fn contains(&self, pkg_path: &str, name: &str) -> bool {
        self.get(pkg_path, name).is_some()
    }
}

/// Shared resolution context of one crate.
#[derive(Debug)]
pub struct CrateCtx {
    pub crate_name: String,
    pub dep_crates: HashSet<String>,
    pub type_index: TypeIndex,
}

/// Prelude names that resolve without an import.
pub fn prelude_path(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "String" => Some(&["std", "string", "String"]),
        "Vec" => Some(&["std", "vec", "Vec"]),
        "Option" => Some(&["std", "option", "Option"]),
        "Result" => Some(&["std", "result", "Result"]),
        "Box" => Some(&["std", "boxed", "Box"]),
        _ => None,
    }
}

/// Built-in primitive type names.
pub fn is_primitive_name(name: &str) -> bool {
    is_primitive(name)
}

fn is_primitive(name: &str) -> bool {
    matches!(
        name,
        "bool"
            | "char"
            | "str"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "u128"
            | "usize"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "i128"
            | "isize"
            | "f32"
            | "f64"
    )
}

/// Resolver for one file's signatures.
pub struct FileResolver<'a> {
    ctx: &'a CrateCtx,
    /// Module path of the file, e.g. `["demo", "service"]`.
    module: Vec<String>,
    uses: &'a UseMap,
    /// Resolution target of `Self`, when inside an impl block.
    self_target: Option<(String, String)>,
}

impl<'a> FileResolver<'a> {
    pub fn new(ctx: &'a CrateCtx, pkg_path: &str, uses: &'a UseMap) -> Self {
        Self {
            ctx,
            module: pkg_path.split("::").map(str::to_string).collect(),
            uses,
            self_target: None,
        }
    }

    pub fn with_self_target(mut self, pkg_path: &str, name: &str) -> Self {
        self.self_target = Some((pkg_path.to_string(), name.to_string()));
        self
    }

    pub fn pkg_path(&self) -> String {
        self.module.join("::")
    }

    /// Resolve a type path to the package and name it refers to.
    pub fn resolve_path(&self, path: &syn::Path) -> Option<TypeRef> {
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
        let absolute = path.leading_colon.is_some();
        self.resolve_segments(&segments, absolute, 0)
    }

    fn resolve_segments(&self, segments: &[String], absolute: bool, depth: usize) -> Option<TypeRef> {
        if segments.is_empty() || depth > 8 {
            return None;
        }
        let first = segments[0].as_str();

        if segments.len() == 1 && !absolute {
            if is_primitive(first) {
                return Some(TypeRef {
                    pkg_path: String::new(),
                    name: first.to_string(),
                    kind: RefKind::Primitive,
                });
            }
            if first == "Self" {
                if let Some((pkg, name)) = &self.self_target {
                    return Some(self.local_ref(pkg.clone(), name.clone()));
                }
                return None;
            }
            if let Some(bound) = self.uses.get(first) {
                return self.resolve_segments(&bound.to_vec(), false, depth + 1);
            }
            if let Some(prelude) = prelude_path(first) {
                let owned: Vec<String> = prelude.iter().map(|s| s.to_string()).collect();
                return self.resolve_segments(&owned, false, depth + 1);
            }
            // A bare name with no import: a declaration in this module.
            return Some(self.local_ref(self.pkg_path(), first.to_string()));
        }

        let expanded: Vec<String> = match first {
            "crate" => {
                let mut p = vec![self.ctx.crate_name.clone()];
                p.extend(segments[1..].iter().cloned());
                p
            }
            "self" => {
                let mut p = self.module.clone();
                p.extend(segments[1..].iter().cloned());
                p
            }
            "super" => {
                let mut base = self.module.clone();
                let mut rest = segments;
                while rest.first().map(String::as_str) == Some("super") {
                    base.pop()?;
                    rest = &rest[1..];
                }
                base.extend(rest.iter().cloned());
                base
            }
            _ if !absolute && self.uses.get(first).is_some() => {
                let mut p = self.uses.get(first).expect("checked").to_vec();
                p.extend(segments[1..].iter().cloned());
                p
            }
            _ => segments.to_vec(),
        };

        let (head, name) = expanded.split_at(expanded.len() - 1);
        let name = name[0].clone();
        let root = head.first().map(String::as_str).unwrap_or("");
        let pkg_path = head.join("::");

        if crate::loader::is_std_crate(root) {
            return Some(TypeRef {
                pkg_path,
                name,
                kind: RefKind::Std,
            });
        }
        if root == self.ctx.crate_name {
            return Some(self.local_ref(pkg_path, name));
        }
        if self.ctx.dep_crates.contains(root) {
            return Some(TypeRef {
                pkg_path,
                name,
                kind: RefKind::External,
            });
        }
        None
    }

    fn local_ref(&self, pkg_path: String, name: String) -> TypeRef {
        let public = self
            .ctx
            .type_index
            .get(&pkg_path, &name)
            .map(|d| d.public)
            .unwrap_or(false);
        TypeRef {
            pkg_path,
            name,
            kind: RefKind::Local { public },
        }
    }

    /// Does this type expression resolve to the runtime context type?
    pub fn is_context_path(&self, ty: &syn::Type) -> bool {
        match ty {
            syn::Type::Path(p) => self
                .resolve_path(&p.path)
                .is_some_and(|r| r.is_context()),
            syn::Type::Paren(p) => self.is_context_path(&p.elem),
            syn::Type::Group(g) => self.is_context_path(&g.elem),
            _ => false,
        }
    }

    /// Whether `ty`, traversed transitively, references only public names.
    pub fn type_visible(&self, ty: &syn::Type) -> bool {
        let mut seen = HashSet::new();
        self.visible_inner(ty, &mut seen)
    }

    fn visible_inner(&self, ty: &syn::Type, seen: &mut HashSet<(String, String)>) -> bool {
        match ty {
            syn::Type::Path(p) => {
                if let Some(qself) = &p.qself {
                    if !self.visible_inner(&qself.ty, seen) {
                        return false;
                    }
                }
                let Some(target) = self.resolve_path(&p.path) else {
                    return false;
                };
                if !self.ref_visible(&target, seen) {
                    return false;
                }
                // Generic arguments are part of the expression.
                for seg in &p.path.segments {
                    if let syn::PathArguments::AngleBracketed(args) = &seg.arguments {
                        for arg in &args.args {
                            if let syn::GenericArgument::Type(t) = arg {
                                if !self.visible_inner(t, seen) {
                                    return false;
                                }
                            }
                        }
                    }
                }
                true
            }
            syn::Type::Reference(r) => self.visible_inner(&r.elem, seen),
            syn::Type::Ptr(p) => self.visible_inner(&p.elem, seen),
            syn::Type::Slice(s) => self.visible_inner(&s.elem, seen),
            syn::Type::Array(a) => self.visible_inner(&a.elem, seen),
            syn::Type::Paren(p) => self.visible_inner(&p.elem, seen),
            syn::Type::Group(g) => self.visible_inner(&g.elem, seen),
            syn::Type::Tuple(t) => t.elems.iter().all(|e| self.visible_inner(e, seen)),
            syn::Type::BareFn(f) => {
                f.inputs.iter().all(|i| self.visible_inner(&i.ty, seen))
                    && match &f.output {
                        syn::ReturnType::Default => true,
                        syn::ReturnType::Type(_, t) => self.visible_inner(t, seen),
                    }
            }
            syn::Type::TraitObject(t) => t.bounds.iter().all(|b| match b {
                syn::TypeParamBound::Trait(tb) => self
                    .resolve_path(&tb.path)
                    .map(|r| self.ref_visible(&r, seen))
                    .unwrap_or(false),
                _ => true,
            }),
            // `impl Trait` cannot appear in a named fn-pointer type, so a
            // signature using it can never surface in the mock table.
            syn::Type::ImplTrait(_) => false,
            syn::Type::Infer(_) => false,
            syn::Type::Never(_) => true,
            syn::Type::Macro(_) => false,
            _ => false,
        }
    }

    /// Visibility of one resolved reference, following local declarations
    /// to a fixed point.
    fn ref_visible(&self, target: &TypeRef, seen: &mut HashSet<(String, String)>) -> bool {
        match &target.kind {
            RefKind::Primitive | RefKind::Std | RefKind::External => true,
            RefKind::Local { public } => {
                if !public {
                    return false;
                }
                let key = (target.pkg_path.clone(), target.name.clone());
                if !seen.insert(key) {
                    return true;
                }
                match self.ctx.type_index.get(&target.pkg_path, &target.name) {
                    Some(decl) => {
                        // Follow the declaration from its own module.
                        let nested = FileResolver {
                            ctx: self.ctx,
                            module: target.pkg_path.split("::").map(str::to_string).collect(),
                            uses: self
                                .ctx
                                .type_index
                                .uses_for(&target.pkg_path)
                                .unwrap_or(self.uses),
                            self_target: None,
                        };
                        decl.refs
                            .clone()
                            .iter()
                            .all(|t| nested.visible_inner(t, seen))
                    }
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(source: &str, pkg: &str) -> CrateCtx {
        let file = syn::parse_file(source).unwrap();
        let mut index = TypeIndex::default();
        index.index_file(pkg, &file);
        CrateCtx {
            crate_name: "demo".into(),
            dep_crates: ["demo", "mockgraft", "serde"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            type_index: index,
        }
    }

    fn parse_type(src: &str) -> syn::Type {
        syn::parse_str(src).unwrap()
    }

    #[test]
    fn resolves_imported_context() {
        let file: syn::File = syn::parse_str("use mockgraft::runtime::Context;").unwrap();
        let uses = UseMap::from_file(&file);
        let ctx = ctx_with("", "demo::service");
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        assert!(resolver.is_context_path(&parse_type("Context")));
        assert!(resolver.is_context_path(&parse_type("mockgraft::runtime::Context")));
        assert!(!resolver.is_context_path(&parse_type("String")));
    }

    #[test]
    fn resolves_renamed_import() {
        let file: syn::File = syn::parse_str("use mockgraft::runtime as _mock;").unwrap();
        let uses = UseMap::from_file(&file);
        let ctx = ctx_with("", "demo::service");
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        assert!(resolver.is_context_path(&parse_type("_mock::Context")));
    }

    #[test]
    fn bare_names_resolve_to_local_declarations() {
        let ctx = ctx_with("pub struct Status(pub i32); struct hidden;", "demo::service");
        let uses = UseMap::default();
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        let r = resolver
            .resolve_path(&syn::parse_str("Status").unwrap())
            .unwrap();
        assert_eq!(r.pkg_path, "demo::service");
        assert_eq!(r.kind, RefKind::Local { public: true });

        let h = resolver
            .resolve_path(&syn::parse_str("hidden").unwrap())
            .unwrap();
        assert_eq!(h.kind, RefKind::Local { public: false });
    }

    #[test]
    fn visibility_follows_struct_fields() {
        let ctx = ctx_with(
            "struct secret; pub struct Wrap { pub inner: secret } pub struct Clean { pub x: i32 }",
            "demo::service",
        );
        let uses = UseMap::default();
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        assert!(!resolver.type_visible(&parse_type("Wrap")));
        assert!(resolver.type_visible(&parse_type("Clean")));
        assert!(resolver.type_visible(&parse_type("Vec<Clean>")));
        assert!(!resolver.type_visible(&parse_type("Vec<Wrap>")));
    }

    #[test]
    fn self_referential_types_terminate() {
        let ctx = ctx_with(
            "pub struct Node { pub next: Option<Box<Node>> }",
            "demo::service",
        );
        let uses = UseMap::default();
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        assert!(resolver.type_visible(&parse_type("Node")));
    }

    #[test]
    fn external_and_primitive_types_are_visible() {
        let ctx = ctx_with("", "demo::service");
        let uses = UseMap::default();
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        assert!(resolver.type_visible(&parse_type("i32")));
        assert!(resolver.type_visible(&parse_type("serde::de::IgnoredAny")));
        assert!(resolver.type_visible(&parse_type("(i32, String)")));
        assert!(!resolver.type_visible(&parse_type("impl Clone")));
    }

    #[test]
    fn crate_relative_paths_resolve() {
        let ctx = ctx_with("pub struct Conf;", "demo::config");
        let uses = UseMap::default();
        let resolver = FileResolver::new(&ctx, "demo::service", &uses);
        let r = resolver
            .resolve_path(&syn::parse_str("crate::config::Conf").unwrap())
            .unwrap();
        assert_eq!(r.pkg_path, "demo::config");
        assert_eq!(r.kind, RefKind::Local { public: true });
    }
}
