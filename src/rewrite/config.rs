//! Per-function rewrite configuration.
//!
//! A `RewriteConfig` captures everything the prelude generator and the stub
//! generator need to know about one trapped function: owner, context and
//! error recognition, and the receiver/parameter/result fields with their
//! effective and exported names.

use std::collections::HashSet;

use anyhow::{anyhow, Result};

use crate::gen::{self, line, TemplateBuilder, VarMap};
use crate::imports::next_name;

/// Descriptor of one field's resolved type.
#[derive(Debug, Clone, Default)]
pub struct TypeDesc {
    /// Behind a reference.
    pub is_pointer: bool,
    /// Named-type last segment, empty for tuples and other unnamed shapes.
    pub name: String,
    /// The named type is public.
    pub exported: bool,
    /// Public-facing name (`MExport_`-prefixed for private types).
    pub exported_name: String,
    /// The transitive closure references only public names.
    pub visible: bool,
}

/// One positional receiver, parameter, or result.
#[derive(Debug, Clone)]
pub struct Field {
    /// Effective name, unique within the function.
    pub name: String,
    /// Exported-form name used in the mock table and descriptors.
    pub exported_name: String,
    /// Original source name; empty for the blank pattern.
    pub orig_name: String,
    pub type_desc: TypeDesc,
    /// Source text of the type expression.
    pub type_text: String,
    /// Byte range of the type expression.
    pub type_span: (usize, usize),
    /// Byte range of the name pattern, if one exists in the source.
    pub name_span: Option<(usize, usize)>,
    /// Variadic-last-parameter expansion marker. The host language has no
    /// variadic declarations, so this stays false; the request side would
    /// expand `...T` to a list of `T`.
    pub variadic: bool,
    /// The parsed type expression, kept for re-packaging.
    pub ty: syn::Type,
}

impl Field {
    /// Whether the source needs a rename edit at this field.
    pub fn needs_rename(&self) -> bool {
        self.name_span.is_some()
            && (self.orig_name.is_empty() || self.orig_name == "_" || self.orig_name != self.name)
    }
}

/// The prefix under which an unexported type would be re-exported.
pub const EXPORT_PREFIX: &str = "MExport_";

/// Exported-form of a field name: upper-case the first letter; names that
/// already start upper-case (or cannot be upper-cased) take a
/// disambiguating `M_` prefix.
pub fn to_exported(name: &str) -> String {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    if first.is_uppercase() {
        return format!("M_{}", name);
    }
    let upper: String = first.to_uppercase().collect();
    if upper.chars().next() == Some(first) {
        return format!("M_{}", name);
    }
    format!("{}{}", upper, chars.as_str())
}

/// Everything known about one trapped function.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub names: HashSet<String>,
    /// Local alias of the mock runtime inside the rewritten file.
    pub support_ref: String,
    /// Prefix of prelude-local variables.
    pub var_prefix: String,
    pub pkg: String,
    pub owner: String,
    pub owner_ptr: bool,
    /// The function itself is public.
    pub exported: bool,
    /// The owner type is public (meaningless without an owner).
    pub owner_exported: bool,
    pub func_name: String,
    pub new_func_name: String,
    /// Effective context parameter name; empty when there is none.
    pub ctx_name: String,
    /// Effective error result name; empty when there is none.
    pub err_name: String,
    /// Result names were generated rather than written by the user. Always
    /// true in this host: results are unnamed.
    pub results_name_gen: bool,
    /// Every parameter and result type is visible; when false the mock
    /// table carries no field for this function and the prelude must not
    /// reference one.
    pub signature_visible: bool,
    pub first_is_ctx: bool,
    pub last_is_err: bool,
    pub recv: Option<Field>,
    pub full_args: Vec<Field>,
    pub full_results: Vec<Field>,
}

impl RewriteConfig {
    /// Parameters excluding a leading context.
    pub fn args(&self) -> &[Field] {
        if self.first_is_ctx {
            &self.full_args[1..]
        } else {
            &self.full_args
        }
    }

    /// Results excluding a trailing error.
    pub fn results(&self) -> &[Field] {
        if self.last_is_err {
            &self.full_results[..self.full_results.len() - 1]
        } else {
            &self.full_results
        }
    }

    /// Receiver (if any), parameters, results — in that order.
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.recv
            .iter()
            .chain(self.full_args.iter())
            .chain(self.full_results.iter())
    }

    pub fn full_name(&self) -> String {
        if self.owner.is_empty() {
            self.func_name.clone()
        } else {
            format!("{}_{}", self.owner, self.func_name)
        }
    }

    /// `<pkg>::<owner>::<func>`, the shape the user filter matches against.
    pub fn filter_key(&self) -> String {
        format!("{}::{}::{}", self.pkg, self.owner, self.func_name)
    }

    /// Mock-table field name of this function.
    pub fn table_func_field(&self) -> String {
        if self.exported {
            self.func_name.clone()
        } else {
            format!("M_{}", self.func_name)
        }
    }

    /// Mock-table field name of the owner group, if any.
    pub fn table_owner_field(&self) -> String {
        if self.owner.is_empty() {
            String::new()
        } else if self.owner_exported {
            self.owner.clone()
        } else {
            format!("M_{}", self.owner)
        }
    }

    /// Assign unique effective names, avoiding the given forbidden set
    /// (identifiers used as path qualifiers in the declaration).
    pub fn assign_unique_names(&mut self, forbidden: &HashSet<String>) -> Result<()> {
        let mut names = std::mem::take(&mut self.names);
        let mut fields: Vec<&mut Field> = Vec::new();
        if let Some(recv) = self.recv.as_mut() {
            fields.push(recv);
        }
        fields.extend(self.full_args.iter_mut());
        fields.extend(self.full_results.iter_mut());

        for field in fields {
            if !field.orig_name.is_empty()
                && field.orig_name != "_"
                && !forbidden.contains(&field.orig_name)
            {
                names.insert(field.name.clone());
                field.exported_name = to_exported(&field.name);
                continue;
            }
            field.name = next_name(
                |candidate| {
                    if names.contains(candidate) || forbidden.contains(candidate) {
                        return false;
                    }
                    names.insert(candidate.to_string());
                    true
                },
                &field.name,
            )?;
            field.exported_name = to_exported(&field.name);
        }
        self.names = names;

        if self.first_is_ctx {
            self.ctx_name = self.full_args[0].name.clone();
        }
        if self.last_is_err {
            self.err_name = self.full_results[self.full_results.len() - 1].name.clone();
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ctx_name == "_" {
            return Err(anyhow!("context variable of {} must not be _", self.func_name));
        }
        if self.new_func_name.is_empty() {
            return Err(anyhow!("inner function name of {} is empty", self.func_name));
        }
        for (i, field) in self.args().iter().enumerate() {
            if field.name.is_empty() {
                return Err(anyhow!("arg {} of {} has no name", i, self.func_name));
            }
        }
        for (i, field) in self.results().iter().enumerate() {
            if field.name.is_empty() {
                return Err(anyhow!("result {} of {} has no name", i, self.func_name));
            }
        }
        Ok(())
    }

    /// Render the trap prelude.
    ///
    /// The compact form keeps every statement on one line so the insert is
    /// byte-local and line numbers below it survive.
    pub fn gen_prelude(&self, pretty: bool) -> Result<String> {
        self.validate()?;

        let quoted = |s: &str| format!("{:?}", s);
        let req_names: Vec<String> = self
            .args()
            .iter()
            .map(|f| quoted(&f.exported_name))
            .collect();
        let resp_names: Vec<String> = self
            .results()
            .iter()
            .map(|f| quoted(&f.exported_name))
            .collect();
        let req_values: Vec<String> = self.args().iter().map(|f| f.name.clone()).collect();

        // One-tuples need the trailing comma.
        let req_tuple = match req_values.len() {
            1 => format!("({},)", req_values[0]),
            _ => format!("({})", req_values.join(", ")),
        };

        let ctx_opt = if self.first_is_ctx {
            format!("Some({})", self.ctx_name)
        } else {
            "None".to_string()
        };

        let table_access = match self.owner.is_empty() {
            true => format!("t.{}", self.table_func_field()),
            false => format!("t.{}.{}", self.table_owner_field(), self.table_func_field()),
        };

        // Arguments as the dispatcher reconstructs them from the request
        // tuple, by positional correspondence with the descriptor order.
        let mut call_args: Vec<String> = Vec::new();
        if self.first_is_ctx {
            call_args.push(self.ctx_name.clone());
        }
        call_args.extend(
            (0..self.args().len()).map(|i| format!("{}req.{}", self.var_prefix, i)),
        );
        let inner_call = if self.owner.is_empty() {
            format!("{}({})", self.new_func_name, call_args.join(", "))
        } else {
            format!("self.{}({})", self.new_func_name, call_args.join(", "))
        };
        let recv_expr = match (&self.recv, self.owner_exported) {
            (None, _) => String::new(),
            (Some(_), true) => "self, ".to_string(),
            (Some(recv), false) => {
                // The table reifies an unexported owner as `&dyn Any`.
                if recv.type_desc.is_pointer {
                    "self as &dyn ::core::any::Any, ".to_string()
                } else {
                    "&self as &dyn ::core::any::Any, ".to_string()
                }
            }
        };
        let fn_var = format!("{}fn", self.var_prefix);
        let mock_call = format!("({}.unwrap())({}{})", fn_var, recv_expr, call_args.join(", "));

        let mut vars = VarMap::new();
        vars.set("__P__", self.support_ref.clone());
        vars.set("__V__", self.var_prefix.clone());
        vars.set("__PKG_Q__", quoted(&self.pkg));
        vars.set("__OWNER_Q__", quoted(&self.owner));
        vars.set("__OWNER_PTR__", self.owner_ptr.to_string());
        vars.set("__FUNC_Q__", quoted(&self.func_name));
        vars.set("__REQ_NAMES__", req_names.join(", "));
        vars.set("__RESP_NAMES__", resp_names.join(", "));
        vars.set("__REQ_TUPLE__", req_tuple);
        vars.set("__CTX_OPT__", ctx_opt);
        vars.set("__TBL__", table_access);
        vars.set("__FN__", fn_var);
        vars.set("__MOCK_CALL__", mock_call);
        vars.set("__INNER_CALL__", inner_call);
        vars.set("__HAS_RECV__", self.recv.is_some().to_string());
        vars.set("__FIRST_IS_CTX__", self.first_is_ctx.to_string());
        vars.set("__LAST_IS_ERR__", self.last_is_err.to_string());

        let mut t = TemplateBuilder::new();
        t.block(vec![
            line(
                "static _MOCK_STUB: __P__::StubId = __P__::StubId { pkg: __PKG_Q__, \
                 owner: __OWNER_Q__, owner_ptr: __OWNER_PTR__, name: __FUNC_Q__ }",
            ),
            line("static _MOCK_REQ_FIELDS: &[&str] = &[__REQ_NAMES__]"),
            line("static _MOCK_RESP_FIELDS: &[&str] = &[__RESP_NAMES__]"),
            line("let __V__req = __REQ_TUPLE__"),
            // A signature referencing invisible types has no mock-table
            // field to look up.
            gen::when_else(
                self.signature_visible,
                vec![
                    line("let __FN__ = __P__::table::<mock_gen::M>(__CTX_OPT__, _MOCK_STUB.pkg).and_then(|t| __TBL__)"),
                    gen::group(vec![
                        line("return __P__::trap_fn(__CTX_OPT__, &_MOCK_STUB, _MOCK_REQ_FIELDS, _MOCK_RESP_FIELDS, "),
                        line("__V__req, __FN__.is_some(), "),
                        line("move |__V__req, __V__use| if __V__use { __MOCK_CALL__ } else { __INNER_CALL__ }, "),
                        line("__HAS_RECV__, __FIRST_IS_CTX__, __LAST_IS_ERR__)"),
                    ]),
                ],
                vec![gen::group(vec![
                    line("return __P__::trap_fn(__CTX_OPT__, &_MOCK_STUB, _MOCK_REQ_FIELDS, _MOCK_RESP_FIELDS, "),
                    line("__V__req, false, "),
                    line("move |__V__req, _| __INNER_CALL__, "),
                    line("__HAS_RECV__, __FIRST_IS_CTX__, __LAST_IS_ERR__)"),
                ])],
            ),
        ]);
        t.pretty(pretty);
        Ok(t.format(&vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_name_capitalises() {
        assert_eq!(to_exported("status"), "Status");
        assert_eq!(to_exported("unused_2"), "Unused_2");
    }

    #[test]
    fn exported_name_disambiguates_capitals_and_symbols() {
        assert_eq!(to_exported("Status"), "M_Status");
        assert_eq!(to_exported("_x"), "M__x");
        assert_eq!(to_exported(""), "");
    }
}
