//! Statement-tree template builder for generated source.
//!
//! Output is assembled as a tree of statements: literal lines, indented
//! blocks, conditional arms, and groups that render onto a single line.
//! Tokens of the form `__NAME__` are substituted from a variable map at
//! format time.
//!
//! Two renderings exist: "pretty" joins statements with newlines, "compact"
//! joins them with `;` unless a statement already ends in an opener
//! (`{`, `(`, `[`, `,`, `;`). The compact form is what the trap prelude
//! uses so that every insert stays on one line.

use std::collections::HashMap;

/// Variable substitution map for `__NAME__` tokens.
#[derive(Debug, Clone, Default)]
pub struct VarMap {
    vars: HashMap<String, String>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, String); N]> for VarMap {
    fn from(entries: [(&str, String); N]) -> Self {
        let mut m = Self::new();
        for (k, v) in entries {
            m.set(k, v);
        }
        m
    }
}

/// One node of the output tree.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// A literal line, substituted at format time.
    Line(String),
    /// Several literal lines.
    Lines(Vec<String>),
    /// Child statements, each prefixed with the given indent.
    Indent(String, Vec<Stmt>),
    /// Child statements rendered as one single line.
    Group(Vec<Stmt>),
    /// Conditional arms; exactly one side is rendered.
    If {
        cond: bool,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
    },
}

pub fn line(s: impl Into<String>) -> Stmt {
    Stmt::Line(s.into())
}

pub fn group(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Group(stmts)
}

pub fn indent(prefix: impl Into<String>, stmts: Vec<Stmt>) -> Stmt {
    Stmt::Indent(prefix.into(), stmts)
}

pub fn when(cond: bool, then: Vec<Stmt>) -> Stmt {
    Stmt::If {
        cond,
        then,
        els: Vec::new(),
    }
}

pub fn when_else(cond: bool, then: Vec<Stmt>, els: Vec<Stmt>) -> Stmt {
    Stmt::If { cond, then, els }
}

impl Stmt {
    fn eval(&self, vars: &VarMap, out: &mut Vec<String>) {
        match self {
            Stmt::Line(s) => out.push(substitute(s, vars)),
            Stmt::Lines(list) => out.extend(list.iter().map(|s| substitute(s, vars))),
            Stmt::Indent(prefix, children) => {
                let mut inner = Vec::new();
                for c in children {
                    c.eval(vars, &mut inner);
                }
                out.extend(inner.into_iter().map(|l| format!("{}{}", prefix, l)));
            }
            Stmt::Group(children) => {
                let mut inner = Vec::new();
                for c in children {
                    c.eval(vars, &mut inner);
                }
                out.push(inner.concat());
            }
            Stmt::If { cond, then, els } => {
                let arm = if *cond { then } else { els };
                for c in arm {
                    c.eval(vars, out);
                }
            }
        }
    }
}

/// Replace each `__NAME__` token with its value from `vars`, leaving unknown
/// tokens untouched.
fn substitute(s: &str, vars: &VarMap) -> String {
    const MARK: &str = "__";
    let mut rest = s;
    let mut out = String::with_capacity(s.len());
    loop {
        let Some(i) = rest.find(MARK) else {
            out.push_str(rest);
            return out;
        };
        let Some(j) = rest[i + MARK.len()..].find(MARK) else {
            out.push_str(rest);
            return out;
        };
        let end = i + MARK.len() + j + MARK.len();
        out.push_str(&rest[..i]);
        let token = &rest[i..end];
        match vars.get(token) {
            Some(v) => out.push_str(v),
            None => out.push_str(token),
        }
        rest = &rest[end..];
    }
}

/// Builder over a statement block.
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    pretty: bool,
    indent: String,
    stmts: Vec<Stmt>,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self {
            pretty: true,
            indent: String::new(),
            stmts: Vec::new(),
        }
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> &mut Self {
        self.stmts.extend(stmts);
        self
    }

    pub fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.stmts.push(stmt);
        self
    }

    pub fn pretty(&mut self, pretty: bool) -> &mut Self {
        self.pretty = pretty;
        self
    }

    pub fn indent(&mut self, indent: impl Into<String>) -> &mut Self {
        self.indent = indent.into();
        self
    }

    pub fn eval(&self, vars: &VarMap) -> Vec<String> {
        let mut out = Vec::new();
        for s in &self.stmts {
            s.eval(vars, &mut out);
        }
        out
    }

    pub fn format(&self, vars: &VarMap) -> String {
        let mut list = self.eval(vars);
        if !self.pretty {
            for l in list.iter_mut() {
                let trimmed = l.trim();
                if !trimmed.is_empty() && !ends_with_opener(trimmed) {
                    *l = format!("{};", trimmed);
                } else {
                    *l = trimmed.to_string();
                }
            }
            list.concat()
        } else {
            if !self.indent.is_empty() {
                for l in list.iter_mut() {
                    *l = format!("{}{}", self.indent, l);
                }
            }
            list.join("\n")
        }
    }
}

fn ends_with_opener(s: &str) -> bool {
    matches!(s.as_bytes().last(), Some(b'{' | b'(' | b'[' | b',' | b';'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> VarMap {
        let mut v = VarMap::new();
        v.set("__NAME__", "run");
        v.set("__PKG__", "demo::service");
        v
    }

    #[test]
    fn substitutes_known_tokens() {
        assert_eq!(substitute("fn __NAME__()", &vars()), "fn run()");
    }

    #[test]
    fn unknown_tokens_stay_literal() {
        assert_eq!(substitute("__OTHER__ x", &vars()), "__OTHER__ x");
    }

    #[test]
    fn compact_joins_with_semicolons() {
        let mut t = TemplateBuilder::new();
        t.block(vec![line("let a = 1"), line("let b = __NAME__()")]);
        t.pretty(false);
        assert_eq!(t.format(&vars()), "let a = 1;let b = run();");
    }

    #[test]
    fn compact_skips_semicolon_after_openers() {
        let mut t = TemplateBuilder::new();
        t.block(vec![line("if x {"), line("y()"), line("}")]);
        t.pretty(false);
        assert_eq!(t.format(&vars()), "if x {y();};");
    }

    #[test]
    fn pretty_joins_with_newlines_and_indent() {
        let mut t = TemplateBuilder::new();
        t.block(vec![line("a"), indent("    ", vec![line("b")])]);
        assert_eq!(t.format(&VarMap::new()), "a\n    b");
    }

    #[test]
    fn conditional_arms_select_once() {
        let mut t = TemplateBuilder::new();
        t.block(vec![when_else(false, vec![line("then")], vec![line("else")])]);
        assert_eq!(t.format(&VarMap::new()), "else");
    }

    #[test]
    fn group_renders_single_line() {
        let mut t = TemplateBuilder::new();
        t.push(group(vec![line("a("), line("b"), line(")")]));
        assert_eq!(t.format(&VarMap::new()), "a(b)");
    }
}
