//! Runtime surface consumed by rewritten code and generated companions.
//!
//! The context carries per-package mock tables; attaching a table derives a
//! new context, so tables ride a persistent map that clones cheaply. The
//! trap entry point runs registered interceptors around the call-original-
//! or-mock decision and then hands control to the monomorphic dispatcher
//! the rewriter generated at the call site.

pub mod registry;

pub use registry::{registry, Registry, StubSig};

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

/// Call context threaded through trapped functions.
///
/// Derived contexts share structure; attaching a mock table never mutates
/// the parent.
#[derive(Clone, Default)]
pub struct Context {
    tables: im::HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any mock table is attached for `pkg`.
    pub fn has_table(&self, pkg: &str) -> bool {
        self.tables.contains_key(pkg)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Derive a context with `table` attached under `pkg`.
///
/// Called by generated `Setup` functions; not meant to be called directly.
pub fn with_mock_table<M: Any + Send + Sync>(ctx: &Context, pkg: &str, table: M) -> Context {
    Context {
        tables: ctx.tables.update(pkg.to_string(), Arc::new(table)),
    }
}

/// The mock table of `pkg`, if one of type `M` is attached.
pub fn table<'c, M: Any>(ctx: Option<&'c Context>, pkg: &str) -> Option<&'c M> {
    ctx?.tables.get(pkg)?.as_ref().downcast_ref::<M>()
}

/// Identity of one trapped function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubId {
    pub pkg: &'static str,
    pub owner: &'static str,
    pub owner_ptr: bool,
    pub name: &'static str,
}

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.owner.is_empty() {
            write!(f, "{}.{}", self.pkg, self.name)
        } else {
            let ptr = if self.owner_ptr { "*" } else { "" };
            write!(f, "{}.{}{}.{}", self.pkg, ptr, self.owner, self.name)
        }
    }
}

/// What an interceptor sees about one trap entry.
#[derive(Debug, Clone, Copy)]
pub struct TrapInfo<'a> {
    pub stub: &'a StubId,
    /// Request field descriptors, positionally matching the request record.
    pub req_fields: &'static [&'static str],
    /// Response field descriptors.
    pub resp_fields: &'static [&'static str],
    pub has_recv: bool,
    pub first_is_ctx: bool,
    pub last_is_err: bool,
}

/// Mutable call decision handed through the interceptor chain.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Invoke the attached mock instead of the original.
    pub use_mock: bool,
}

pub type Interceptor = fn(Option<&Context>, &TrapInfo<'_>, &mut Decision);

static INTERCEPTORS: Lazy<RwLock<Vec<Interceptor>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a call interceptor. The first added runs last.
pub fn add_interceptor(f: Interceptor) {
    INTERCEPTORS.write().expect("interceptor lock").push(f);
}

/// Trap entry point generated into every trapped function.
///
/// Runs the interceptor chain over the use-mock decision, then calls the
/// dispatcher exactly once with the request record and the final decision.
/// The dispatcher returns the function's full result; the error result (if
/// any) rides inside it, flagged by `last_is_err`.
#[allow(clippy::too_many_arguments)]
pub fn trap_fn<Req, Out>(
    ctx: Option<&Context>,
    stub: &'static StubId,
    req_fields: &'static [&'static str],
    resp_fields: &'static [&'static str],
    req: Req,
    has_mock: bool,
    dispatch: impl FnOnce(Req, bool) -> Out,
    has_recv: bool,
    first_is_ctx: bool,
    last_is_err: bool,
) -> Out {
    let info = TrapInfo {
        stub,
        req_fields,
        resp_fields,
        has_recv,
        first_is_ctx,
        last_is_err,
    };
    let mut decision = Decision { use_mock: has_mock };
    {
        let chain = INTERCEPTORS.read().expect("interceptor lock");
        for f in chain.iter().rev() {
            f(ctx, &info, &mut decision);
        }
    }
    dispatch(req, decision.use_mock && has_mock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct DemoTable {
        run: Option<fn(i32) -> i32>,
    }

    #[test]
    fn derived_context_does_not_touch_parent() {
        let base = Context::new();
        let derived = with_mock_table(&base, "demo::service", DemoTable { run: Some(|x| x + 1) });
        assert!(!base.has_table("demo::service"));
        assert!(derived.has_table("demo::service"));
    }

    #[test]
    fn table_lookup_downcasts() {
        let ctx = with_mock_table(&Context::new(), "demo::service", DemoTable { run: Some(|x| x * 2) });
        let tbl = table::<DemoTable>(Some(&ctx), "demo::service").unwrap();
        assert_eq!((tbl.run.unwrap())(4), 8);
        assert!(table::<DemoTable>(Some(&ctx), "demo::other").is_none());
        assert!(table::<DemoTable>(None, "demo::service").is_none());
    }

    #[test]
    fn trap_dispatches_original_without_mock() {
        static STUB: StubId = StubId {
            pkg: "demo::service",
            owner: "",
            owner_ptr: false,
            name: "run",
        };
        let out = trap_fn(
            None,
            &STUB,
            &["Status"],
            &["Resp_0"],
            (41,),
            false,
            |req, use_mock| {
                assert!(!use_mock);
                req.0 + 1
            },
            false,
            false,
            false,
        );
        assert_eq!(out, 42);
    }

    #[test]
    fn stub_id_renders_owner_pointer() {
        let id = StubId {
            pkg: "demo::service",
            owner: "Status",
            owner_ptr: true,
            name: "run",
        };
        assert_eq!(id.to_string(), "demo::service.*Status.run");
    }
}
