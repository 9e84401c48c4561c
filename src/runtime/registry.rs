//! Process-wide mock stub registry.
//!
//! Generated companions register their trapped functions on first `Setup`.
//! The registry is a locked singleton keyed `package -> owner -> function`;
//! registering the same triple twice is fatal. The whole table serialises
//! to JSON for external inspection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::errors::RewriteError;

/// Compile-time stub descriptor emitted by generated companions.
#[derive(Debug, Clone, Copy)]
pub struct StubSig {
    pub owner: &'static str,
    pub owner_ptr: bool,
    pub name: &'static str,
    /// `(exported name, type text)` per non-context parameter.
    pub args: &'static [(&'static str, &'static str)],
    /// `(exported name, type text)` per non-error result.
    pub results: &'static [(&'static str, &'static str)],
    pub first_is_ctx: bool,
    pub last_is_err: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldSig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FuncSig {
    pub owner_ptr: bool,
    pub args: Vec<FieldSig>,
    pub results: Vec<FieldSig>,
    pub first_is_ctx: bool,
    pub last_is_err: bool,
}

impl FuncSig {
    fn from_stub(sig: &StubSig) -> Self {
        let fields = |list: &[(&str, &str)]| {
            list.iter()
                .map(|(name, ty)| FieldSig {
                    name: name.to_string(),
                    type_text: ty.to_string(),
                })
                .collect()
        };
        Self {
            owner_ptr: sig.owner_ptr,
            args: fields(sig.args),
            results: fields(sig.results),
            first_is_ctx: sig.first_is_ctx,
            last_is_err: sig.last_is_err,
        }
    }
}

type PkgMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, FuncSig>>>;

/// Locked `package -> owner -> function` table. Ownerless functions key
/// under the empty owner.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<PkgMap>,
}

impl Registry {
    /// Register one stub; duplicate `(pkg, owner, func)` is an error.
    pub fn register(&self, pkg: &str, sig: &StubSig) -> Result<(), RewriteError> {
        let mut inner = self.inner.lock().expect("registry lock");
        let funcs = inner
            .entry(pkg.to_string())
            .or_default()
            .entry(sig.owner.to_string())
            .or_default();
        if funcs.contains_key(sig.name) {
            return Err(RewriteError::DuplicateRegistration {
                pkg: pkg.to_string(),
                owner: sig.owner.to_string(),
                func: sig.name.to_string(),
            });
        }
        funcs.insert(sig.name.to_string(), FuncSig::from_stub(sig));
        Ok(())
    }

    /// Register a package's stubs in one pass.
    pub fn register_package(&self, pkg: &str, sigs: &[StubSig]) -> Result<(), RewriteError> {
        for sig in sigs {
            self.register(pkg, sig)?;
        }
        Ok(())
    }

    pub fn lookup(&self, pkg: &str, owner: &str, func: &str) -> Option<FuncSig> {
        let inner = self.inner.lock().expect("registry lock");
        inner.get(pkg)?.get(owner)?.get(func).cloned()
    }

    /// Snapshot of the whole table.
    pub fn snapshot(&self) -> PkgMap {
        self.inner.lock().expect("registry lock").clone()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

/// The process-wide registry, initialised on first access.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(name: &'static str, owner: &'static str) -> StubSig {
        StubSig {
            owner,
            owner_ptr: false,
            name,
            args: &[("Status", "i32")],
            results: &[("Resp_0", "i32")],
            first_is_ctx: true,
            last_is_err: true,
        }
    }

    #[test]
    fn registers_and_looks_up() {
        let reg = Registry::default();
        reg.register("demo::service", &sig("run", "")).unwrap();
        let func = reg.lookup("demo::service", "", "run").unwrap();
        assert!(func.first_is_ctx);
        assert_eq!(func.args[0].name, "Status");
        assert!(reg.lookup("demo::service", "", "other").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg = Registry::default();
        reg.register("demo::service", &sig("run", "Status")).unwrap();
        let err = reg.register("demo::service", &sig("run", "Status")).unwrap_err();
        assert!(matches!(err, RewriteError::DuplicateRegistration { .. }));
        // A different owner is a different key.
        reg.register("demo::service", &sig("run", "")).unwrap();
    }

    #[test]
    fn json_export_is_keyed_by_package() {
        let reg = Registry::default();
        reg.register("demo::service", &sig("run", "")).unwrap();
        let json = reg.to_json().unwrap();
        assert!(json.contains("demo::service"));
        assert!(json.contains("\"type\": \"i32\""));
    }
}
