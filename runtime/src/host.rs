//! State shared between an interpreter host and its capability bindings.
//!
//! `HostShared` is the single-threaded hub the binding closures close
//! over: the capability set, the host-owned route/middleware tables, the
//! pending manifest declaration, the gas meter, and the per-request
//! scratch arena. Everything here is owned by exactly one interpreter
//! host on exactly one thread.

use std::cell::{Cell, OnceCell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use hull_capability::{Db, EnvCapability, FsCapability, HttpCapability};
use hull_primitives::{CapError, Manifest};

use crate::arena::ScratchArena;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::gas::GasMeter;
use crate::router::{method_matches, match_pattern, MiddlewareDef, RouteDef};

/// Instruction-hook stride for the Lua host: the hook fires every this
/// many VM instructions and charges the same amount of gas.
pub const LUA_GAS_STRIDE: u32 = 1000;

/// Gas charged per QuickJS interrupt callback. The engine invokes the
/// interrupt handler on a fixed internal operation cadence; each tick is
/// billed as this many instructions.
pub const JS_GAS_PER_TICK: u64 = 10_000;

/// The capability set bound into an interpreter.
///
/// `db` is manifest-independent and live from init (top-level migration
/// code is allowed to touch the database). The manifest-gated
/// capabilities consult `manifest()`, which stays the empty deny-all
/// manifest until extraction seals the real one.
pub struct CapSet {
    pub db: Db,
    pub fs: FsCapability,
    pub http: HttpCapability,
    pub env: EnvCapability,
    sealed: OnceCell<Manifest>,
    empty: Manifest,
}

impl CapSet {
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        Ok(Self {
            db: Db::open(&config.db_path)?,
            fs: FsCapability::new(&config.app_root),
            http: HttpCapability::new(config.http.clone())?,
            env: EnvCapability::new(),
            sealed: OnceCell::new(),
            empty: Manifest::default(),
        })
    }

    /// The sealed manifest, or the deny-all manifest before sealing.
    pub fn manifest(&self) -> &Manifest {
        self.sealed.get().unwrap_or(&self.empty)
    }

    /// Seal the manifest. May be called once.
    pub fn seal(&self, manifest: Manifest) -> Result<(), RuntimeError> {
        self.sealed
            .set(manifest)
            .map_err(|_| RuntimeError::Load("manifest sealed twice".into()))
    }
}

/// Hub shared between a host and its binding closures (via `Rc`).
pub struct HostShared {
    pub caps: CapSet,
    pub routes: RefCell<Vec<RouteDef>>,
    pub middleware: RefCell<Vec<MiddlewareDef>>,
    pub manifest_decl: RefCell<Option<Manifest>>,
    pub gas: Arc<GasMeter>,
    pub arena: RefCell<ScratchArena>,
    pub app_root: PathBuf,
    registration_sealed: Cell<bool>,
}

impl HostShared {
    pub fn new(config: &RuntimeConfig) -> Result<Rc<Self>, RuntimeError> {
        Ok(Rc::new(Self {
            caps: CapSet::new(config)?,
            routes: RefCell::new(Vec::new()),
            middleware: RefCell::new(Vec::new()),
            manifest_decl: RefCell::new(None),
            gas: Arc::new(GasMeter::new(config.gas_budget)),
            arena: RefCell::new(ScratchArena::with_capacity(16 * 1024)),
            app_root: config.app_root.clone(),
            registration_sealed: Cell::new(false),
        }))
    }

    fn check_open(&self) -> Result<(), CapError> {
        if self.registration_sealed.get() {
            return Err(CapError::denied("registration is sealed after startup"));
        }
        Ok(())
    }

    fn check_pattern(pattern: &str) -> Result<(), CapError> {
        if pattern != "*" && !pattern.starts_with('/') {
            return Err(CapError::invalid(format!("route pattern {pattern:?} must start with '/'")));
        }
        Ok(())
    }

    /// Record a route registration from script top-level code.
    pub fn register_route(
        &self,
        method: &str,
        pattern: &str,
        handler: usize,
    ) -> Result<(), CapError> {
        self.check_open()?;
        Self::check_pattern(pattern)?;
        self.routes.borrow_mut().push(RouteDef {
            method: method.to_ascii_uppercase(),
            pattern: pattern.to_string(),
            handler,
        });
        Ok(())
    }

    /// Record a middleware registration.
    pub fn register_middleware(
        &self,
        method: &str,
        pattern: &str,
        handler: usize,
    ) -> Result<(), CapError> {
        self.check_open()?;
        Self::check_pattern(pattern)?;
        self.middleware.borrow_mut().push(MiddlewareDef {
            method: if method == "*" {
                method.to_string()
            } else {
                method.to_ascii_uppercase()
            },
            pattern: pattern.to_string(),
            handler,
        });
        Ok(())
    }

    /// Record the script's manifest declaration. Last declaration wins
    /// until extraction.
    pub fn declare_manifest(&self, manifest: Manifest) -> Result<(), CapError> {
        self.check_open()?;
        *self.manifest_decl.borrow_mut() = Some(manifest);
        Ok(())
    }

    /// Close registration after the script's top-level code has run.
    pub fn seal_registration(&self) {
        self.registration_sealed.set(true);
    }

    /// Normalize, validate, and seal the declared manifest; returns the
    /// canonical form. Missing declaration means the empty manifest.
    pub fn extract_manifest(&self) -> Result<Manifest, RuntimeError> {
        let mut manifest = self.manifest_decl.borrow_mut().take().unwrap_or_default();
        manifest.normalize();
        manifest.validate()?;
        self.caps.seal(manifest.clone())?;
        Ok(manifest)
    }

    /// Per-request reset: stale-transaction guard, gas, arena.
    ///
    /// Fails only when the stale rollback itself fails (broken storage).
    pub fn begin_request(&self) -> Result<(), CapError> {
        if self.caps.db.guard_stale_txn()? {
            tracing::warn!("rolled back stale transaction left by a previous handler");
        }
        self.gas.reset();
        self.arena.borrow_mut().reset();
        Ok(())
    }

    /// Handler ids of middleware matching this request, in registration
    /// order.
    pub fn matching_middleware(&self, method: &str, path: &str) -> Vec<usize> {
        self.middleware
            .borrow()
            .iter()
            .filter(|m| method_matches(&m.method, method) && match_pattern(&m.pattern, path).is_some())
            .map(|m| m.handler)
            .collect()
    }

    /// Route definition by id.
    pub fn route(&self, route_id: usize) -> Option<RouteDef> {
        self.routes.borrow().get(route_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (tempfile::TempDir, Rc<HostShared>) {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::new(
            dir.path(),
            dir.path().join("main.lua"),
            dir.path().join("data.db"),
        );
        let s = HostShared::new(&config).unwrap();
        (dir, s)
    }

    #[test]
    fn test_registration_then_seal() {
        let (_dir, s) = shared();
        s.register_route("get", "/a", 0).unwrap();
        s.register_middleware("*", "*", 1).unwrap();
        s.seal_registration();

        let err = s.register_route("GET", "/b", 2).unwrap_err();
        assert!(err.is_denied());
        assert_eq!(s.routes.borrow().len(), 1);
        assert_eq!(s.routes.borrow()[0].method, "GET");
    }

    #[test]
    fn test_pattern_validation() {
        let (_dir, s) = shared();
        assert!(s.register_route("GET", "no-slash", 0).is_err());
        assert!(s.register_middleware("*", "*", 0).is_ok());
    }

    #[test]
    fn test_manifest_seal_once() {
        let (_dir, s) = shared();
        s.declare_manifest(Manifest::default()).unwrap();
        s.extract_manifest().unwrap();
        assert!(s.extract_manifest().is_err());
    }

    #[test]
    fn test_unsealed_manifest_denies() {
        let (_dir, s) = shared();
        assert!(!s.caps.manifest().has_fs());
        assert!(!s.caps.manifest().has_hosts());
    }

    #[test]
    fn test_matching_middleware_order() {
        let (_dir, s) = shared();
        s.register_middleware("*", "*", 7).unwrap();
        s.register_middleware("POST", "/x", 8).unwrap();
        s.register_middleware("GET", "/x", 9).unwrap();

        assert_eq!(s.matching_middleware("GET", "/x"), vec![7, 9]);
        assert_eq!(s.matching_middleware("GET", "/y"), vec![7]);
    }
}
