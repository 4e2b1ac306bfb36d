//! The uniform contract both interpreter hosts implement.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::request::{RequestData, ResponseData};
use crate::router::RouteDef;

use hull_primitives::Manifest;

/// One embedded interpreter wrapped behind a uniform surface.
///
/// Lifecycle: construct (init), `load_app`, `extract_manifest`, then
/// `handle` per request. `shutdown` releases owned resources early and
/// is idempotent; dropping the host has the same effect.
pub trait AppRuntime {
    /// Read, compile, and evaluate the entry-point module. Route,
    /// middleware, and manifest registration happen during this call;
    /// registration is sealed when it returns.
    fn load_app(&mut self) -> Result<(), RuntimeError>;

    /// Validate and seal the manifest the script declared. Must run
    /// after `load_app` and before the first `handle`.
    fn extract_manifest(&mut self) -> Result<Manifest, RuntimeError>;

    /// Snapshot of the registered route table.
    fn routes(&self) -> Vec<RouteDef>;

    /// Dispatch one request to the route's handler, running matching
    /// middleware first. Never fails: handler errors become the fixed
    /// 500 response.
    fn handle(&mut self, route_id: usize, request: RequestData) -> ResponseData;

    /// Release interpreter resources. Safe to call more than once.
    fn shutdown(&mut self);
}

/// Construct the host matching the entry point's file extension:
/// `.lua` for the Lua host, `.js`/`.mjs` for the QuickJS host.
pub fn new_runtime(config: RuntimeConfig) -> Result<Box<dyn AppRuntime>, RuntimeError> {
    let ext = config
        .entry
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "lua" => Ok(Box::new(crate::lua::LuaHost::new(config)?)),
        "js" | "mjs" => Ok(Box::new(crate::js::JsHost::new(config)?)),
        other => Err(RuntimeError::Load(format!(
            "unsupported entry point extension {other:?} (expected .lua, .js, or .mjs)"
        ))),
    }
}
