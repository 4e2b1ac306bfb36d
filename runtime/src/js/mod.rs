//! The QuickJS (ES module) interpreter host.
//!
//! The runtime is configured with a memory limit, a stack cap, and an
//! interrupt handler wired to the shared gas meter. `eval` is removed
//! from the global object, and the QuickJS `std`/`os` native modules
//! are simply never linked — the only resolvable imports are `hull:*`
//! builtins and the application's own files.
//!
//! Handler functions never cross into Rust: they live in a registry
//! array inside the interpreter (see `prelude.js`), and the host drives
//! dispatch through the numeric ids that registration returned.

mod bind;
mod convert;

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Context, Ctx, Function, Module, Runtime};

use hull_primitives::Manifest;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::host::{HostShared, JS_GAS_PER_TICK};
use crate::loader;
use crate::request::{RequestData, ResponseData};
use crate::router::{match_pattern, RouteDef};
use crate::traits::AppRuntime;

/// The script-facing API and dispatch shims, evaluated at init.
const PRELUDE: &str = include_str!("prelude.js");

/// Upper bound on microtask-drain iterations per request; a chain that
/// re-queues forever is cut off here even if each job is too short for
/// the gas interrupt to land.
const MAX_PENDING_JOBS: usize = 100_000;

/// Format a QuickJS error, pulling message and stack off the pending
/// exception when there is one.
fn exception_text(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let caught = ctx.catch();
    if let Some(obj) = caught.as_object() {
        let message = obj
            .get::<_, Option<String>>("message")
            .ok()
            .flatten()
            .unwrap_or_else(|| "uncaught exception".to_string());
        let stack = obj
            .get::<_, Option<String>>("stack")
            .ok()
            .flatten()
            .unwrap_or_default();
        if stack.is_empty() {
            return message;
        }
        return format!("{message}\n{stack}");
    }
    err.to_string()
}

/// Module-name resolution: `hull:*` passes through to the builtin
/// registry, relative names resolve against the importing module's
/// directory and must stay inside the application root.
struct HullResolver;

impl Resolver for HullResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        if loader::is_builtin(name) {
            return Ok(name.to_string());
        }
        if loader::builtin_key(name).is_some() {
            return Err(rquickjs::Error::new_resolving(base, name));
        }
        loader::resolve_relative(loader::module_dir(base), name)
            .map_err(|_| rquickjs::Error::new_resolving(base, name))
    }
}

/// Module loading: builtins get a shim re-exporting the bound global;
/// application modules are read from disk under the (already validated)
/// root-relative name.
struct HullLoader {
    app_root: PathBuf,
}

impl Loader for HullLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        if let Some(key) = loader::builtin_key(name) {
            if loader::BUILTIN_MODULES.contains(&key) {
                let source = format!("const m = globalThis.{key};\nexport default m;\n");
                return Module::declare(ctx.clone(), name, source);
            }
            return Err(rquickjs::Error::new_loading(name));
        }
        let path = self.app_root.join(name);
        let source =
            std::fs::read_to_string(&path).map_err(|_| rquickjs::Error::new_loading(name))?;
        Module::declare(ctx.clone(), name, source)
    }
}

/// The QuickJS application host.
pub struct JsHost {
    runtime: Option<Runtime>,
    context: Option<Context>,
    shared: Rc<HostShared>,
    config: RuntimeConfig,
}

impl JsHost {
    /// Create and configure the interpreter.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let shared = HostShared::new(&config)?;

        // 1. Runtime with heap and stack caps.
        let runtime = Runtime::new().map_err(|e| RuntimeError::Init(e.to_string()))?;
        runtime.set_memory_limit(config.heap_bytes);
        runtime.set_max_stack_size(config.stack_bytes);

        // 2. Instruction gas: the engine polls this on a fixed internal
        //    cadence; returning true aborts the running script.
        let meter = shared.gas.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || !meter.charge(JS_GAS_PER_TICK))));

        // 3. Module space: hull:* builtins plus app files, nothing else.
        runtime.set_loader(
            HullResolver,
            HullLoader {
                app_root: config.app_root.clone(),
            },
        );

        let context = Context::full(&runtime).map_err(|e| RuntimeError::Init(e.to_string()))?;

        // 4. Native bindings, prelude, and global hardening.
        let next_id = Rc::new(Cell::new(0usize));
        context.with(|ctx| -> Result<(), RuntimeError> {
            bind::register_all(&ctx, &shared, &next_id)?;
            let _: () = ctx
                .eval(PRELUDE)
                .map_err(|e| RuntimeError::Init(exception_text(&ctx, e)))?;
            ctx.globals()
                .set("eval", rquickjs::Undefined)
                .map_err(|e| RuntimeError::Init(e.to_string()))?;
            Ok(())
        })?;

        Ok(Self {
            runtime: Some(runtime),
            context: Some(context),
            shared,
            config,
        })
    }

    fn context(&self) -> Result<&Context, RuntimeError> {
        self.context
            .as_ref()
            .ok_or_else(|| RuntimeError::Load("interpreter host is shut down".into()))
    }

    /// Run queued microtasks to completion (bounded).
    fn drain_jobs(&self) {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        for _ in 0..MAX_PENDING_JOBS {
            match runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    tracing::error!(error = ?e, "pending job failed");
                    continue;
                }
            }
        }
        tracing::warn!("microtask drain cut off after {MAX_PENDING_JOBS} jobs");
    }

    fn dispatch(
        &self,
        route_id: usize,
        mut request: RequestData,
    ) -> Result<ResponseData, RuntimeError> {
        let context = self.context()?;
        let route = self
            .shared
            .route(route_id)
            .ok_or_else(|| RuntimeError::Script(format!("unknown route id {route_id}")))?;

        // 1-2. Stale-transaction guard, gas and arena reset.
        self.shared.begin_request()?;

        // 3. Marshal the request.
        if let Some(params) = match_pattern(&route.pattern, &request.path) {
            request.params = params;
        }
        let req_json = request_to_json(&request);
        let chain = self.shared.matching_middleware(&request.method, &request.path);
        let shared = &self.shared;

        let response = context.with(|ctx| -> Result<ResponseData, RuntimeError> {
            let script = |e| RuntimeError::Script(exception_text(&ctx, e));

            let globals = ctx.globals();
            let begin: Function = globals.get("__hull_begin_request").map_err(script)?;
            let invoke: Function = globals.get("__hull_invoke").map_err(script)?;

            // 4. Request value + response handle live inside the
            //    interpreter; the host holds only their ids.
            begin.call::<_, ()>((req_json.as_str(),)).map_err(script)?;

            // 5. Middleware chain, canonicalizing ctx between stages.
            let mut short_circuit = false;
            for handler_id in chain {
                let rc: i32 = invoke.call((handler_id as i32,)).map_err(script)?;
                canonicalize_ctx(&ctx, shared).map_err(script)?;
                if rc != 0 {
                    short_circuit = true;
                    break;
                }
            }

            // 6. Primary handler.
            if !short_circuit {
                let _: i32 = invoke.call((route.handler as i32,)).map_err(script)?;
            }

            let finish: Function = globals.get("__hull_finish_request").map_err(script)?;
            let out: String = finish.call(()).map_err(script)?;
            Ok(parse_response(&out))
        })?;

        // 7. Drain the microtask queue.
        self.drain_jobs();

        Ok(response)
    }
}

impl AppRuntime for JsHost {
    fn load_app(&mut self) -> Result<(), RuntimeError> {
        let source = std::fs::read_to_string(&self.config.entry)
            .map_err(|e| RuntimeError::Load(format!("{}: {e}", self.config.entry.display())))?;
        let entry_name = self
            .config
            .entry
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main.js")
            .to_string();

        self.shared.gas.reset();
        self.context()?.with(|ctx| -> Result<(), RuntimeError> {
            let declared = Module::declare(ctx.clone(), entry_name.as_str(), source.as_str())
                .map_err(|e| RuntimeError::Load(exception_text(&ctx, e)))?;
            let _ = declared
                .eval()
                .map_err(|e| RuntimeError::Load(exception_text(&ctx, e)))?;
            Ok(())
        })?;
        self.drain_jobs();

        self.shared.seal_registration();
        Ok(())
    }

    fn extract_manifest(&mut self) -> Result<Manifest, RuntimeError> {
        self.shared.extract_manifest()
    }

    fn routes(&self) -> Vec<RouteDef> {
        self.shared.routes.borrow().clone()
    }

    fn handle(&mut self, route_id: usize, request: RequestData) -> ResponseData {
        match self.dispatch(route_id, request) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, route = route_id, "js handler failed");
                ResponseData::internal_error()
            }
        }
    }

    fn shutdown(&mut self) {
        // Context first: it holds the interpreter state the runtime owns.
        self.context = None;
        self.runtime = None;
    }
}

impl Drop for JsHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marshal the neutral request into its JSON transport form.
fn request_to_json(req: &RequestData) -> String {
    let pairs = |items: &[(String, String)]| {
        let mut map = serde_json::Map::new();
        for (name, value) in items {
            map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        serde_json::Value::Object(map)
    };
    serde_json::json!({
        "method": req.method,
        "path": req.path,
        "query": pairs(&req.query),
        "headers": pairs(&req.headers),
        "params": pairs(&req.params),
        "body": String::from_utf8_lossy(&req.body).into_owned(),
    })
    .to_string()
}

/// Parse the prelude's response JSON back into host form.
fn parse_response(text: &str) -> ResponseData {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(text) else {
        return ResponseData::internal_error();
    };
    let mut resp = ResponseData::new();
    resp.status = v.get("status").and_then(|s| s.as_u64()).unwrap_or(200) as u16;
    if let Some(serde_json::Value::Object(map)) = v.get("headers") {
        for (name, value) in map {
            if let Some(value) = value.as_str() {
                resp.headers.push((name.clone(), value.to_string()));
            }
        }
    }
    resp.body = v
        .get("body")
        .and_then(|b| b.as_str())
        .unwrap_or("")
        .as_bytes()
        .to_vec();
    resp
}

/// Snapshot `req.ctx` through canonical JSON text held in the request
/// arena, so the next dispatch stage sees plain data.
fn canonicalize_ctx(ctx: &Ctx<'_>, shared: &HostShared) -> Result<(), rquickjs::Error> {
    let globals = ctx.globals();
    let get_ctx: Function = globals.get("__hull_get_ctx")?;
    let set_ctx: Function = globals.get("__hull_set_ctx")?;

    let text: String = get_ctx.call(())?;
    let mut arena = shared.arena.borrow_mut();
    let slice = arena.alloc_str(&text);
    let canonical = arena.get_str(slice).to_string();
    drop(arena);

    set_ctx.call::<_, ()>((canonical.as_str(),))
}
