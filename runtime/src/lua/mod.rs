//! The Lua 5.4 interpreter host.
//!
//! Opens only the safe stdlib subset (no `io`, no `os`), removes the
//! `load`/`loadfile`/`dofile` globals, caps the heap through the mlua
//! allocator, and arms an instruction-count hook wired to the shared
//! gas meter. Lua's C stack guard provides the stack bound.
//!
//! Module space: `require("hull.<name>")` serves the builtin registry;
//! `require("lib.util")` loads `lib/util.lua` relative to the
//! application root (dot paths cannot express `..`, so they cannot
//! escape it).

mod bind;
mod convert;

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Function, HookTriggers, Lua, LuaOptions, StdLib, Table};

use hull_primitives::Manifest;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::host::{HostShared, LUA_GAS_STRIDE};
use crate::loader;
use crate::request::{RequestData, ResponseData};
use crate::router::{match_pattern, RouteDef};
use crate::traits::AppRuntime;

use bind::HandlerRegistry;
use convert::is_short_circuit;

fn init_err(e: mlua::Error) -> RuntimeError {
    RuntimeError::Init(e.to_string())
}

fn script_err(e: mlua::Error) -> RuntimeError {
    RuntimeError::Script(e.to_string())
}

/// The Lua application host.
pub struct LuaHost {
    lua: Option<Lua>,
    shared: Rc<HostShared>,
    handlers: HandlerRegistry,
    config: RuntimeConfig,
}

impl LuaHost {
    /// Create and configure the interpreter.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let shared = HostShared::new(&config)?;
        let handlers: HandlerRegistry = Rc::new(RefCell::new(Vec::new()));

        // 1. Interpreter state with the safe stdlib subset only.
        let libs =
            StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH | StdLib::COROUTINE;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(init_err)?;

        // 2. Heap cap via the tracking allocator.
        lua.set_memory_limit(config.heap_bytes).map_err(init_err)?;

        // 3. Remove the dynamic-load globals from the base library.
        let globals = lua.globals();
        for name in ["load", "loadfile", "dofile"] {
            globals.set(name, mlua::Value::Nil).map_err(init_err)?;
        }
        drop(globals);

        // 4. Instruction gas: the hook charges its own stride and aborts
        //    the running script when the budget is gone.
        let meter = shared.gas.clone();
        lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(LUA_GAS_STRIDE),
                ..Default::default()
            },
            move |_lua, _debug| {
                if meter.charge(LUA_GAS_STRIDE as u64) {
                    Ok(())
                } else {
                    Err(mlua::Error::RuntimeError(
                        "instruction budget exceeded".into(),
                    ))
                }
            },
        );

        // 5. Capability modules and the module loader.
        bind::register_all(&lua, &shared, &handlers)?;
        install_require(&lua, &shared)?;

        Ok(Self {
            lua: Some(lua),
            shared,
            handlers,
            config,
        })
    }

    fn lua(&self) -> Result<&Lua, RuntimeError> {
        self.lua
            .as_ref()
            .ok_or_else(|| RuntimeError::Load("interpreter host is shut down".into()))
    }

    fn handler_function<'lua>(
        &self,
        lua: &'lua Lua,
        handler_id: usize,
    ) -> Result<Function<'lua>, RuntimeError> {
        let registry = self.handlers.borrow();
        let key = registry
            .get(handler_id)
            .ok_or_else(|| RuntimeError::Script(format!("unknown handler id {handler_id}")))?;
        lua.registry_value(key).map_err(script_err)
    }

    fn dispatch(
        &self,
        route_id: usize,
        mut request: RequestData,
    ) -> Result<ResponseData, RuntimeError> {
        let lua = self.lua()?;
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
        let req_table = build_request(lua, &request).map_err(script_err)?;

        // 4. Response handle writing through to host-owned state.
        let resp = Rc::new(RefCell::new(ResponseData::new()));
        let res_table = build_response(lua, resp.clone()).map_err(script_err)?;

        // 5. Middleware chain, canonicalizing the context between stages.
        let mut short_circuit = false;
        for handler_id in self.shared.matching_middleware(&request.method, &request.path) {
            let func = self.handler_function(lua, handler_id)?;
            let rc: mlua::Value = func
                .call((req_table.clone(), res_table.clone()))
                .map_err(script_err)?;
            canonicalize_ctx(lua, &self.shared, &req_table).map_err(script_err)?;
            if is_short_circuit(&rc) {
                short_circuit = true;
                break;
            }
        }

        // 6. Primary handler.
        if !short_circuit {
            let func = self.handler_function(lua, route.handler)?;
            func.call::<_, ()>((req_table, res_table)).map_err(script_err)?;
        }

        // 7. No microtask queue in Lua; nothing to drain.
        let out = resp.borrow().clone();
        Ok(out)
    }
}

impl AppRuntime for LuaHost {
    fn load_app(&mut self) -> Result<(), RuntimeError> {
        let source = std::fs::read_to_string(&self.config.entry)
            .map_err(|e| RuntimeError::Load(format!("{}: {e}", self.config.entry.display())))?;
        let chunk_name = format!(
            "@{}",
            self.config
                .entry
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("main.lua")
        );

        self.shared.gas.reset();
        self.lua()?
            .load(&source)
            .set_name(chunk_name)
            .exec()
            .map_err(|e| RuntimeError::Load(e.to_string()))?;

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
                tracing::error!(error = %e, route = route_id, "lua handler failed");
                ResponseData::internal_error()
            }
        }
    }

    fn shutdown(&mut self) {
        // Registry keys must not outlive the interpreter they index.
        self.handlers.borrow_mut().clear();
        self.lua = None;
    }
}

impl Drop for LuaHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Install the custom `require`.
///
/// `hull.<name>` resolves through the builtin registry; anything else is
/// a dot path under the application root, loaded once and cached.
fn install_require(lua: &Lua, shared: &Rc<HostShared>) -> Result<(), RuntimeError> {
    lua.set_named_registry_value("hull.loaded", lua.create_table().map_err(init_err)?)
        .map_err(init_err)?;

    let shared = shared.clone();
    let require = lua
        .create_function(move |lua, name: String| {
            if let Some(key) = loader::builtin_key(&name) {
                if loader::BUILTIN_MODULES.contains(&key) {
                    return lua.named_registry_value::<mlua::Value>(&format!("hull.{key}"));
                }
                return Err(mlua::Error::external(RuntimeError::ModuleNotFound(name)));
            }
            if name.is_empty() || name.starts_with('/') || name.split('.').any(|s| s.is_empty()) {
                return Err(mlua::Error::external(RuntimeError::ModuleNotFound(name)));
            }

            let rel = format!("{}.lua", name.replace('.', "/"));
            let loaded: Table = lua.named_registry_value("hull.loaded")?;
            let cached: mlua::Value = loaded.get(rel.as_str())?;
            if !matches!(cached, mlua::Value::Nil) {
                return Ok(cached);
            }

            let path = shared.app_root.join(&rel);
            let source = std::fs::read_to_string(&path)
                .map_err(|_| mlua::Error::external(RuntimeError::ModuleNotFound(name.clone())))?;
            let value: mlua::Value = lua.load(&source).set_name(format!("@{rel}")).eval()?;
            // Modules that return nothing cache as `true`, like stock Lua.
            let value = match value {
                mlua::Value::Nil => mlua::Value::Boolean(true),
                other => other,
            };
            loaded.set(rel.as_str(), value.clone())?;
            Ok(value)
        })
        .map_err(init_err)?;

    lua.globals().set("require", require).map_err(init_err)
}

/// Marshal the neutral request into a Lua table.
fn build_request<'lua>(lua: &'lua Lua, req: &RequestData) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set("method", req.method.as_str())?;
    table.set("path", req.path.as_str())?;

    let query = lua.create_table()?;
    for (name, value) in &req.query {
        query.set(name.as_str(), value.as_str())?;
    }
    table.set("query", query)?;

    let headers = lua.create_table()?;
    for (name, value) in &req.headers {
        headers.set(name.as_str(), value.as_str())?;
    }
    table.set("headers", headers)?;

    let params = lua.create_table()?;
    for (name, value) in &req.params {
        params.set(name.as_str(), value.as_str())?;
    }
    table.set("params", params)?;

    table.set("body", lua.create_string(&req.body)?)?;
    table.set("ctx", lua.create_table()?)?;
    Ok(table)
}

/// Build the response handle: a table of methods writing through to the
/// host-owned `ResponseData`.
fn build_response<'lua>(
    lua: &'lua Lua,
    resp: Rc<RefCell<ResponseData>>,
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;

    let r = resp.clone();
    table.set(
        "status",
        lua.create_function(move |_, (_this, code): (Table, u16)| {
            r.borrow_mut().status = code;
            Ok(())
        })?,
    )?;

    let r = resp.clone();
    table.set(
        "header",
        lua.create_function(move |_, (_this, name, value): (Table, String, String)| {
            r.borrow_mut().set_header(&name, &value);
            Ok(())
        })?,
    )?;

    let r = resp.clone();
    table.set(
        "send",
        lua.create_function(move |_, (_this, body): (Table, mlua::String)| {
            let mut resp = r.borrow_mut();
            if resp.header("content-type").is_none() {
                resp.set_header("content-type", "text/plain");
            }
            resp.body = body.as_bytes().to_vec();
            Ok(())
        })?,
    )?;

    let r = resp;
    table.set(
        "json",
        lua.create_function(move |lua, (_this, value): (Table, mlua::Value)| {
            use mlua::LuaSerdeExt;
            let json: serde_json::Value = lua.from_value(value)?;
            let mut resp = r.borrow_mut();
            if resp.header("content-type").is_none() {
                resp.set_header("content-type", "application/json");
            }
            resp.body = serde_json::to_vec(&json).map_err(mlua::Error::external)?;
            Ok(())
        })?,
    )?;

    Ok(table)
}

/// Serialize `req.ctx` to canonical JSON text (held in the request
/// arena) and replace the table with the parsed form, so the next
/// dispatch stage sees plain data.
fn canonicalize_ctx(lua: &Lua, shared: &HostShared, req_table: &Table) -> mlua::Result<()> {
    use mlua::LuaSerdeExt;

    let empty = || serde_json::Value::Object(serde_json::Map::new());
    let ctx: mlua::Value = req_table.get("ctx")?;
    let json: serde_json::Value = lua.from_value(ctx).unwrap_or_else(|_| empty());
    let text = serde_json::to_string(&json).unwrap_or_else(|_| "{}".to_string());

    let mut arena = shared.arena.borrow_mut();
    let slice = arena.alloc_str(&text);
    let parsed: serde_json::Value =
        serde_json::from_str(arena.get_str(slice)).unwrap_or_else(|_| empty());
    drop(arena);

    req_table.set("ctx", lua.to_value(&parsed)?)
}
