//! Capability module registration for the Lua host.
//!
//! One `register_*` function per module. Each builds a plain Lua table
//! of functions closing over the shared host state, then `register_all`
//! installs the tables as globals and files them in the named registry
//! for `require("hull.<name>")`.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Function, Lua, RegistryKey, Table};

use hull_primitives::manifest::FsGrants;
use hull_primitives::{CapError, Manifest};

use crate::error::RuntimeError;
use crate::host::HostShared;

use super::convert::{lua_params, row_to_table};

/// Host-side function registry: handler ids index into this.
pub type HandlerRegistry = Rc<RefCell<Vec<RegistryKey>>>;

fn init_err(e: mlua::Error) -> RuntimeError {
    RuntimeError::Init(e.to_string())
}

fn cap_err(e: CapError) -> mlua::Error {
    mlua::Error::external(e)
}

/// Register every capability module, as globals and as `hull.*`
/// require targets.
pub fn register_all(
    lua: &Lua,
    shared: &Rc<HostShared>,
    handlers: &HandlerRegistry,
) -> Result<(), RuntimeError> {
    let modules: Vec<(&str, Table)> = vec![
        ("app", register_app(lua, shared, handlers).map_err(init_err)?),
        ("db", register_db(lua, shared).map_err(init_err)?),
        ("fs", register_fs(lua, shared).map_err(init_err)?),
        ("http", register_http(lua, shared).map_err(init_err)?),
        ("env", register_env(lua, shared).map_err(init_err)?),
        ("time", register_time(lua).map_err(init_err)?),
        ("crypto", register_crypto(lua).map_err(init_err)?),
    ];

    let globals = lua.globals();
    for (name, table) in modules {
        globals.set(name, table.clone()).map_err(init_err)?;
        lua.set_named_registry_value(&format!("hull.{name}"), table)
            .map_err(init_err)?;
    }
    Ok(())
}

// ── app: routes, middleware, manifest ──

fn register_app<'a>(
    lua: &'a Lua,
    shared: &Rc<HostShared>,
    handlers: &HandlerRegistry,
) -> mlua::Result<Table<'a>> {
    let app = lua.create_table()?;

    for (fname, method) in [
        ("get", "GET"),
        ("post", "POST"),
        ("put", "PUT"),
        ("del", "DELETE"),
        ("patch", "PATCH"),
    ] {
        let shared = shared.clone();
        let handlers = handlers.clone();
        let f = lua.create_function(move |lua, (pattern, func): (String, Function)| {
            let key = lua.create_registry_value(func)?;
            let mut registry = handlers.borrow_mut();
            let id = registry.len();
            shared.register_route(method, &pattern, id).map_err(cap_err)?;
            registry.push(key);
            Ok(())
        })?;
        app.set(fname, f)?;
    }

    let shared_use = shared.clone();
    let handlers_use = handlers.clone();
    app.set(
        "use",
        lua.create_function(
            move |lua, (method, pattern, func): (String, String, Function)| {
                let key = lua.create_registry_value(func)?;
                let mut registry = handlers_use.borrow_mut();
                let id = registry.len();
                shared_use
                    .register_middleware(&method, &pattern, id)
                    .map_err(cap_err)?;
                registry.push(key);
                Ok(())
            },
        )?,
    )?;

    let shared_manifest = shared.clone();
    app.set(
        "manifest",
        lua.create_function(move |_, decl: Table| {
            let manifest = manifest_from_table(&decl)?;
            shared_manifest.declare_manifest(manifest).map_err(cap_err)?;
            Ok(())
        })?,
    )?;

    Ok(app)
}

/// Walk the script's manifest declaration table into a `Manifest`.
fn manifest_from_table(decl: &Table) -> mlua::Result<Manifest> {
    fn string_seq(table: Option<Table>) -> mlua::Result<Vec<String>> {
        let mut out = Vec::new();
        if let Some(table) = table {
            for item in table.sequence_values::<String>() {
                out.push(item?);
            }
        }
        Ok(out)
    }

    let fs: Option<Table> = decl.get("fs")?;
    let (read, write) = match fs {
        Some(fs) => (string_seq(fs.get("read")?)?, string_seq(fs.get("write")?)?),
        None => (Vec::new(), Vec::new()),
    };
    Ok(Manifest {
        fs: FsGrants { read, write },
        env: string_seq(decl.get("env")?)?,
        hosts: string_seq(decl.get("hosts")?)?,
    })
}

// ── db ──

fn register_db<'a>(lua: &'a Lua, shared: &Rc<HostShared>) -> mlua::Result<Table<'a>> {
    let db = lua.create_table()?;

    let shared_query = shared.clone();
    db.set(
        "query",
        lua.create_function(move |lua, (sql, params): (String, Option<Table>)| {
            let params = lua_params(&params)?;
            let rows = lua.create_table()?;
            let mut index = 1i64;
            let mut row_err: Option<mlua::Error> = None;
            shared_query
                .caps
                .db
                .query(&sql, &params, |cols| {
                    match row_to_table(lua, cols).and_then(|t| rows.raw_set(index, t)) {
                        Ok(()) => {
                            index += 1;
                            true
                        }
                        Err(e) => {
                            row_err = Some(e);
                            false
                        }
                    }
                })
                .map_err(cap_err)?;
            if let Some(e) = row_err {
                return Err(e);
            }
            Ok(rows)
        })?,
    )?;

    let shared_exec = shared.clone();
    db.set(
        "exec",
        lua.create_function(move |_, (sql, params): (String, Option<Table>)| {
            let params = lua_params(&params)?;
            shared_exec.caps.db.exec(&sql, &params).map_err(cap_err)
        })?,
    )?;

    let shared_last = shared.clone();
    db.set(
        "last_id",
        lua.create_function(move |_, ()| Ok(shared_last.caps.db.last_id()))?,
    )?;

    let shared_begin = shared.clone();
    db.set(
        "begin",
        lua.create_function(move |_, ()| shared_begin.caps.db.begin().map_err(cap_err))?,
    )?;

    let shared_commit = shared.clone();
    db.set(
        "commit",
        lua.create_function(move |_, ()| shared_commit.caps.db.commit().map_err(cap_err))?,
    )?;

    let shared_rollback = shared.clone();
    db.set(
        "rollback",
        lua.create_function(move |_, ()| shared_rollback.caps.db.rollback().map_err(cap_err))?,
    )?;

    Ok(db)
}

// ── fs ──

fn register_fs<'a>(lua: &'a Lua, shared: &Rc<HostShared>) -> mlua::Result<Table<'a>> {
    let fs = lua.create_table()?;

    let shared_read = shared.clone();
    fs.set(
        "read",
        lua.create_function(move |lua, path: String| {
            let bytes = shared_read
                .caps
                .fs
                .read(shared_read.caps.manifest(), &path)
                .map_err(cap_err)?;
            lua.create_string(&bytes)
        })?,
    )?;

    let shared_size = shared.clone();
    fs.set(
        "size",
        lua.create_function(move |_, path: String| {
            shared_size
                .caps
                .fs
                .read_size(shared_size.caps.manifest(), &path)
                .map(|n| n as i64)
                .map_err(cap_err)
        })?,
    )?;

    let shared_write = shared.clone();
    fs.set(
        "write",
        lua.create_function(move |_, (path, data): (String, mlua::String)| {
            shared_write
                .caps
                .fs
                .write(shared_write.caps.manifest(), &path, data.as_bytes())
                .map_err(cap_err)
        })?,
    )?;

    let shared_exists = shared.clone();
    fs.set(
        "exists",
        lua.create_function(move |_, path: String| {
            shared_exists
                .caps
                .fs
                .exists(shared_exists.caps.manifest(), &path)
                .map_err(cap_err)
        })?,
    )?;

    let shared_delete = shared.clone();
    fs.set(
        "delete",
        lua.create_function(move |_, path: String| {
            shared_delete
                .caps
                .fs
                .delete(shared_delete.caps.manifest(), &path)
                .map_err(cap_err)
        })?,
    )?;

    Ok(fs)
}

// ── http ──

fn headers_from_table(table: Option<Table>) -> mlua::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    if let Some(table) = table {
        for pair in table.pairs::<String, String>() {
            let (name, value) = pair?;
            out.push((name, value));
        }
    }
    Ok(out)
}

fn do_request<'lua>(
    lua: &'lua Lua,
    shared: &HostShared,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> mlua::Result<Table<'lua>> {
    let resp = shared
        .caps
        .http
        .request(shared.caps.manifest(), method, url, headers, body)
        .map_err(cap_err)?;

    let out = lua.create_table()?;
    out.set("status", resp.status)?;
    let header_table = lua.create_table()?;
    for (name, value) in &resp.headers {
        header_table.set(name.as_str(), value.as_str())?;
    }
    out.set("headers", header_table)?;
    out.set("body", lua.create_string(&resp.body)?)?;
    Ok(out)
}

fn register_http<'a>(lua: &'a Lua, shared: &Rc<HostShared>) -> mlua::Result<Table<'a>> {
    let http = lua.create_table()?;

    let shared_req = shared.clone();
    http.set(
        "request",
        lua.create_function(move |lua, opts: Table| {
            let method: Option<String> = opts.get("method")?;
            let url: String = opts.get("url")?;
            let headers = headers_from_table(opts.get("headers")?)?;
            let body: Option<mlua::String> = opts.get("body")?;
            do_request(
                lua,
                &shared_req,
                method.as_deref().unwrap_or("GET"),
                &url,
                &headers,
                body.as_ref().map(|b| b.as_bytes()),
            )
        })?,
    )?;

    let shared_get = shared.clone();
    http.set(
        "get",
        lua.create_function(move |lua, (url, headers): (String, Option<Table>)| {
            let headers = headers_from_table(headers)?;
            do_request(lua, &shared_get, "GET", &url, &headers, None)
        })?,
    )?;

    let shared_post = shared.clone();
    http.set(
        "post",
        lua.create_function(
            move |lua, (url, body, headers): (String, mlua::String, Option<Table>)| {
                let headers = headers_from_table(headers)?;
                do_request(
                    lua,
                    &shared_post,
                    "POST",
                    &url,
                    &headers,
                    Some(body.as_bytes()),
                )
            },
        )?,
    )?;

    Ok(http)
}

// ── env & time ──

fn register_env<'a>(lua: &'a Lua, shared: &Rc<HostShared>) -> mlua::Result<Table<'a>> {
    let env = lua.create_table()?;
    let shared_get = shared.clone();
    env.set(
        "get",
        lua.create_function(move |_, name: String| {
            shared_get
                .caps
                .env
                .get(shared_get.caps.manifest(), &name)
                .map_err(cap_err)
        })?,
    )?;
    Ok(env)
}

fn register_time(lua: &Lua) -> mlua::Result<Table> {
    let time = lua.create_table()?;
    time.set(
        "now",
        lua.create_function(|_, ()| Ok(hull_capability::clock::now_millis()))?,
    )?;
    time.set(
        "unix",
        lua.create_function(|_, ()| Ok(hull_capability::clock::now_secs()))?,
    )?;
    Ok(time)
}

// ── crypto ──

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> mlua::Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| cap_err(CapError::invalid(format!("{what} must be {N} bytes"))))
}

fn register_crypto(lua: &Lua) -> mlua::Result<Table> {
    use hull_primitives::crypto;

    let table = lua.create_table()?;

    table.set(
        "sha256",
        lua.create_function(|_, data: mlua::String| {
            Ok(hex::encode(crypto::sha256(data.as_bytes())))
        })?,
    )?;

    table.set(
        "sha512",
        lua.create_function(|_, data: mlua::String| {
            Ok(hex::encode(crypto::sha512(data.as_bytes())))
        })?,
    )?;

    table.set(
        "random",
        lua.create_function(|lua, n: usize| {
            let bytes = crypto::random_bytes(n).map_err(cap_err)?;
            lua.create_string(&bytes)
        })?,
    )?;

    table.set(
        "pbkdf2",
        lua.create_function(
            |lua, (password, salt, iterations, length): (mlua::String, mlua::String, u32, usize)| {
                let key =
                    crypto::pbkdf2_derive(password.as_bytes(), salt.as_bytes(), iterations, length)
                        .map_err(cap_err)?;
                lua.create_string(&key)
            },
        )?,
    )?;

    table.set(
        "hash_password",
        lua.create_function(|_, password: String| {
            crypto::hash_password(&password).map_err(cap_err)
        })?,
    )?;

    table.set(
        "verify_password",
        lua.create_function(|_, (password, stored): (String, String)| {
            Ok(crypto::verify_password(&password, &stored))
        })?,
    )?;

    table.set(
        "auth",
        lua.create_function(|lua, (message, key): (mlua::String, mlua::String)| {
            let tag = crypto::auth(message.as_bytes(), key.as_bytes()).map_err(cap_err)?;
            lua.create_string(&tag)
        })?,
    )?;

    table.set(
        "auth_verify",
        lua.create_function(
            |_, (tag, message, key): (mlua::String, mlua::String, mlua::String)| {
                Ok(crypto::auth_verify(
                    tag.as_bytes(),
                    message.as_bytes(),
                    key.as_bytes(),
                ))
            },
        )?,
    )?;

    table.set(
        "ed25519_keypair",
        lua.create_function(|lua, ()| {
            let (pk, sk) = crypto::ed25519_keypair().map_err(cap_err)?;
            Ok((lua.create_string(pk)?, lua.create_string(sk)?))
        })?,
    )?;

    table.set(
        "ed25519_sign",
        lua.create_function(|lua, (message, sk): (mlua::String, mlua::String)| {
            let sk: [u8; 32] = fixed(sk.as_bytes(), "secret key")?;
            lua.create_string(crypto::ed25519_sign(message.as_bytes(), &sk))
        })?,
    )?;

    table.set(
        "ed25519_verify",
        lua.create_function(
            |_, (message, sig, pk): (mlua::String, mlua::String, mlua::String)| {
                let sig: [u8; 64] = fixed(sig.as_bytes(), "signature")?;
                let pk: [u8; 32] = fixed(pk.as_bytes(), "public key")?;
                Ok(crypto::ed25519_verify(message.as_bytes(), &sig, &pk))
            },
        )?,
    )?;

    table.set(
        "secretbox",
        lua.create_function(
            |lua, (message, nonce, key): (mlua::String, mlua::String, mlua::String)| {
                let ct = crypto::secretbox(message.as_bytes(), nonce.as_bytes(), key.as_bytes())
                    .map_err(cap_err)?;
                lua.create_string(&ct)
            },
        )?,
    )?;

    table.set(
        "secretbox_open",
        lua.create_function(
            |lua, (ciphertext, nonce, key): (mlua::String, mlua::String, mlua::String)| {
                let pt =
                    crypto::secretbox_open(ciphertext.as_bytes(), nonce.as_bytes(), key.as_bytes())
                        .map_err(cap_err)?;
                lua.create_string(&pt)
            },
        )?,
    )?;

    table.set(
        "box_keypair",
        lua.create_function(|lua, ()| {
            let (pk, sk) = crypto::box_keypair().map_err(cap_err)?;
            Ok((lua.create_string(pk)?, lua.create_string(sk)?))
        })?,
    )?;

    table.set(
        "box",
        lua.create_function(
            |lua,
             (message, nonce, their_pk, my_sk): (
                mlua::String,
                mlua::String,
                mlua::String,
                mlua::String,
            )| {
                let ct = crypto::box_seal(
                    message.as_bytes(),
                    nonce.as_bytes(),
                    their_pk.as_bytes(),
                    my_sk.as_bytes(),
                )
                .map_err(cap_err)?;
                lua.create_string(&ct)
            },
        )?,
    )?;

    table.set(
        "box_open",
        lua.create_function(
            |lua,
             (ciphertext, nonce, their_pk, my_sk): (
                mlua::String,
                mlua::String,
                mlua::String,
                mlua::String,
            )| {
                let pt = crypto::box_open(
                    ciphertext.as_bytes(),
                    nonce.as_bytes(),
                    their_pk.as_bytes(),
                    my_sk.as_bytes(),
                )
                .map_err(cap_err)?;
                lua.create_string(&pt)
            },
        )?,
    )?;

    Ok(table)
}
