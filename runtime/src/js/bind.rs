//! Native function registration for the QuickJS host.
//!
//! Every `__hull_*` function crosses the boundary with owned scalar
//! types only; structured data travels as JSON text and the prelude
//! provides the script-facing API on top. Binary arguments and results
//! are lowercase hex.

use std::cell::Cell;
use std::rc::Rc;

use rquickjs::{Ctx, Exception, Function};

use hull_primitives::{CapError, Manifest};

use crate::error::RuntimeError;
use crate::host::HostShared;

use super::convert::{params_from_json, row_to_json};

fn init_err(e: rquickjs::Error) -> RuntimeError {
    RuntimeError::Init(e.to_string())
}

fn throw_cap(ctx: &Ctx<'_>, e: CapError) -> rquickjs::Error {
    Exception::throw_message(ctx, &e.to_string())
}

fn hex_arg(ctx: &Ctx<'_>, what: &str, s: &str) -> rquickjs::Result<Vec<u8>> {
    hex::decode(s).map_err(|_| throw_cap(ctx, CapError::invalid(format!("{what} must be hex"))))
}

macro_rules! global_fn {
    ($ctx:expr, $name:literal, $f:expr) => {
        $ctx.globals()
            .set($name, Function::new($ctx.clone(), $f).map_err(init_err)?)
            .map_err(init_err)?;
    };
}

/// Install every native binding on the global object.
pub fn register_all(
    ctx: &Ctx<'_>,
    shared: &Rc<HostShared>,
    next_id: &Rc<Cell<usize>>,
) -> Result<(), RuntimeError> {
    register_app(ctx, shared, next_id)?;
    register_db(ctx, shared)?;
    register_fs(ctx, shared)?;
    register_http(ctx, shared)?;
    register_env(ctx, shared)?;
    register_time(ctx)?;
    register_crypto(ctx)?;
    Ok(())
}

// ── Registration & manifest ──

fn register_app(
    ctx: &Ctx<'_>,
    shared: &Rc<HostShared>,
    next_id: &Rc<Cell<usize>>,
) -> Result<(), RuntimeError> {
    let shared_reg = shared.clone();
    let next = next_id.clone();
    global_fn!(
        ctx,
        "__hull_register",
        move |ctx: Ctx<'_>, kind: String, method: String, pattern: String| -> rquickjs::Result<i32> {
            let id = next.get();
            match kind.as_str() {
                "route" => shared_reg.register_route(&method, &pattern, id),
                "middleware" => shared_reg.register_middleware(&method, &pattern, id),
                _ => Err(CapError::invalid(format!("unknown registration kind {kind:?}"))),
            }
            .map_err(|e| throw_cap(&ctx, e))?;
            next.set(id + 1);
            Ok(id as i32)
        }
    );

    let shared_manifest = shared.clone();
    global_fn!(
        ctx,
        "__hull_manifest",
        move |ctx: Ctx<'_>, decl_json: String| -> rquickjs::Result<()> {
            let manifest: Manifest = serde_json::from_str(&decl_json).map_err(|e| {
                throw_cap(&ctx, CapError::invalid(format!("bad manifest declaration: {e}")))
            })?;
            shared_manifest
                .declare_manifest(manifest)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    Ok(())
}

// ── db ──

fn register_db(ctx: &Ctx<'_>, shared: &Rc<HostShared>) -> Result<(), RuntimeError> {
    let shared_query = shared.clone();
    global_fn!(
        ctx,
        "__hull_db_query",
        move |ctx: Ctx<'_>, sql: String, params_json: String| -> rquickjs::Result<String> {
            let run = || -> Result<String, CapError> {
                let params = params_from_json(&params_json)?;
                let mut rows = Vec::new();
                shared_query.caps.db.query(&sql, &params, |cols| {
                    rows.push(row_to_json(cols));
                    true
                })?;
                Ok(serde_json::Value::Array(rows).to_string())
            };
            run().map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_exec = shared.clone();
    global_fn!(
        ctx,
        "__hull_db_exec",
        move |ctx: Ctx<'_>, sql: String, params_json: String| -> rquickjs::Result<f64> {
            let run = || -> Result<i64, CapError> {
                let params = params_from_json(&params_json)?;
                shared_exec.caps.db.exec(&sql, &params)
            };
            run().map(|n| n as f64).map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_last = shared.clone();
    global_fn!(ctx, "__hull_db_last_id", move || -> f64 {
        shared_last.caps.db.last_id() as f64
    });

    let shared_begin = shared.clone();
    global_fn!(ctx, "__hull_db_begin", move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
        shared_begin.caps.db.begin().map_err(|e| throw_cap(&ctx, e))
    });

    let shared_commit = shared.clone();
    global_fn!(ctx, "__hull_db_commit", move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
        shared_commit.caps.db.commit().map_err(|e| throw_cap(&ctx, e))
    });

    let shared_rollback = shared.clone();
    global_fn!(ctx, "__hull_db_rollback", move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
        shared_rollback.caps.db.rollback().map_err(|e| throw_cap(&ctx, e))
    });

    Ok(())
}

// ── fs ──

fn register_fs(ctx: &Ctx<'_>, shared: &Rc<HostShared>) -> Result<(), RuntimeError> {
    let shared_read = shared.clone();
    global_fn!(
        ctx,
        "__hull_fs_read",
        move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<String> {
            shared_read
                .caps
                .fs
                .read(shared_read.caps.manifest(), &path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_size = shared.clone();
    global_fn!(
        ctx,
        "__hull_fs_size",
        move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<f64> {
            shared_size
                .caps
                .fs
                .read_size(shared_size.caps.manifest(), &path)
                .map(|n| n as f64)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_write = shared.clone();
    global_fn!(
        ctx,
        "__hull_fs_write",
        move |ctx: Ctx<'_>, path: String, data: String| -> rquickjs::Result<()> {
            shared_write
                .caps
                .fs
                .write(shared_write.caps.manifest(), &path, data.as_bytes())
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_exists = shared.clone();
    global_fn!(
        ctx,
        "__hull_fs_exists",
        move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<bool> {
            shared_exists
                .caps
                .fs
                .exists(shared_exists.caps.manifest(), &path)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    let shared_delete = shared.clone();
    global_fn!(
        ctx,
        "__hull_fs_delete",
        move |ctx: Ctx<'_>, path: String| -> rquickjs::Result<()> {
            shared_delete
                .caps
                .fs
                .delete(shared_delete.caps.manifest(), &path)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    Ok(())
}

// ── http ──

fn register_http(ctx: &Ctx<'_>, shared: &Rc<HostShared>) -> Result<(), RuntimeError> {
    let shared_http = shared.clone();
    global_fn!(
        ctx,
        "__hull_http",
        move |ctx: Ctx<'_>, opts_json: String| -> rquickjs::Result<String> {
            let run = || -> Result<String, CapError> {
                let opts: serde_json::Value = serde_json::from_str(&opts_json)
                    .map_err(|e| CapError::invalid(format!("bad request options: {e}")))?;
                let method = opts.get("method").and_then(|m| m.as_str()).unwrap_or("GET");
                let url = opts
                    .get("url")
                    .and_then(|u| u.as_str())
                    .ok_or_else(|| CapError::invalid("request needs a url"))?;
                let mut headers = Vec::new();
                if let Some(serde_json::Value::Object(map)) = opts.get("headers") {
                    for (name, value) in map {
                        if let Some(value) = value.as_str() {
                            headers.push((name.clone(), value.to_string()));
                        }
                    }
                }
                let body = opts
                    .get("body")
                    .and_then(|b| b.as_str())
                    .map(|s| s.as_bytes().to_vec());

                let resp = shared_http.caps.http.request(
                    shared_http.caps.manifest(),
                    method,
                    url,
                    &headers,
                    body.as_deref(),
                )?;

                let mut header_map = serde_json::Map::new();
                for (name, value) in &resp.headers {
                    header_map.insert(name.clone(), serde_json::Value::String(value.clone()));
                }
                let out = serde_json::json!({
                    "status": resp.status,
                    "headers": serde_json::Value::Object(header_map),
                    "body": String::from_utf8_lossy(&resp.body).into_owned(),
                });
                Ok(out.to_string())
            };
            run().map_err(|e| throw_cap(&ctx, e))
        }
    );

    Ok(())
}

// ── env & time ──

fn register_env(ctx: &Ctx<'_>, shared: &Rc<HostShared>) -> Result<(), RuntimeError> {
    let shared_env = shared.clone();
    global_fn!(
        ctx,
        "__hull_env",
        move |ctx: Ctx<'_>, name: String| -> rquickjs::Result<Option<String>> {
            shared_env
                .caps
                .env
                .get(shared_env.caps.manifest(), &name)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );
    Ok(())
}

fn register_time(ctx: &Ctx<'_>) -> Result<(), RuntimeError> {
    global_fn!(ctx, "__hull_time_now", || -> f64 {
        hull_capability::clock::now_millis() as f64
    });
    global_fn!(ctx, "__hull_time_unix", || -> f64 {
        hull_capability::clock::now_secs() as f64
    });
    Ok(())
}

// ── crypto ──

fn register_crypto(ctx: &Ctx<'_>) -> Result<(), RuntimeError> {
    use hull_primitives::crypto;

    global_fn!(ctx, "__hull_sha256", |data: String| -> String {
        hex::encode(crypto::sha256(data.as_bytes()))
    });

    global_fn!(ctx, "__hull_sha512", |data: String| -> String {
        hex::encode(crypto::sha512(data.as_bytes()))
    });

    global_fn!(ctx, "__hull_random", |ctx: Ctx<'_>, n: i32| -> rquickjs::Result<String> {
        crypto::random_bytes(n.max(0) as usize)
            .map(hex::encode)
            .map_err(|e| throw_cap(&ctx, e))
    });

    global_fn!(
        ctx,
        "__hull_pbkdf2",
        |ctx: Ctx<'_>, password: String, salt: String, iterations: i32, length: i32| -> rquickjs::Result<String> {
            crypto::pbkdf2_derive(
                password.as_bytes(),
                salt.as_bytes(),
                iterations.max(0) as u32,
                length.max(0) as usize,
            )
            .map(hex::encode)
            .map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(
        ctx,
        "__hull_hash_password",
        |ctx: Ctx<'_>, password: String| -> rquickjs::Result<String> {
            crypto::hash_password(&password).map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(
        ctx,
        "__hull_verify_password",
        |password: String, stored: String| -> bool {
            crypto::verify_password(&password, &stored)
        }
    );

    global_fn!(
        ctx,
        "__hull_auth",
        |ctx: Ctx<'_>, message: String, key: String| -> rquickjs::Result<String> {
            crypto::auth(message.as_bytes(), key.as_bytes())
                .map(hex::encode)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(
        ctx,
        "__hull_auth_verify",
        |ctx: Ctx<'_>, tag: String, message: String, key: String| -> rquickjs::Result<bool> {
            let tag = hex_arg(&ctx, "tag", &tag)?;
            Ok(crypto::auth_verify(&tag, message.as_bytes(), key.as_bytes()))
        }
    );

    global_fn!(ctx, "__hull_ed25519_keypair", |ctx: Ctx<'_>| -> rquickjs::Result<String> {
        let (pk, sk) = crypto::ed25519_keypair().map_err(|e| throw_cap(&ctx, e))?;
        Ok(serde_json::json!({"public": hex::encode(pk), "secret": hex::encode(sk)}).to_string())
    });

    global_fn!(
        ctx,
        "__hull_ed25519_sign",
        |ctx: Ctx<'_>, message: String, secret: String| -> rquickjs::Result<String> {
            let sk = hex_arg(&ctx, "secret key", &secret)?;
            let sk: [u8; 32] = sk
                .as_slice()
                .try_into()
                .map_err(|_| throw_cap(&ctx, CapError::invalid("secret key must be 32 bytes")))?;
            Ok(hex::encode(crypto::ed25519_sign(message.as_bytes(), &sk)))
        }
    );

    global_fn!(
        ctx,
        "__hull_ed25519_verify",
        |ctx: Ctx<'_>, message: String, signature: String, public: String| -> rquickjs::Result<bool> {
            let sig = hex_arg(&ctx, "signature", &signature)?;
            let pk = hex_arg(&ctx, "public key", &public)?;
            let (Ok(sig), Ok(pk)) = (
                <[u8; 64]>::try_from(sig.as_slice()),
                <[u8; 32]>::try_from(pk.as_slice()),
            ) else {
                return Ok(false);
            };
            Ok(crypto::ed25519_verify(message.as_bytes(), &sig, &pk))
        }
    );

    global_fn!(
        ctx,
        "__hull_secretbox",
        |ctx: Ctx<'_>, message: String, nonce: String, key: String| -> rquickjs::Result<String> {
            let nonce = hex_arg(&ctx, "nonce", &nonce)?;
            let key = hex_arg(&ctx, "key", &key)?;
            crypto::secretbox(message.as_bytes(), &nonce, &key)
                .map(hex::encode)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(
        ctx,
        "__hull_secretbox_open",
        |ctx: Ctx<'_>, ciphertext: String, nonce: String, key: String| -> rquickjs::Result<String> {
            let ciphertext = hex_arg(&ctx, "ciphertext", &ciphertext)?;
            let nonce = hex_arg(&ctx, "nonce", &nonce)?;
            let key = hex_arg(&ctx, "key", &key)?;
            crypto::secretbox_open(&ciphertext, &nonce, &key)
                .map(|pt| String::from_utf8_lossy(&pt).into_owned())
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(ctx, "__hull_box_keypair", |ctx: Ctx<'_>| -> rquickjs::Result<String> {
        let (pk, sk) = crypto::box_keypair().map_err(|e| throw_cap(&ctx, e))?;
        Ok(serde_json::json!({"public": hex::encode(pk), "secret": hex::encode(sk)}).to_string())
    });

    global_fn!(
        ctx,
        "__hull_box",
        |ctx: Ctx<'_>, message: String, nonce: String, their_public: String, my_secret: String| -> rquickjs::Result<String> {
            let nonce = hex_arg(&ctx, "nonce", &nonce)?;
            let pk = hex_arg(&ctx, "public key", &their_public)?;
            let sk = hex_arg(&ctx, "secret key", &my_secret)?;
            crypto::box_seal(message.as_bytes(), &nonce, &pk, &sk)
                .map(hex::encode)
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    global_fn!(
        ctx,
        "__hull_box_open",
        |ctx: Ctx<'_>, ciphertext: String, nonce: String, their_public: String, my_secret: String| -> rquickjs::Result<String> {
            let ciphertext = hex_arg(&ctx, "ciphertext", &ciphertext)?;
            let nonce = hex_arg(&ctx, "nonce", &nonce)?;
            let pk = hex_arg(&ctx, "public key", &their_public)?;
            let sk = hex_arg(&ctx, "secret key", &my_secret)?;
            crypto::box_open(&ciphertext, &nonce, &pk, &sk)
                .map(|pt| String::from_utf8_lossy(&pt).into_owned())
                .map_err(|e| throw_cap(&ctx, e))
        }
    );

    Ok(())
}
