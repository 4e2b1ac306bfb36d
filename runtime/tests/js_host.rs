//! End-to-end tests for the QuickJS host, mirroring the Lua host suite
//! plus the ES-module loader rules.

mod common;

use common::*;

use hull_runtime::{new_runtime, RequestData};

// ── Echo & routing ──

#[test]
fn test_echo_post_body() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.post("/echo", (req, res) => {
  res.send(req.body);
});
"#,
    );

    let resp = send(
        &mut host,
        "/echo",
        RequestData::new("POST", "/echo")
            .with_body("hello world")
            .with_header("Content-Type", "text/plain"),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(body_text(&resp), "hello world");
    assert_eq!(resp.header("content-type"), Some("text/plain"));
}

#[test]
fn test_path_parameter_json() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/greet/:name", (req, res) => {
  res.json({ message: `Hello, ${req.params.name}!` });
});
"#,
    );

    let resp = send(&mut host, "/greet/:name", RequestData::new("GET", "/greet/World"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(body_text(&resp), r#"{"message":"Hello, World!"}"#);
}

// ── Database ──

#[test]
fn test_sql_injection_attempt_is_inert() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
db.exec("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, name TEXT)");
db.exec("INSERT INTO t (name) VALUES (?)", ["safe"]);

app.post("/search", (req, res) => {
  const rows = db.query("SELECT id FROM t WHERE name = ?", [req.body]);
  res.send(String(rows.length));
});

app.get("/count", (req, res) => {
  const rows = db.query("SELECT COUNT(*) AS n FROM t");
  res.send(String(rows[0].n));
});
"#,
    );

    let resp = send(
        &mut host,
        "/search",
        RequestData::new("POST", "/search").with_body("'; DROP TABLE t; --"),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(body_text(&resp), "0");

    let resp = send(&mut host, "/count", RequestData::new("GET", "/count"));
    assert_eq!(body_text(&resp), "1");
}

// ── Filesystem & HTTP confinement ──

#[test]
fn test_fs_traversal_denied() {
    let dir = app_dir(
        "main.js",
        r#"
app.manifest({ fs: { read: ["data"] } });

app.get("/ok", (req, res) => {
  res.send(fs.read("data/hello.txt"));
});

app.get("/escape", (req, res) => {
  res.send(fs.read("../etc/passwd"));
});
"#,
    );
    std::fs::create_dir(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/hello.txt"), b"from disk").unwrap();

    let mut host = new_runtime(test_config(&dir, "main.js")).unwrap();
    host.load_app().unwrap();
    host.extract_manifest().unwrap();

    let id = route_id(host.as_ref(), "GET", "/ok");
    let resp = host.handle(id, RequestData::new("GET", "/ok"));
    assert_eq!(body_text(&resp), "from disk");

    let id = route_id(host.as_ref(), "GET", "/escape");
    let resp = host.handle(id, RequestData::new("GET", "/escape"));
    assert_eq!(resp.status, 500);
}

#[test]
fn test_http_host_outside_allowlist_denied() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.manifest({ hosts: ["api.example.com"] });

app.get("/fetch", (req, res) => {
  const r = http.get("https://evil.example.org/");
  res.send(String(r.status));
});
"#,
    );

    let resp = send(&mut host, "/fetch", RequestData::new("GET", "/fetch"));
    assert_eq!(resp.status, 500);
}

// ── Middleware ──

#[test]
fn test_middleware_context_flows_to_handler() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.use("*", "*", (req, res) => {
  req.ctx.user = "alice";
  return 0;
});

app.get("/who", (req, res) => {
  res.send(req.ctx.user ?? "nobody");
});
"#,
    );

    let resp = send(&mut host, "/who", RequestData::new("GET", "/who"));
    assert_eq!(body_text(&resp), "alice");
}

#[test]
fn test_middleware_short_circuit() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.use("*", "/private", (req, res) => {
  res.status(401);
  res.send("denied");
  return 1;
});

app.get("/private", (req, res) => {
  res.send("secret");
});
"#,
    );

    let resp = send(&mut host, "/private", RequestData::new("GET", "/private"));
    assert_eq!(resp.status, 401);
    assert_eq!(body_text(&resp), "denied");
}

// ── Resource budgets ──

#[test]
fn test_infinite_loop_hits_gas_budget() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/spin", (req, res) => {
  for (;;) {}
});

app.get("/ok", (req, res) => {
  res.send("alive");
});
"#,
    );

    let resp = send(&mut host, "/spin", RequestData::new("GET", "/spin"));
    assert_eq!(resp.status, 500);

    let resp = send(&mut host, "/ok", RequestData::new("GET", "/ok"));
    assert_eq!(body_text(&resp), "alive");
}

#[test]
fn test_heap_cap_aborts_script_not_process() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/hog", (req, res) => {
  let s = "xxxxxxxxxxxxxxxx";
  for (;;) s += s;
});

app.get("/ok", (req, res) => {
  res.send("alive");
});
"#,
    );

    let resp = send(&mut host, "/hog", RequestData::new("GET", "/hog"));
    assert_eq!(resp.status, 500);

    let resp = send(&mut host, "/ok", RequestData::new("GET", "/ok"));
    assert_eq!(body_text(&resp), "alive");
}

// ── Sandbox hardening ──

#[test]
fn test_eval_is_removed() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/probe", (req, res) => {
  res.send(typeof eval);
});
"#,
    );

    let resp = send(&mut host, "/probe", RequestData::new("GET", "/probe"));
    assert_eq!(body_text(&resp), "undefined");
}

#[test]
fn test_routes_sealed_after_startup() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/late", (req, res) => {
  app.get("/sneak", () => {});
  res.send("registered");
});
"#,
    );

    let resp = send(&mut host, "/late", RequestData::new("GET", "/late"));
    assert_eq!(resp.status, 500);
    assert_eq!(host.routes().len(), 1);
}

// ── Modules ──

#[test]
fn test_relative_and_builtin_imports() {
    let dir = app_dir(
        "main.mjs",
        r#"
import { double } from "./lib/util.js";
import hullTime from "hull:time";

app.get("/double", (req, res) => {
  res.send(String(double(21)) + "|" + String(hullTime.now() > 0));
});
"#,
    );
    std::fs::create_dir(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("lib/util.js"),
        "export function double(x) { return x * 2; }\n",
    )
    .unwrap();

    let mut host = new_runtime(test_config(&dir, "main.mjs")).unwrap();
    host.load_app().unwrap();
    host.extract_manifest().unwrap();

    let id = route_id(host.as_ref(), "GET", "/double");
    let resp = host.handle(id, RequestData::new("GET", "/double"));
    assert_eq!(body_text(&resp), "42|true");
}

#[test]
fn test_import_escape_rejected_at_load() {
    let dir = app_dir(
        "main.mjs",
        r#"
import "../outside.js";
app.get("/", (req, res) => res.send("ok"));
"#,
    );
    let mut host = new_runtime(test_config(&dir, "main.mjs")).unwrap();
    assert!(host.load_app().is_err());
}

// ── Crypto via script ──

#[test]
fn test_password_hashing_from_script() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"
app.get("/pw", (req, res) => {
  const a = crypto.hash_password("s3cret");
  const b = crypto.hash_password("s3cret");
  const checks = [
    a !== b,
    crypto.verify_password("s3cret", a),
    crypto.verify_password("s3cret", b),
    !crypto.verify_password("wrong", a),
  ];
  res.send(checks.join(","));
});
"#,
    );

    let resp = send(&mut host, "/pw", RequestData::new("GET", "/pw"));
    assert_eq!(body_text(&resp), "true,true,true,true");
}

// ── Teardown ──

#[test]
fn test_shutdown_is_idempotent() {
    let (_dir, mut host) = boot(
        "main.js",
        r#"app.get("/", (req, res) => res.send("ok"));"#,
    );
    host.shutdown();
    host.shutdown();
    let resp = host.handle(0, RequestData::new("GET", "/"));
    assert_eq!(resp.status, 500);
}
