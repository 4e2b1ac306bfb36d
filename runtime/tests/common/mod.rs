//! Shared helpers for interpreter-host integration tests.
//!
//! Builds throwaway application directories, boots a host through the
//! full startup sequence (load, manifest extraction), and provides
//! request helpers.

#![allow(dead_code)]

use tempfile::TempDir;

use hull_runtime::{new_runtime, AppRuntime, RequestData, ResponseData, RuntimeConfig};

/// Write an application directory with one entry file.
pub fn app_dir(entry_name: &str, source: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(entry_name), source).unwrap();
    dir
}

/// Config with small limits so budget tests finish quickly.
pub fn test_config(dir: &TempDir, entry_name: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::new(
        dir.path(),
        dir.path().join(entry_name),
        dir.path().join("data.db"),
    );
    config.gas_budget = 2_000_000;
    config.heap_bytes = 16 * 1024 * 1024;
    config
}

/// Boot an app through load + manifest extraction.
pub fn boot(entry_name: &str, source: &str) -> (TempDir, Box<dyn AppRuntime>) {
    let dir = app_dir(entry_name, source);
    let config = test_config(&dir, entry_name);
    let mut host = new_runtime(config).unwrap();
    host.load_app().unwrap();
    host.extract_manifest().unwrap();
    (dir, host)
}

/// Look up a route id by method and pattern.
pub fn route_id(host: &dyn AppRuntime, method: &str, pattern: &str) -> usize {
    host.routes()
        .iter()
        .position(|r| r.method == method && r.pattern == pattern)
        .unwrap_or_else(|| panic!("no route {method} {pattern}"))
}

/// Dispatch a request to the route matching its method and the given
/// pattern.
pub fn send(
    host: &mut Box<dyn AppRuntime>,
    pattern: &str,
    request: RequestData,
) -> ResponseData {
    let id = route_id(host.as_ref(), &request.method, pattern);
    host.handle(id, request)
}

pub fn body_text(resp: &ResponseData) -> String {
    String::from_utf8_lossy(&resp.body).into_owned()
}
