//! The interpreter worker thread.
//!
//! One OS thread exclusively owns the `AppRuntime` (interpreter state,
//! route table, manifest, database connection). The HTTP workers only
//! hold a channel: requests go in as jobs, responses come back over
//! oneshots, and the interpreter is never called re-entrantly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use hull_capability::SandboxPolicy;
use hull_primitives::Manifest;
use hull_runtime::{new_runtime, RequestData, ResponseData, RouteDef, RuntimeConfig};

use crate::error::StartupError;

/// Entry-point names probed in order.
const ENTRY_CANDIDATES: &[&str] = &[
    "main.lua", "main.js", "main.mjs", "app.lua", "app.js", "app.mjs",
];

/// Locate the application entry point inside `app_dir`.
pub fn find_entry(app_dir: &Path) -> Result<PathBuf, StartupError> {
    for name in ENTRY_CANDIDATES {
        let candidate = app_dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(StartupError::fatal(format!(
        "no application entry point in {} (expected one of {})",
        app_dir.display(),
        ENTRY_CANDIDATES.join(", ")
    )))
}

/// One queued request.
struct Job {
    route_id: usize,
    request: RequestData,
    reply: oneshot::Sender<ResponseData>,
}

/// Cheap handle the HTTP side uses to reach the worker.
pub struct RuntimeClient {
    tx: mpsc::Sender<Job>,
}

impl RuntimeClient {
    /// Dispatch one request and wait for its response. A dead worker
    /// degrades to the fixed 500 response.
    pub async fn dispatch(&self, route_id: usize, request: RequestData) -> ResponseData {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            route_id,
            request,
            reply: reply_tx,
        };
        if self.tx.send(job).await.is_err() {
            tracing::error!("runtime worker is gone");
            return ResponseData::internal_error();
        }
        reply_rx.await.unwrap_or_else(|_| ResponseData::internal_error())
    }
}

/// A started worker: routes and manifest from startup, plus the client.
pub struct WorkerHandle {
    pub client: Arc<RuntimeClient>,
    pub routes: Vec<RouteDef>,
    pub manifest: Manifest,
}

/// Spawn the worker thread and run the startup sequence on it:
/// interpreter init → app load → manifest extraction → sandbox
/// application. Returns once the route table is wired.
pub fn spawn(config: RuntimeConfig) -> Result<WorkerHandle, StartupError> {
    let (job_tx, mut job_rx) = mpsc::channel::<Job>(64);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    std::thread::Builder::new()
        .name("hull-runtime".into())
        .spawn(move || {
            let startup = || -> Result<_, StartupError> {
                let mut host = new_runtime(config.clone())?;
                host.load_app()?;
                let manifest = host.extract_manifest()?;
                SandboxPolicy::from_manifest(&manifest, &config.app_root, &config.db_path)
                    .apply()
                    .map_err(StartupError::fatal)?;
                let routes = host.routes();
                Ok((host, routes, manifest))
            };
            match startup() {
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
                Ok((mut host, routes, manifest)) => {
                    let _ = ready_tx.send(Ok((routes, manifest)));
                    while let Some(job) = job_rx.blocking_recv() {
                        let response = host.handle(job.route_id, job.request);
                        let _ = job.reply.send(response);
                    }
                    host.shutdown();
                }
            }
        })
        .map_err(StartupError::fatal)?;

    let (routes, manifest) = ready_rx
        .recv()
        .map_err(|_| StartupError::fatal("runtime worker died during startup"))??;

    Ok(WorkerHandle {
        client: Arc::new(RuntimeClient { tx: job_tx }),
        routes,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_entry_prefers_lua() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.lua"), "").unwrap();
        std::fs::write(dir.path().join("main.js"), "").unwrap();
        assert!(find_entry(dir.path()).unwrap().ends_with("main.lua"));
    }

    #[test]
    fn test_find_entry_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_entry(dir.path()).is_err());
    }
}
