//! Runtime configuration.

use std::path::PathBuf;

use hull_capability::HttpConfig;

/// Configuration for one interpreter host.
///
/// Controls the heap cap, stack cap, per-request instruction budget,
/// and where the application and its database live.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Application root directory (base for fs grants and imports).
    pub app_root: PathBuf,
    /// Entry-point script inside `app_root`.
    pub entry: PathBuf,
    /// Storage-engine database file.
    pub db_path: PathBuf,
    /// Interpreter heap cap in bytes.
    pub heap_bytes: usize,
    /// Interpreter stack cap in bytes.
    pub stack_bytes: usize,
    /// Per-request instruction budget.
    pub gas_budget: u64,
    /// Outbound HTTP client limits.
    pub http: HttpConfig,
}

impl RuntimeConfig {
    /// Config with default limits for the given paths.
    pub fn new(
        app_root: impl Into<PathBuf>,
        entry: impl Into<PathBuf>,
        db_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_root: app_root.into(),
            entry: entry.into(),
            db_path: db_path.into(),
            heap_bytes: 64 * 1024 * 1024,  // 64 MiB
            stack_bytes: 1024 * 1024,      // 1 MiB
            gas_budget: 50_000_000,
            http: HttpConfig::default(),
        }
    }
}
