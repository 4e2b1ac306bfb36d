//! Kernel sandbox application.
//!
//! Translates the manifest into OS path and syscall restrictions. On
//! OpenBSD this is `unveil` + `pledge`: path grants are registered,
//! registration is sealed, and the promise set is applied; violations
//! after that terminate the process. On systems without an equivalent
//! the applier logs the fallback and returns successfully — the
//! in-process validation in this crate remains in force either way.

use std::path::{Path, PathBuf};

use hull_primitives::{CapError, Manifest};

/// One path grant derived from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGrant {
    pub path: PathBuf,
    /// Read-only when false; read+write+create when true.
    pub write: bool,
}

/// The computed sandbox policy: path grants plus a syscall promise set.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub grants: Vec<PathGrant>,
    pub promises: String,
}

/// Baseline promise set every application needs.
const BASE_PROMISES: &str = "stdio inet rpath wpath cpath flock";

impl SandboxPolicy {
    /// Compute the policy for a manifest.
    ///
    /// Beyond the script's own grants the policy covers the application
    /// root (module loading reads) and the database directory (SQLite
    /// journal files live next to the database).
    pub fn from_manifest(manifest: &Manifest, app_root: &Path, db_path: &Path) -> Self {
        let mut grants = vec![PathGrant {
            path: app_root.to_path_buf(),
            write: false,
        }];
        if let Some(db_dir) = db_path.parent() {
            let db_dir = if db_dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                db_dir.to_path_buf()
            };
            grants.push(PathGrant {
                path: db_dir,
                write: true,
            });
        }
        for p in &manifest.fs.read {
            grants.push(PathGrant {
                path: app_root.join(p),
                write: false,
            });
        }
        for p in &manifest.fs.write {
            grants.push(PathGrant {
                path: app_root.join(p),
                write: true,
            });
        }

        let mut promises = String::from(BASE_PROMISES);
        if manifest.has_hosts() {
            promises.push_str(" dns");
        }

        Self { grants, promises }
    }

    /// Apply the policy to the running process.
    ///
    /// After this returns, path registration is sealed and the syscall
    /// filter is active (where the kernel supports it).
    pub fn apply(&self) -> Result<(), CapError> {
        self.apply_os()
    }

    #[cfg(target_os = "openbsd")]
    fn apply_os(&self) -> Result<(), CapError> {
        use std::ffi::CString;

        fn cstr(s: &str) -> Result<CString, CapError> {
            CString::new(s).map_err(|_| CapError::invalid("NUL in sandbox path"))
        }

        for grant in &self.grants {
            let path = cstr(&grant.path.to_string_lossy())?;
            let perms = cstr(if grant.write { "rwc" } else { "r" })?;
            let rc = unsafe { libc::unveil(path.as_ptr(), perms.as_ptr()) };
            if rc != 0 {
                return Err(CapError::Io(std::io::Error::last_os_error()));
            }
        }
        // Seal: no further unveil calls are possible.
        let rc = unsafe { libc::unveil(std::ptr::null(), std::ptr::null()) };
        if rc != 0 {
            return Err(CapError::Io(std::io::Error::last_os_error()));
        }

        let promises = cstr(&self.promises)?;
        let rc = unsafe { libc::pledge(promises.as_ptr(), std::ptr::null()) };
        if rc != 0 {
            return Err(CapError::Io(std::io::Error::last_os_error()));
        }

        tracing::info!(promises = %self.promises, "kernel sandbox applied");
        Ok(())
    }

    #[cfg(not(target_os = "openbsd"))]
    fn apply_os(&self) -> Result<(), CapError> {
        tracing::warn!(
            grants = self.grants.len(),
            promises = %self.promises,
            "kernel sandbox not available; capability-layer validation only"
        );
        Ok(())
    }
}
