//! Filesystem capability.
//!
//! Reads and writes are confined twice before any OS call: the path must
//! resolve inside the application root (`paths`), and it must fall under
//! a manifest grant. Writes create missing parent directories (0755)
//! first, matching the declarative "this tree is mine" semantics of a
//! write grant.

use std::fs;
use std::path::{Path, PathBuf};

use hull_primitives::{CapError, Manifest};

use crate::paths::{normalize_rel, resolve_in_root};

/// Filesystem access rooted at the application directory.
#[derive(Debug, Clone)]
pub struct FsCapability {
    root: PathBuf,
}

impl FsCapability {
    /// Create a capability rooted at `root`. The root must exist when
    /// operations run; that is checked per call, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_read(&self, manifest: &Manifest, path: &str) -> Result<PathBuf, CapError> {
        let resolved = resolve_in_root(&self.root, path)?;
        if !manifest.has_fs() {
            return Err(CapError::manifest("no filesystem access declared"));
        }
        if !manifest.allows_read(&normalize_rel(path)) {
            return Err(CapError::denied(format!("read of {path:?} not granted")));
        }
        Ok(resolved)
    }

    fn resolve_write(&self, manifest: &Manifest, path: &str) -> Result<PathBuf, CapError> {
        let resolved = resolve_in_root(&self.root, path)?;
        if !manifest.has_fs() {
            return Err(CapError::manifest("no filesystem access declared"));
        }
        if !manifest.allows_write(&normalize_rel(path)) {
            return Err(CapError::denied(format!("write of {path:?} not granted")));
        }
        Ok(resolved)
    }

    /// Read a file's contents.
    pub fn read(&self, manifest: &Manifest, path: &str) -> Result<Vec<u8>, CapError> {
        let resolved = self.resolve_read(manifest, path)?;
        Ok(fs::read(resolved)?)
    }

    /// Size of a file in bytes, without reading it.
    pub fn read_size(&self, manifest: &Manifest, path: &str) -> Result<u64, CapError> {
        let resolved = self.resolve_read(manifest, path)?;
        Ok(fs::metadata(resolved)?.len())
    }

    /// Write `data`, creating parent directories (0755) as needed.
    pub fn write(&self, manifest: &Manifest, path: &str, data: &[u8]) -> Result<(), CapError> {
        let resolved = self.resolve_write(manifest, path)?;
        if let Some(parent) = resolved.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o755);
            }
            builder.create(parent)?;
        }
        fs::write(resolved, data)?;
        Ok(())
    }

    /// Whether a file exists. Requires a read grant: existence inside an
    /// ungranted tree is itself information.
    pub fn exists(&self, manifest: &Manifest, path: &str) -> Result<bool, CapError> {
        let resolved = self.resolve_read(manifest, path)?;
        Ok(resolved.exists())
    }

    /// Delete a file. Requires a write grant.
    pub fn delete(&self, manifest: &Manifest, path: &str) -> Result<(), CapError> {
        let resolved = self.resolve_write(manifest, path)?;
        fs::remove_file(resolved)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_primitives::manifest::FsGrants;

    fn manifest() -> Manifest {
        Manifest {
            fs: FsGrants {
                read: vec!["data".into()],
                write: vec!["out".into()],
            },
            ..Manifest::default()
        }
    }

    fn fixture() -> (tempfile::TempDir, FsCapability) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/hello.txt"), b"hello").unwrap();
        fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        let cap = FsCapability::new(dir.path());
        (dir, cap)
    }

    #[test]
    fn test_read_granted() {
        let (_dir, cap) = fixture();
        let m = manifest();
        assert_eq!(cap.read(&m, "data/hello.txt").unwrap(), b"hello");
        assert_eq!(cap.read_size(&m, "data/hello.txt").unwrap(), 5);
        assert!(cap.exists(&m, "data/hello.txt").unwrap());
        assert!(!cap.exists(&m, "data/missing.txt").unwrap());
    }

    #[test]
    fn test_read_outside_grant_denied() {
        let (_dir, cap) = fixture();
        let m = manifest();
        // Inside the root but not under a granted prefix.
        let err = cap.read(&m, "secret.txt").unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_traversal_denied_before_manifest_check() {
        let (_dir, cap) = fixture();
        let m = manifest();
        let err = cap.read(&m, "../etc/passwd").unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_empty_manifest_is_violation() {
        let (_dir, cap) = fixture();
        let err = cap.read(&Manifest::default(), "data/hello.txt").unwrap_err();
        assert!(matches!(err, CapError::ManifestViolation(_)));
    }

    #[test]
    fn test_write_creates_parents() {
        let (dir, cap) = fixture();
        let m = manifest();
        cap.write(&m, "out/a/b/c.bin", &[1, 2, 3]).unwrap();
        assert_eq!(fs::read(dir.path().join("out/a/b/c.bin")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_requires_write_grant() {
        let (_dir, cap) = fixture();
        let m = manifest();
        let err = cap.write(&m, "data/new.txt", b"x").unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_write_grant_implies_read() {
        let (_dir, cap) = fixture();
        let m = manifest();
        cap.write(&m, "out/note.txt", b"note").unwrap();
        assert_eq!(cap.read(&m, "out/note.txt").unwrap(), b"note");
    }

    #[test]
    fn test_delete() {
        let (dir, cap) = fixture();
        let m = manifest();
        cap.write(&m, "out/gone.txt", b"x").unwrap();
        cap.delete(&m, "out/gone.txt").unwrap();
        assert!(!dir.path().join("out/gone.txt").exists());

        // Delete needs a write grant.
        let err = cap.delete(&m, "data/hello.txt").unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_missing_file_is_io() {
        let (_dir, cap) = fixture();
        let m = manifest();
        let err = cap.read(&m, "data/missing.txt").unwrap_err();
        assert!(matches!(err, CapError::Io(_)));
    }
}
