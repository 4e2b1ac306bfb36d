//! Path containment validation.
//!
//! Three independent layers close different attack classes: the
//! syntactic check here catches `..`, the canonical-ancestor check
//! catches symlink escapes on paths that do not exist yet, and the
//! kernel path restriction (where available, see `sandbox`) catches
//! TOCTOU between check and open.

use std::path::{Path, PathBuf};

use hull_primitives::CapError;

/// Syntactic validation of a script-supplied relative path.
///
/// Rejects the empty path, absolute paths, and any `..` segment. Does
/// not touch the filesystem.
pub fn validate_rel_path(path: &str) -> Result<(), CapError> {
    if path.is_empty() {
        return Err(CapError::invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(CapError::denied(format!("absolute path {path:?}")));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(CapError::denied(format!("path {path:?} contains '..'")));
    }
    Ok(())
}

/// Resolve `rel` under `root`, enforcing containment.
///
/// 1. `rel` passes the syntactic check.
/// 2. `root` resolves to an absolute canonical form (it must exist).
/// 3. The candidate is `root/rel`.
/// 4. The deepest existing ancestor of the candidate, canonicalized,
///    must be the canonical root or lie under it.
///
/// Returns the (non-canonicalized) candidate path for the caller to
/// open. Any validation failure is `Denied`; a missing root is `Io`.
pub fn resolve_in_root(root: &Path, rel: &str) -> Result<PathBuf, CapError> {
    validate_rel_path(rel)?;

    let canonical_root = root.canonicalize()?;
    let candidate = canonical_root.join(rel);

    for ancestor in candidate.ancestors() {
        if !ancestor.exists() {
            continue;
        }
        let canonical = ancestor.canonicalize()?;
        if canonical.starts_with(&canonical_root) {
            return Ok(candidate);
        }
        return Err(CapError::denied(format!("path {rel:?} escapes the application root")));
    }
    // Unreachable in practice: canonical_root itself exists.
    Err(CapError::denied(format!("path {rel:?} has no existing ancestor")))
}

/// Normalize a relative path for manifest prefix matching: strips `./`
/// segments and collapses duplicate separators. Assumes the syntactic
/// check already ran.
pub fn normalize_rel(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        out.push(seg);
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_syntactic_rejections() {
        assert!(validate_rel_path("").is_err());
        assert!(validate_rel_path("/etc/passwd").is_err());
        assert!(validate_rel_path("../etc/passwd").is_err());
        assert!(validate_rel_path("data/../../etc").is_err());
        assert!(validate_rel_path("data/file.txt").is_ok());
        assert!(validate_rel_path("./data/file.txt").is_ok());
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/a.txt"), b"x").unwrap();

        let p = resolve_in_root(dir.path(), "data/a.txt").unwrap();
        assert!(p.ends_with("data/a.txt"));

        // Nonexistent leaf is fine as long as its ancestors are contained.
        let p = resolve_in_root(dir.path(), "data/new/deep/file.bin").unwrap();
        assert!(p.ends_with("file.bin"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_in_root(dir.path(), "../outside").unwrap_err();
        assert!(err.is_denied());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        // "link/secret" is syntactically clean but its deepest existing
        // ancestor canonicalizes outside the root.
        let err = resolve_in_root(root.path(), "link/secret").unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_resolve_missing_root_is_io() {
        let err = resolve_in_root(Path::new("/nonexistent-hull-root"), "a").unwrap_err();
        assert!(matches!(err, CapError::Io(_)));
    }

    #[test]
    fn test_normalize_rel() {
        assert_eq!(normalize_rel("./data//a.txt"), "data/a.txt");
        assert_eq!(normalize_rel("data/./b"), "data/b");
        assert_eq!(normalize_rel("a"), "a");
    }
}
