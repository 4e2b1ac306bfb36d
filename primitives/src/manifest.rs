//! The manifest — an application's declarative side-effect contract.
//!
//! A script declares, in its top-level code, every path prefix it will
//! read or write, every environment variable it will read, and every
//! host it will contact. The host extracts that declaration once after
//! startup, validates it, and never mutates it again. Everything the
//! capability layer permits must trace back to one of these entries.

use serde::{Deserialize, Serialize};

/// Filesystem grants: path prefixes relative to the application root.
///
/// A `read` entry authorizes reads within that tree; a `write` entry
/// authorizes reads and creates/writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsGrants {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

/// The immutable application manifest.
///
/// Created once at startup from the script's declaration. The serialized
/// form (used in `hull.sig`) is canonical: entries sorted and
/// deduplicated, so a fixed script always produces byte-identical output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub fs: FsGrants,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Validation failure for a manifest declaration.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Path entry empty, absolute, or containing a `..` segment.
    #[error("invalid manifest path {0:?}")]
    InvalidPath(String),

    /// Env entry is not a valid environment variable identifier.
    #[error("invalid manifest env name {0:?}")]
    InvalidEnvName(String),

    /// Host entry empty or carrying a scheme, port, or path.
    #[error("invalid manifest host {0:?}")]
    InvalidHost(String),
}

impl Manifest {
    /// Sort and deduplicate every entry set, lower-casing hosts.
    ///
    /// Called once at extraction time; the canonical form is what gets
    /// signed into `hull.sig`.
    pub fn normalize(&mut self) {
        for host in &mut self.hosts {
            *host = host.to_ascii_lowercase();
        }
        for set in [
            &mut self.fs.read,
            &mut self.fs.write,
            &mut self.env,
            &mut self.hosts,
        ] {
            set.sort();
            set.dedup();
        }
    }

    /// Check the three declaration invariants.
    ///
    /// Paths: non-empty, relative, no `..` segment. Env names: valid
    /// identifiers. Hosts: non-empty bare hostnames (no scheme, no port,
    /// no path).
    pub fn validate(&self) -> Result<(), ManifestError> {
        for path in self.fs.read.iter().chain(self.fs.write.iter()) {
            if path.is_empty()
                || path.starts_with('/')
                || path.split('/').any(|seg| seg == "..")
            {
                return Err(ManifestError::InvalidPath(path.clone()));
            }
        }
        for name in &self.env {
            if !is_env_identifier(name) {
                return Err(ManifestError::InvalidEnvName(name.clone()));
            }
        }
        for host in &self.hosts {
            if host.is_empty() || host.contains("://") || host.contains(['/', ':', ' ']) {
                return Err(ManifestError::InvalidHost(host.clone()));
            }
        }
        Ok(())
    }

    /// True if `path` (a validated relative path) falls under a read or
    /// write grant.
    pub fn allows_read(&self, path: &str) -> bool {
        self.fs.read.iter().chain(self.fs.write.iter()).any(|p| prefix_matches(p, path))
    }

    /// True if `path` falls under a write grant.
    pub fn allows_write(&self, path: &str) -> bool {
        self.fs.write.iter().any(|p| prefix_matches(p, path))
    }

    /// True if the env allowlist contains `name`.
    pub fn allows_env(&self, name: &str) -> bool {
        self.env.iter().any(|n| n == name)
    }

    /// True if the host allowlist contains `host` (case-insensitive).
    pub fn allows_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// True if any filesystem grant exists at all.
    pub fn has_fs(&self) -> bool {
        !self.fs.read.is_empty() || !self.fs.write.is_empty()
    }

    /// True if any host grant exists at all.
    pub fn has_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }
}

/// Env names follow the usual identifier rule: `[A-Za-z_][A-Za-z0-9_]*`.
fn is_env_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Prefix containment: `entry` authorizes itself and everything below it.
fn prefix_matches(entry: &str, path: &str) -> bool {
    let entry = entry.trim_end_matches('/');
    if entry.is_empty() {
        return false;
    }
    path == entry || (path.len() > entry.len() && path.starts_with(entry) && path.as_bytes()[entry.len()] == b'/')
}
