//! Capability-layer error taxonomy.
//!
//! `CapError` is the failure type returned by every capability function.
//! The interpreter hosts convert it into a script-visible runtime error;
//! capability code never panics. Startup-only failures (signature
//! mismatch, fatal init) live in the server binary — nothing below the
//! binary can recover from them.

/// Error returned by capability functions.
///
/// Each variant corresponds to one row of the failure taxonomy. The
/// message is what the script sees; it never carries host paths outside
/// the application root or other ambient detail.
#[derive(Debug, thiserror::Error)]
pub enum CapError {
    /// Malformed input from the script: empty name, out-of-range size,
    /// unsupported parameter type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The manifest does not authorize this specific target (path outside
    /// an allowed prefix, host not in the allowlist).
    #[error("denied: {0}")]
    Denied(String),

    /// The script invoked a capability for which no manifest entry exists
    /// at all.
    #[error("manifest violation: {0}")]
    ManifestViolation(String),

    /// Underlying read/write/open/socket failure. Partial writes are
    /// reported as this, never as success.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage-engine failure, carrying the engine's message.
    #[error("db error: {0}")]
    Db(String),

    /// A per-request resource budget was exhausted.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl CapError {
    /// Create a `Denied` error.
    pub fn denied(msg: impl Into<String>) -> Self {
        Self::Denied(msg.into())
    }

    /// Create an `InvalidArgument` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a `ManifestViolation` error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::ManifestViolation(msg.into())
    }

    /// Returns true for `Denied`.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    /// Returns true for `Denied` or `ManifestViolation` — the two kinds a
    /// sandbox-escape test must observe.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Denied(_) | Self::ManifestViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_message() {
        let err = CapError::denied("path escapes root");
        assert_eq!(err.to_string(), "denied: path escapes root");

        let err = CapError::Db("no such table: t".into());
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn test_refusal_predicate() {
        assert!(CapError::denied("x").is_refusal());
        assert!(CapError::manifest("x").is_refusal());
        assert!(!CapError::invalid("x").is_refusal());
        assert!(!CapError::Db("x".into()).is_refusal());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CapError = io.into();
        assert!(matches!(err, CapError::Io(_)));
    }
}
