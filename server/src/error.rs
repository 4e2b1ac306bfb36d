//! Startup-only failures. Both kinds are fatal: the process exits
//! non-zero before any script runs.

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// `hull.sig` missing, tampered, or signed with the wrong key.
    /// Raised before the interpreter loads anything.
    #[error("signature verification failed: {0}")]
    SignatureMismatch(String),

    /// Interpreter init failure, unreadable application, storage engine
    /// cannot open, bind failure.
    #[error("{0}")]
    Fatal(String),
}

impl StartupError {
    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }

    pub fn sig(msg: impl std::fmt::Display) -> Self {
        Self::SignatureMismatch(msg.to_string())
    }
}

impl From<hull_runtime::RuntimeError> for StartupError {
    fn from(e: hull_runtime::RuntimeError) -> Self {
        Self::Fatal(e.to_string())
    }
}

impl From<std::io::Error> for StartupError {
    fn from(e: std::io::Error) -> Self {
        Self::Fatal(e.to_string())
    }
}
