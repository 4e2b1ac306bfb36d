//! Interpreter-host error types.

use hull_primitives::{CapError, ManifestError};

/// Top-level error type for the runtime crate.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Interpreter state could not be created or configured.
    #[error("interpreter init failed: {0}")]
    Init(String),

    /// The application entry point could not be read or evaluated.
    #[error("failed to load application: {0}")]
    Load(String),

    /// A script-level error (syntax error, uncaught exception, budget
    /// exhaustion) with the interpreter's own message/traceback.
    #[error("script error: {0}")]
    Script(String),

    /// An import could not be resolved within the allowed module space.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The extracted manifest failed validation.
    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    /// A capability failure escaping through host plumbing.
    #[error(transparent)]
    Cap(#[from] CapError),
}
