//! `hull-capability` — the sole mediator between interpreted code and the
//! operating system.
//!
//! One type per subsystem, one method per verb. Every argument is
//! validated before any OS call; every output is bounded. Capability
//! functions never panic — they return `CapError`, which the interpreter
//! hosts convert into script-visible runtime errors.
//!
//! The manifest-dependent capabilities (`fs`, `http`, `env`) take the
//! manifest per call rather than owning it: the manifest only exists
//! after the script's top-level code has run, but the capability objects
//! are bound into the interpreter before that. Until extraction seals a
//! manifest, callers pass the empty (deny-all) manifest.

pub mod clock;
pub mod db;
pub mod env;
pub mod fs;
pub mod http;
pub mod paths;
pub mod sandbox;

pub use db::Db;
pub use env::EnvCapability;
pub use fs::FsCapability;
pub use http::{HttpCapability, HttpConfig, HttpResponse};
pub use sandbox::SandboxPolicy;
