//! `hull-server` — the CLI, signed-bundle tooling, interpreter worker,
//! and axum front end behind the `hull` binary.

pub mod bundle;
pub mod cli;
pub mod error;
pub mod serve;
pub mod worker;

pub use error::StartupError;
