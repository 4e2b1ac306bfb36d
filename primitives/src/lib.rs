//! `hull-primitives` — foundational types for the Hull application platform.
//!
//! This crate provides the types shared by the capability layer, the two
//! interpreter hosts, and the server binary:
//!
//! - `Value` / `Column` — the tagged sum crossing the capability boundary
//! - `Manifest` — the declarative side-effect contract
//! - `CapError` — the capability-layer error taxonomy
//! - `crypto` — hashing, KDFs, Ed25519, authenticated encryption

pub mod crypto;
pub mod error;
pub mod manifest;
pub mod value;

// Re-export commonly used types at the crate root for convenience.
pub use error::CapError;
pub use manifest::{Manifest, ManifestError};
pub use value::{Column, Value};
