//! `hull-runtime` — the two embedded interpreter hosts and the request
//! dispatch core.
//!
//! Each host wraps one engine (Lua 5.4 via `mlua`, QuickJS via
//! `rquickjs`) behind the same `AppRuntime` contract: capability
//! modules bound in, forbidden features removed, heap and stack capped,
//! an instruction-gas interrupt armed, and a per-request dispatch
//! sequence that marshals requests in and responses out.

pub mod arena;
pub mod config;
pub mod error;
pub mod gas;
pub mod host;
pub mod js;
pub mod loader;
pub mod lua;
pub mod request;
pub mod router;
pub mod traits;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use request::{RequestData, ResponseData};
pub use router::{MiddlewareDef, RouteDef};
pub use traits::{new_runtime, AppRuntime};
