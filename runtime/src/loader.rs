//! Module-name rules shared by both interpreter hosts.
//!
//! Two module spaces exist: the builtin registry (`hull:<name>` in JS
//! import syntax, `hull.<name>` in Lua require syntax) and the
//! application's own files, addressed relative to the importing module.
//! Nothing else resolves.

use crate::error::RuntimeError;

/// Builtin module names both hosts expose.
pub const BUILTIN_MODULES: &[&str] = &["app", "db", "fs", "http", "env", "time", "crypto"];

/// Strip the builtin prefix, if `name` addresses the builtin registry.
///
/// Accepts `hull:db` (JS) and `hull.db` (Lua).
pub fn builtin_key(name: &str) -> Option<&str> {
    name.strip_prefix("hull:").or_else(|| name.strip_prefix("hull."))
}

/// True when `name` addresses a registered builtin.
pub fn is_builtin(name: &str) -> bool {
    matches!(builtin_key(name), Some(key) if BUILTIN_MODULES.contains(&key))
}

/// Resolve a relative import against the importing module's directory.
///
/// `base_dir` is the app-root-relative directory of the importer (`""`
/// for the entry point). `name` must start with `./` or `../`. The
/// result is a normalized app-root-relative path; anything that escapes
/// the application root is rejected.
pub fn resolve_relative(base_dir: &str, name: &str) -> Result<String, RuntimeError> {
    if !(name.starts_with("./") || name.starts_with("../")) {
        return Err(RuntimeError::ModuleNotFound(name.to_string()));
    }

    let mut segs: Vec<&str> = Vec::new();
    for seg in base_dir.split('/').chain(name.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                if segs.pop().is_none() {
                    return Err(RuntimeError::ModuleNotFound(format!(
                        "{name} escapes the application root"
                    )));
                }
            }
            _ => segs.push(seg),
        }
    }
    if segs.is_empty() {
        return Err(RuntimeError::ModuleNotFound(name.to_string()));
    }
    Ok(segs.join("/"))
}

/// Directory part of an app-root-relative module name (`""` for the
/// entry point).
pub fn module_dir(module_name: &str) -> &str {
    match module_name.rfind('/') {
        Some(i) => &module_name[..i],
        None => "",
    }
}
