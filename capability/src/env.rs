//! Environment variable capability.
//!
//! Reads are allowlisted by the manifest. An undeclared or unset name
//! reads as absent — never as an empty string — so the script can tell
//! "unset" from "set to empty".

use hull_primitives::{CapError, Manifest};

/// The environment capability. Stateless; the allowlist lives in the
/// manifest passed per call.
#[derive(Debug, Clone, Default)]
pub struct EnvCapability;

impl EnvCapability {
    pub fn new() -> Self {
        Self
    }

    /// Read `name` from the process environment.
    ///
    /// Returns `None` when the name is not in the manifest's allowlist
    /// or the variable is unset.
    pub fn get(&self, manifest: &Manifest, name: &str) -> Result<Option<String>, CapError> {
        if name.is_empty() {
            return Err(CapError::invalid("env name is empty"));
        }
        if !manifest.allows_env(name) {
            return Ok(None);
        }
        Ok(std::env::var_os(name).map(|v| v.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(name: &str) -> Manifest {
        Manifest {
            env: vec![name.into()],
            ..Manifest::default()
        }
    }

    #[test]
    fn test_allowlisted_and_set() {
        std::env::set_var("HULL_TEST_ENV_A", "forty-two");
        let cap = EnvCapability::new();
        let m = manifest_with("HULL_TEST_ENV_A");
        assert_eq!(
            cap.get(&m, "HULL_TEST_ENV_A").unwrap(),
            Some("forty-two".to_string())
        );
    }

    #[test]
    fn test_undeclared_reads_as_absent() {
        std::env::set_var("HULL_TEST_ENV_B", "hidden");
        let cap = EnvCapability::new();
        let m = manifest_with("OTHER_NAME");
        assert_eq!(cap.get(&m, "HULL_TEST_ENV_B").unwrap(), None);
    }

    #[test]
    fn test_unset_is_absent_not_empty() {
        let cap = EnvCapability::new();
        let m = manifest_with("HULL_TEST_ENV_UNSET");
        assert_eq!(cap.get(&m, "HULL_TEST_ENV_UNSET").unwrap(), None);
    }

    #[test]
    fn test_empty_name_rejected() {
        let cap = EnvCapability::new();
        assert!(cap.get(&Manifest::default(), "").is_err());
    }
}
