//! Registry configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, Result};

/// Directory (under the data directory) holding one file per definition.
pub const DEFINITIONS_DIR: &str = "definitions";

/// Default bound for acquiring the administration role of the indexing gate.
pub const DEFAULT_ADMINISTRATION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root directory; definition files live in `<data_directory>/definitions`.
    pub data_directory: PathBuf,
    /// Keep everything in memory: no directory, no files, no listings.
    pub run_in_memory: bool,
    pub administration_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            run_in_memory: false,
            administration_timeout_ms: DEFAULT_ADMINISTRATION_TIMEOUT_MS,
        }
    }
}

impl RegistryConfig {
    pub fn in_memory() -> Self {
        Self {
            run_in_memory: true,
            ..Self::default()
        }
    }

    pub fn durable(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            ..Self::default()
        }
    }

    pub fn with_administration_timeout(mut self, timeout: Duration) -> Self {
        self.administration_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(error) => return Err(DefinitionError::persistence(path, error)),
        };
        serde_json::from_str(&data).map_err(|error| {
            DefinitionError::Serialization(format!(
                "failed to parse registry config {}: {error}",
                path.display()
            ))
        })
    }

    pub fn definitions_path(&self) -> PathBuf {
        self.data_directory.join(DEFINITIONS_DIR)
    }

    pub fn administration_timeout(&self) -> Duration {
        Duration::from_millis(self.administration_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = RegistryConfig::load(&dir.path().join("registry.json")).expect("load");
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.administration_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"{ "run_in_memory": true }"#).expect("write");

        let config = RegistryConfig::load(&path).expect("load");
        assert!(config.run_in_memory);
        assert_eq!(
            config.administration_timeout_ms,
            DEFAULT_ADMINISTRATION_TIMEOUT_MS
        );
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").expect("write");

        let err = RegistryConfig::load(&path).expect_err("malformed");
        match err {
            DefinitionError::Serialization(_) => {}
            other => panic!("expected serialization error, got {other:?}"),
        }
    }
}
