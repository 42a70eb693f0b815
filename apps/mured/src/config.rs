//! # Configuration
//!
//! Optional `mured.toml`:
//!
//! ```toml
//! [limits]
//! max_depth = 100
//! max_width = 1024
//! allow_floats = false
//!
//! [run]
//! max_steps = 1000
//!
//! [seed]
//! required_ids = []
//! pinned_checksum = "..."
//! ```
//!
//! Lookup order: `--config <path>`, then `MURED_CONFIG`, then `./mured.toml`.
//! An explicitly named file must exist; the default location may be absent.
//! Every section and key is optional. Unknown keys are rejected.

use mured_core::MuredError;
use mured_core::primitives::DEFAULT_MAX_STEPS;
use mured_core::{Limits, SeedLoader};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "MURED_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mured.toml";

/// Settings for `run`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub max_steps: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Extra checks applied to every seed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedConfig {
    pub required_ids: Vec<String>,
    pub pinned_checksum: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuredConfig {
    pub limits: Limits,
    pub run: RunConfig,
    pub seed: SeedConfig,
}

impl MuredConfig {
    /// Parse configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, MuredError> {
        toml::from_str(text).map_err(|e| MuredError::ConfigError(e.to_string()))
    }

    /// Resolve and load the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self, MuredError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match named {
            Some(path) => path,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    tracing::debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|err| {
            tracing::warn!("Failed to read config at {:?}: {}", path, err);
            MuredError::ConfigError(format!("{}: {}", path.display(), err))
        })?;

        let config = Self::from_toml_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, err);
            err
        })?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// A seed loader carrying these limits and seed checks.
    pub fn seed_loader(&self) -> SeedLoader {
        let loader = SeedLoader::new()
            .with_limits(self.limits)
            .require_ids(self.seed.required_ids.iter().cloned());
        match &self.seed.pinned_checksum {
            Some(checksum) => loader.pin_checksum(checksum.clone()),
            None => loader,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = MuredConfig::from_toml_str("").expect("parse");
        assert_eq!(config, MuredConfig::default());
        assert_eq!(config.run.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn partial_sections() {
        let config = MuredConfig::from_toml_str(
            r#"
            [limits]
            max_depth = 12

            [seed]
            pinned_checksum = "abc"
            "#,
        )
        .expect("parse");
        assert_eq!(config.limits.max_depth, 12);
        assert_eq!(config.limits.max_width, Limits::default().max_width);
        assert_eq!(config.seed.pinned_checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(matches!(
            MuredConfig::from_toml_str("[run]\nmax_step = 3\n"),
            Err(MuredError::ConfigError(_))
        ));
        assert!(MuredConfig::from_toml_str("[extra]\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(MuredConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mured.toml");
        std::fs::write(&path, "[run]\nmax_steps = 7\n").expect("write");
        let config = MuredConfig::load(Some(&path)).expect("load");
        assert_eq!(config.run.max_steps, 7);
        assert_eq!(config.seed_loader().limits(), &config.limits);
    }
}
