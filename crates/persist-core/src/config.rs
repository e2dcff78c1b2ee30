use std::path::{Path, PathBuf};

use persist_verify::VerifyConfig;
use serde::{Deserialize, Serialize};

use crate::error::PersistResult;

/// Persister configuration, usually read from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersisterConfig {
    /// Directory of the disk store. `None` keeps everything in memory.
    pub cache_dir: Option<PathBuf>,
    pub verify: VerifyConfig,
    /// Finish queued collection and delivery work on shutdown.
    pub drain_on_shutdown: bool,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            verify: VerifyConfig::default(),
            drain_on_shutdown: true,
        }
    }
}

impl PersisterConfig {
    /// In-memory configuration with default rules.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> PersistResult<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> PersistResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = PersisterConfig::default();
        assert!(c.cache_dir.is_none());
        assert!(c.drain_on_shutdown);
        assert_eq!(c.verify, VerifyConfig::default());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(
            PersisterConfig::from_toml_str("").unwrap(),
            PersisterConfig::default()
        );
    }

    #[test]
    fn toml_overrides() {
        let c = PersisterConfig::from_toml_str(
            r#"
            cache_dir = "/var/cache/persister"
            drain_on_shutdown = false

            [verify]
            strict_first_frame = true
            "#,
        )
        .unwrap();
        assert_eq!(c.cache_dir, Some(PathBuf::from("/var/cache/persister")));
        assert!(!c.drain_on_shutdown);
        assert!(c.verify.strict_first_frame);
        assert!(!c.verify.require_known_debinding_target);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = PersisterConfig::from_toml_str("drain_on_shutdown = 3").unwrap_err();
        assert!(matches!(err, crate::PersistError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persister.toml");
        std::fs::write(&path, "[verify]\nrequire_known_debinding_target = true\n").unwrap();
        let c = PersisterConfig::load(&path).unwrap();
        assert!(c.verify.require_known_debinding_target);
    }
}
