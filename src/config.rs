use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::model::PreferenceSet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Root directory scanned recursively for the image catalog.
    pub photo_library_path: PathBuf,
    /// Owner whose records the slideshow displays.
    pub owner: String,
    /// Optional YAML file with live-reloaded display preferences. When
    /// absent, `preferences` below applies for the whole run.
    pub settings_path: Option<PathBuf>,
    /// Fallback display preferences.
    pub preferences: PreferenceSet,
    /// Maximum number of concurrent image dimension probes.
    pub max_concurrent_probes: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_library_path: PathBuf::new(),
            owner: "local".to_owned(),
            settings_path: None,
            preferences: PreferenceSet::default(),
            max_concurrent_probes: 4,
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&raw).context("parsing configuration YAML")
    }

    /// Validate runtime invariants that cannot be expressed via serde
    /// defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_path.as_os_str().is_empty(),
            "photo-library-path must be set"
        );
        ensure!(!self.owner.is_empty(), "owner must not be empty");
        ensure!(
            self.max_concurrent_probes > 0,
            "max-concurrent-probes must be greater than zero"
        );
        ensure!(
            self.preferences.interval > Duration::ZERO,
            "preferences.interval must be positive"
        );
        Ok(self)
    }
}
