//! Global settings
//!
//! Administrator-level state shared by every run: the mandatory exclusion
//! masks and the tool installations. Settings live in a YAML file with an
//! explicit load/save lifecycle. A pipeline never reads this file itself; it
//! receives a [`MandatoryExclusionSet`] by value when it is constructed.

use crate::result::{CovpipeError, CovpipeResult};
use crate::tools::{ToolInstallation, ToolKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing at an alternate settings file
pub const SETTINGS_ENV: &str = "COVPIPE_SETTINGS";

/// Settings file name inside the platform config directory
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

/// Module masks excluded from every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MandatoryExclusionSet(Option<String>);

impl MandatoryExclusionSet {
    /// Wrap a `;`-separated mask list
    #[must_use]
    pub fn new(masks: Option<String>) -> Self {
        Self(masks)
    }

    /// The raw mask list
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Whether no mask is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.as_deref().map_or(true, |m| m.trim().is_empty())
    }
}

impl From<&str> for MandatoryExclusionSet {
    fn from(value: &str) -> Self {
        Self(Some(value.to_string()))
    }
}

/// Persisted global settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalSettings {
    /// Masks appended to every run's exclude filter
    pub mandatory_excluded_assemblies: MandatoryExclusionSet,
    /// Coverage tool installations
    pub coverage_tools: Vec<ToolInstallation>,
    /// Test runner installations
    pub test_runners: Vec<ToolInstallation>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            mandatory_excluded_assemblies: MandatoryExclusionSet::default(),
            coverage_tools: vec![ToolInstallation::default_for(ToolKind::CoverageTool)],
            test_runners: vec![ToolInstallation::default_for(ToolKind::TestRunner)],
        }
    }
}

impl GlobalSettings {
    /// Snapshot of the mandatory exclusions for one run
    #[must_use]
    pub fn mandatory_exclusions(&self) -> MandatoryExclusionSet {
        self.mandatory_excluded_assemblies.clone()
    }

    /// Add or replace an installation
    pub fn set_installation(&mut self, kind: ToolKind, installation: ToolInstallation) {
        let list = match kind {
            ToolKind::CoverageTool => &mut self.coverage_tools,
            ToolKind::TestRunner => &mut self.test_runners,
        };
        match list.iter_mut().find(|i| i.name == installation.name) {
            Some(existing) => *existing = installation,
            None => list.push(installation),
        }
    }
}

/// Location of the settings file and its load/save operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store backed by an explicit file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location: `COVPIPE_SETTINGS`, then the platform
    /// config directory
    pub fn locate() -> CovpipeResult<Self> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::new(path));
        }
        Self::default_path().map(Self::new).ok_or_else(|| {
            CovpipeError::config(format!(
                "no config directory on this platform; set {SETTINGS_ENV}"
            ))
        })
    }

    /// `<config dir>/covpipe/settings.yaml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("covpipe").join(SETTINGS_FILE_NAME))
    }

    /// Settings file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields the defaults
    pub fn load(&self) -> CovpipeResult<GlobalSettings> {
        let yaml = match std::fs::read_to_string(&self.path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "settings file absent, using defaults");
                return Ok(GlobalSettings::default());
            }
            Err(e) => return Err(e.into()),
        };
        if yaml.trim().is_empty() {
            return Ok(GlobalSettings::default());
        }
        serde_yaml_ng::from_str(&yaml).map_err(|e| CovpipeError::Settings {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Persist settings, creating the parent directory
    pub fn save(&self, settings: &GlobalSettings) -> CovpipeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml_ng::to_string(settings)?;
        std::fs::write(&self.path, yaml)?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    mod exclusion_tests {
        use super::*;

        #[test]
        fn test_empty_variants() {
            assert!(MandatoryExclusionSet::default().is_empty());
            assert!(MandatoryExclusionSet::from("  ").is_empty());
            assert!(!MandatoryExclusionSet::from("*Tests*").is_empty());
        }

        #[test]
        fn test_as_deref() {
            let set = MandatoryExclusionSet::from("A;B");
            assert_eq!(set.as_deref(), Some("A;B"));
        }
    }

    mod store_tests {
        use super::*;

        #[test]
        fn test_missing_file_gives_defaults() {
            let temp = TempDir::new().unwrap();
            let store = SettingsStore::new(temp.path().join("absent.yaml"));
            let settings = store.load().unwrap();
            assert_eq!(settings, GlobalSettings::default());
            assert_eq!(settings.coverage_tools[0].home, "dotcover.exe");
            assert_eq!(settings.test_runners[0].name, "Default");
        }

        #[test]
        fn test_save_then_load() {
            let temp = TempDir::new().unwrap();
            let store = SettingsStore::new(temp.path().join("nested").join("settings.yaml"));
            let mut settings = GlobalSettings::default();
            settings.mandatory_excluded_assemblies = MandatoryExclusionSet::from("*Tests*;Moq");
            settings.set_installation(
                ToolKind::CoverageTool,
                ToolInstallation::new("Default", "C:/jb/dotcover.exe"),
            );
            store.save(&settings).unwrap();

            let loaded = store.load().unwrap();
            assert_eq!(loaded, settings);
            assert_eq!(loaded.coverage_tools.len(), 1);
        }

        #[test]
        fn test_partial_file_fills_defaults() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("settings.yaml");
            std::fs::write(&path, "mandatory_excluded_assemblies: 'FluentAssertions'\n").unwrap();
            let loaded = SettingsStore::new(&path).load().unwrap();
            assert_eq!(
                loaded.mandatory_exclusions().as_deref(),
                Some("FluentAssertions")
            );
            assert_eq!(loaded.test_runners[0].home, "vstest.console.exe");
        }

        #[test]
        fn test_malformed_file_is_settings_error() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("settings.yaml");
            std::fs::write(&path, "unknown_key: 1\n").unwrap();
            let err = SettingsStore::new(&path).load().unwrap_err();
            assert!(matches!(err, CovpipeError::Settings { .. }));
        }

        #[test]
        fn test_set_installation_appends_new_names() {
            let mut settings = GlobalSettings::default();
            settings.set_installation(
                ToolKind::TestRunner,
                ToolInstallation::new("VS2022", "vs.exe"),
            );
            assert_eq!(settings.test_runners.len(), 2);
        }
    }
}
