//! Settings providers. The supervisor polls these at every (re)connect, so a
//! file edited while the listener runs takes effect on the next attempt.

use crate::error::ConfigError;
use gln_core::{SettingsProvider, UserFilterConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSettings {
    endpoint: String,
    filters: UserFilterConfig,
}

impl StaticSettings {
    pub fn new(endpoint: impl Into<String>, filters: UserFilterConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            filters,
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn filters(&self) -> UserFilterConfig {
        self.filters.clone()
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// On-disk settings. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub ignore_project: Option<String>,
}

/// Values given on the command line or through the environment. A `Some`
/// wins over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub endpoint: Option<String>,
    pub namespace: Option<String>,
    pub ignore_project: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
    overrides: SettingsOverrides,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>, overrides: SettingsOverrides) -> Self {
        Self {
            path: path.into(),
            overrides,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file. A missing file is not an error and yields no values.
    pub fn load(&self) -> Result<SettingsFile, ConfigError> {
        load_settings_file(&self.path)
    }

    /// File values with overrides applied. An unreadable file is logged and
    /// treated as empty so a typo never stops reconnection.
    pub fn resolve(&self) -> SettingsFile {
        let file = match self.load() {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    event = "settings_read_failed",
                    path = %self.path.display(),
                    error = %err
                );
                SettingsFile::default()
            }
        };
        SettingsFile {
            endpoint: pick(&self.overrides.endpoint, file.endpoint),
            namespace: pick(&self.overrides.namespace, file.namespace),
            ignore_project: pick(&self.overrides.ignore_project, file.ignore_project),
        }
    }
}

impl SettingsProvider for FileSettings {
    fn filters(&self) -> UserFilterConfig {
        let resolved = self.resolve();
        UserFilterConfig {
            namespace: resolved.namespace.unwrap_or_default(),
            ignore_project: resolved.ignore_project.unwrap_or_default(),
        }
    }

    fn endpoint(&self) -> String {
        self.resolve().endpoint.unwrap_or_default()
    }
}

fn pick(flag: &Option<String>, file: Option<String>) -> Option<String> {
    flag.clone().or(file)
}

pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::Settings(format!("{}: {err}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|err| ConfigError::Settings(format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).expect("write settings");
    }

    #[test]
    fn missing_file_yields_empty_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = FileSettings::new(dir.path().join("absent.toml"), SettingsOverrides::default());
        assert_eq!(settings.load(), Ok(SettingsFile::default()));
        assert_eq!(settings.endpoint(), "");
        assert_eq!(settings.filters(), UserFilterConfig::default());
    }

    #[test]
    fn file_is_reread_on_every_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        write(&path, "endpoint = \"ws://one.example:9000\"\nnamespace = \"acme\"\n");
        let settings = FileSettings::new(&path, SettingsOverrides::default());
        assert_eq!(settings.endpoint(), "ws://one.example:9000");
        assert_eq!(settings.filters().namespace, "acme");

        write(
            &path,
            "endpoint = \"ws://two.example:9000\"\nignore_project = \"sandbox\"\n",
        );
        assert_eq!(settings.endpoint(), "ws://two.example:9000");
        let filters = settings.filters();
        assert_eq!(filters.namespace, "");
        assert_eq!(filters.ignore_project, "sandbox");
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        write(&path, "endpoint = \"ws://file.example\"\nnamespace = \"acme\"\n");
        let settings = FileSettings::new(
            &path,
            SettingsOverrides {
                namespace: Some("globex".to_string()),
                ..SettingsOverrides::default()
            },
        );
        assert_eq!(settings.endpoint(), "ws://file.example");
        assert_eq!(settings.filters().namespace, "globex");
    }

    #[test]
    fn malformed_file_is_reported_by_load_and_ignored_by_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        write(&path, "endpoint = [unterminated");
        let settings = FileSettings::new(
            &path,
            SettingsOverrides {
                endpoint: Some("ws://flag.example".to_string()),
                ..SettingsOverrides::default()
            },
        );
        assert!(matches!(settings.load(), Err(ConfigError::Settings(_))));
        assert_eq!(settings.endpoint(), "ws://flag.example");
    }

    #[test]
    fn static_settings_return_fixed_values() {
        let settings = StaticSettings::new(
            "ws://localhost:8080",
            UserFilterConfig {
                namespace: "acme".to_string(),
                ignore_project: String::new(),
            },
        );
        assert_eq!(settings.endpoint(), "ws://localhost:8080");
        assert_eq!(settings.filters().namespace, "acme");
    }
}
