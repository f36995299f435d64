//! Where the application finds its settings.
//!
//! The NVD API key is optional. It is read from the `CVEWATCH_NVD_API_KEY`
//! environment variable, then from the `nvd_api_key` field of
//! `~/.cvewatch/config.yml`. The same directory holds the watch state.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::Deserialize;
use thiserror::Error;

/// The environment variable holding the API key.
pub const API_KEY_ENV: &str = "CVEWATCH_NVD_API_KEY";
/// The name of the configuration file, in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";
/// The name of the configuration directory, in the home directory.
const CONFIG_DIR_NAME: &str = ".cvewatch";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to find the home directory")]
    NoHomeDirectory,
}

/// The directory holding the configuration file and the watch state.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .ok_or(ConfigError::NoHomeDirectory)
}

/// The content of the configuration file. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    nvd_api_key: Option<String>,
}

/// A place where the API key may be found.
#[derive(Clone, Debug, PartialEq)]
pub enum CredentialSource {
    /// An environment variable.
    Env(String),
    /// The `nvd_api_key` field of a YAML file.
    YamlFile(PathBuf),
}

impl CredentialSource {
    /// Reads the key from this source. An empty value is no value.
    pub fn read(&self) -> Option<String> {
        trace!("Running CredentialSource::read()");
        let value = match self {
            CredentialSource::Env(name) => env::var(name).ok(),
            CredentialSource::YamlFile(path) => read_yaml_key(path),
        };
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

fn read_yaml_key(path: &Path) -> Option<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Unable to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_yaml::from_str::<Option<ConfigFile>>(&content) {
        Ok(config) => config.unwrap_or_default().nvd_api_key,
        Err(e) => {
            debug!("Ignoring {}, invalid YAML: {}", path.display(), e);
            None
        }
    }
}

/// The sources of the API key, by priority. Without a configuration
/// directory only the environment is read.
pub fn default_sources(config_dir: Option<&Path>) -> Vec<CredentialSource> {
    let mut sources = vec![CredentialSource::Env(API_KEY_ENV.to_string())];
    if let Some(dir) = config_dir {
        sources.push(CredentialSource::YamlFile(dir.join(CONFIG_FILE_NAME)));
    }
    sources
}

/// The first key found in the sources.
pub fn resolve_api_key(sources: &[CredentialSource]) -> Option<String> {
    sources.iter().find_map(|source| {
        let key = source.read();
        if key.is_some() {
            debug!("API key found in {:?}", source);
        }
        key
    })
}

/// The settings the application runs with.
#[derive(Debug)]
pub struct Settings {
    pub api_key: Option<String>,
    /// Missing when the home directory can't be found.
    pub config_dir: Option<PathBuf>,
}

impl Settings {
    /// Resolves the settings from the environment and the configuration
    /// file of the home directory.
    ///
    /// A missing home directory isn't an error yet: a search doesn't need
    /// it, only the watch state does.
    pub fn from_environment() -> Self {
        trace!("Running Settings::from_environment()");
        let config_dir = match config_dir() {
            Ok(dir) => Some(dir),
            Err(e) => {
                debug!("{}, only the environment is read", e);
                None
            }
        };
        Self::from_config_dir(config_dir)
    }

    /// Resolves the settings with the given configuration directory.
    pub fn from_config_dir(config_dir: Option<PathBuf>) -> Self {
        let api_key = resolve_api_key(&default_sources(config_dir.as_deref()));
        if api_key.is_none() {
            debug!("No API key, the NVD rate limits will be lower");
        }
        Self {
            api_key,
            config_dir,
        }
    }

    /// The directory holding the watch state.
    pub fn state_dir(&self) -> Result<&Path, ConfigError> {
        self.config_dir
            .as_deref()
            .ok_or(ConfigError::NoHomeDirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("cvewatch-config-{}", rand::random::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn key_from_yaml() {
        let dir = temp_dir();
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, "nvd_api_key: \"abc-123\"\nother: 1\n").unwrap();
        assert_eq!(
            CredentialSource::YamlFile(path).read(),
            Some("abc-123".to_string())
        );
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unusable_yaml_files() {
        let dir = temp_dir();
        let missing = CredentialSource::YamlFile(dir.join("missing.yml"));
        assert_eq!(missing.read(), None);

        let invalid = dir.join("invalid.yml");
        fs::write(&invalid, "nvd_api_key: [unclosed").unwrap();
        assert_eq!(CredentialSource::YamlFile(invalid).read(), None);

        let empty_key = dir.join("empty.yml");
        fs::write(&empty_key, "nvd_api_key: \"\"\n").unwrap();
        assert_eq!(CredentialSource::YamlFile(empty_key).read(), None);

        let empty_file = dir.join("blank.yml");
        fs::write(&empty_file, "").unwrap();
        assert_eq!(CredentialSource::YamlFile(empty_file).read(), None);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn environment_comes_first() {
        let dir = temp_dir();
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, "nvd_api_key: from-file\n").unwrap();
        let name = format!("CVEWATCH_TEST_KEY_{}", rand::random::<u32>());
        let sources = vec![
            CredentialSource::Env(name.clone()),
            CredentialSource::YamlFile(path),
        ];

        assert_eq!(resolve_api_key(&sources), Some("from-file".to_string()));
        env::set_var(&name, "from-env");
        assert_eq!(resolve_api_key(&sources), Some("from-env".to_string()));
        env::set_var(&name, "  ");
        assert_eq!(resolve_api_key(&sources), Some("from-file".to_string()));
        env::remove_var(&name);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn no_home_directory() {
        assert_eq!(
            default_sources(None),
            vec![CredentialSource::Env(API_KEY_ENV.to_string())]
        );
        let settings = Settings::from_config_dir(None);
        assert!(matches!(
            settings.state_dir(),
            Err(ConfigError::NoHomeDirectory)
        ));
    }

    #[test]
    fn state_dir_is_the_config_dir() {
        let dir = temp_dir();
        let settings = Settings::from_config_dir(Some(dir.clone()));
        assert_eq!(settings.state_dir().unwrap(), dir.as_path());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn sources_order() {
        let sources = default_sources(Some(Path::new("/home/user/.cvewatch")));
        assert_eq!(
            sources,
            vec![
                CredentialSource::Env(API_KEY_ENV.to_string()),
                CredentialSource::YamlFile(PathBuf::from("/home/user/.cvewatch/config.yml")),
            ]
        );
    }
}
