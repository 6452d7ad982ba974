//! Configuration loading and types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HOSTFACTS_CONFIG";

/// Top-level configuration, read from `hostfacts.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
    /// Fact source settings
    #[serde(default)]
    pub facts: FactsConfig,
    /// Guest engine settings
    #[serde(default)]
    pub guest: GuestConfig,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (hash, json, yaml)
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

/// Fact source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsConfig {
    /// External fact directories; the default locations when empty
    #[serde(default)]
    pub external_dirs: Vec<PathBuf>,
    /// Whether `FACT_<name>` environment variables become facts
    #[serde(default = "default_true")]
    pub environment: bool,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            external_dirs: Vec::new(),
            environment: true,
        }
    }
}

/// Guest engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Whether custom facts are resolved through the guest engine
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit engine library to load
    #[serde(default)]
    pub library: Option<PathBuf>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            library: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_format() -> String {
    "hash".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Find the configuration file to use
    ///
    /// An explicit path wins, then `HOSTFACTS_CONFIG`, then the first of the
    /// common locations that exists.
    #[must_use]
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let mut paths = vec![
            PathBuf::from("hostfacts.toml"),
            PathBuf::from("/etc/hostfacts/hostfacts.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("hostfacts/hostfacts.toml"));
        }

        paths.into_iter().find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.output.format, "hash");
        assert!(config.facts.environment);
        assert!(config.facts.external_dirs.is_empty());
        assert!(config.guest.enabled);
        assert!(config.guest.library.is_none());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [output]
            format = "json"

            [guest]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.output.format, "json");
        assert!(!config.guest.enabled);
        assert_eq!(config.log.level, "warn");
        assert!(config.facts.environment);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostfacts.toml");
        std::fs::write(
            &path,
            "[facts]\nexternal_dirs = [\"/srv/facts\"]\nenvironment = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.facts.external_dirs, vec![PathBuf::from("/srv/facts")]);
        assert!(!config.facts.environment);
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(Config::locate(Some(path)), Some(path.to_path_buf()));
    }
}
