//! Configuration module for converge
//!
//! Handles loading and merging configuration from multiple sources, lowest
//! precedence first:
//! - Default values
//! - System configuration (/etc/converge/converge.toml)
//! - User configuration (`<config dir>/converge/converge.toml`)
//! - Project configuration (./converge.toml)
//! - Environment variables (`CONVERGE_*`)
//!
//! Command-line flags are applied on top by the CLI. Files may be TOML,
//! YAML or JSON, chosen by extension.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FILE_STEM: &str = "converge";
const EXTENSIONS: &[&str] = &["toml", "yml", "yaml", "json"];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub vault: VaultConfig,
    pub logging: LoggingConfig,
}

/// Default run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Default inventory path
    pub inventory: Option<PathBuf>,

    /// Default number of forks (parallel hosts)
    pub forks: usize,

    /// Directories searched for roles
    pub roles_path: Vec<PathBuf>,

    /// Stop loops at the first failed item
    pub fail_fast_loops: bool,

    /// Cancel runs after this many seconds
    pub run_timeout: Option<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            inventory: None,
            forks: 5,
            roles_path: Vec::new(),
            fail_fast_loops: false,
            run_timeout: None,
        }
    }
}

/// Vault settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// File holding the vault passphrase
    pub password_file: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when neither `-v` nor `RUST_LOG` is given
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::config_paths(config_path) {
            if path.exists() {
                config = config.merge(Self::from_file(&path)?);
            } else if config_path == Some(path.as_path()) {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Candidate configuration files, lowest precedence first
    fn config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }
        if let Ok(path) = std::env::var("CONVERGE_CONFIG") {
            return vec![PathBuf::from(path)];
        }

        let mut search = vec![PathBuf::from("/etc").join(FILE_STEM)];
        if let Some(config_dir) = dirs::config_dir() {
            search.push(config_dir.join(FILE_STEM));
        }
        search.push(PathBuf::from("."));

        search
            .iter()
            .flat_map(|dir| {
                EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{}.{}", FILE_STEM, ext)))
            })
            .collect()
    }

    /// Load a single configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let parsed: Result<Config> = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content).map_err(anyhow::Error::from),
            "json" => serde_json::from_str(&content).map_err(anyhow::Error::from),
            _ => toml::from_str(&content).map_err(anyhow::Error::from),
        };
        parsed.with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Merge another config into this one; the other's non-default values win
    fn merge(self, other: Config) -> Config {
        let defaults = Defaults::default();
        Config {
            defaults: Defaults {
                inventory: other.defaults.inventory.or(self.defaults.inventory),
                forks: if other.defaults.forks != defaults.forks {
                    other.defaults.forks
                } else {
                    self.defaults.forks
                },
                roles_path: if other.defaults.roles_path.is_empty() {
                    self.defaults.roles_path
                } else {
                    other.defaults.roles_path
                },
                fail_fast_loops: other.defaults.fail_fast_loops || self.defaults.fail_fast_loops,
                run_timeout: other.defaults.run_timeout.or(self.defaults.run_timeout),
            },
            vault: VaultConfig {
                password_file: other.vault.password_file.or(self.vault.password_file),
            },
            logging: if other.logging != LoggingConfig::default() {
                other.logging
            } else {
                self.logging
            },
        }
    }

    /// Apply `CONVERGE_*` environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(inventory) = std::env::var("CONVERGE_INVENTORY") {
            self.defaults.inventory = Some(PathBuf::from(inventory));
        }

        if let Ok(forks) = std::env::var("CONVERGE_FORKS") {
            self.defaults.forks = forks
                .parse()
                .with_context(|| format!("CONVERGE_FORKS is not a number: {}", forks))?;
        }

        if let Ok(paths) = std::env::var("CONVERGE_ROLES_PATH") {
            self.defaults.roles_path = std::env::split_paths(&paths).collect();
        }

        if let Ok(flag) = std::env::var("CONVERGE_FAIL_FAST_LOOPS") {
            self.defaults.fail_fast_loops = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        if let Ok(timeout) = std::env::var("CONVERGE_RUN_TIMEOUT") {
            self.defaults.run_timeout = Some(
                timeout
                    .parse()
                    .with_context(|| format!("CONVERGE_RUN_TIMEOUT is not a number: {}", timeout))?,
            );
        }

        if let Ok(file) = std::env::var("CONVERGE_VAULT_PASSWORD_FILE") {
            self.vault.password_file = Some(PathBuf::from(file));
        }

        if let Ok(format) = std::env::var("CONVERGE_LOG_FORMAT") {
            self.logging.format = match format.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }

        Ok(())
    }
}
