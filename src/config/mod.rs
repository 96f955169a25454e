//! Project configuration management for `strobe.toml`.
//!
//! # Sections
//!
//! | Section       | Purpose                                            |
//! |---------------|----------------------------------------------------|
//! | `[serve]`     | Development server (port, ws port, watch, retries) |
//! | `[optimizer]` | Dependency pre-bundling (strategy, entries, cache) |

mod optimizer;
mod serve;

pub use optimizer::{DiscoveryStrategy, OptimizerConfig};
pub use serve::ServeConfig;

use crate::cli::Cli;
use crate::utils::normalize_path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::{env, fs};

// ============================================================================
// Root configuration
// ============================================================================

/// Root configuration structure representing strobe.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrobeConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Development server settings
    pub serve: ServeConfig,

    /// Dependency optimizer settings
    pub optimizer: OptimizerConfig,
}

impl Default for StrobeConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            root: PathBuf::new(),
            serve: ServeConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl StrobeConfig {
    /// Load configuration from CLI arguments.
    ///
    /// Searches upward from cwd for the config file; the project root is the
    /// config file's parent directory. A missing config file is not an error:
    /// defaults apply and the root is the current directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match find_config_file(&cli.config) {
            Some(config_path) => {
                let mut config = Self::from_path(&config_path)?;
                config.root = config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                config.config_path = config_path;
                config
            }
            None => {
                let mut config = Self::default();
                config.root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                config.config_path = config.root.join(&cli.config);
                config
            }
        };

        config.root = normalize_path(&config.root);
        config.apply_cli_overrides(cli);
        Ok(config)
    }

    /// Parse a config file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }

    /// CLI flags take precedence over file values.
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let crate::cli::Commands::Serve { port, interface, watch } = &cli.command {
            if let Some(port) = port {
                self.serve.port = *port;
            }
            if let Some(interface) = interface {
                self.serve.interface = *interface;
            }
            if let Some(watch) = watch {
                self.serve.watch = *watch;
            }
        }
    }

    /// Absolute path of the optimizer cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        if self.optimizer.cache_dir.is_absolute() {
            self.optimizer.cache_dir.clone()
        } else {
            self.root.join(&self.optimizer.cache_dir)
        }
    }

    /// Join a path against the project root.
    pub fn root_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }
}

/// Search upward from cwd for the config file.
fn find_config_file(name: &Path) -> Option<PathBuf> {
    if name.is_absolute() {
        return name.exists().then(|| name.to_path_buf());
    }
    let mut dir = env::current_dir().ok()?;
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ============================================================================
// Global config handle
// ============================================================================

static CONFIG: OnceLock<Arc<StrobeConfig>> = OnceLock::new();

/// Install the loaded config as the process-wide instance.
pub fn init_config(config: StrobeConfig) -> Arc<StrobeConfig> {
    let arc = Arc::new(config);
    let _ = CONFIG.set(Arc::clone(&arc));
    arc
}

/// Access the process-wide config. Panics if `init_config` was never called.
pub fn cfg() -> Arc<StrobeConfig> {
    Arc::clone(CONFIG.get().expect("config not initialized"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) fn test_parse_config(toml_str: &str) -> StrobeConfig {
    toml::from_str(toml_str).expect("test config should parse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.serve.port, ServeConfig::default().port);
        assert_eq!(config.optimizer.debounce_ms, 100);
    }

    #[test]
    fn test_unknown_sections_ignored() {
        let config = test_parse_config("[future]\nkey = 1");
        assert_eq!(config.serve.port, ServeConfig::default().port);
    }

    #[test]
    fn test_cache_dir_relative_to_root() {
        let mut config = test_parse_config("");
        config.root = PathBuf::from("/srv/app");
        assert_eq!(config.cache_dir(), PathBuf::from("/srv/app/node_modules/.strobe"));
    }

    #[test]
    fn test_cache_dir_absolute() {
        let mut config = test_parse_config("[optimizer]\ncache_dir = \"/var/cache/strobe\"");
        config.root = PathBuf::from("/srv/app");
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/strobe"));
    }
}
