//! Configuration management for emu32.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (EMU32_INCLUDE_PATH, EMU32_RAM_KIB)
//! 2. Project-local config file (`./emu32.toml`)
//! 3. User config file (`~/.config/emu32/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # emu32.toml
//!
//! # System include directories searched by `#include <"...">`
//! include_paths = ["/usr/local/share/emu32/include"]
//!
//! # RAM size (KiB) mapped at address 0 when running a flat image
//! ram_kib = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default RAM size for the run mode, in KiB.
const DEFAULT_RAM_KIB: u32 = 64;

/// emu32 configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// System include directories searched by the angle include form.
    pub include_paths: Option<Vec<String>>,

    /// RAM size in KiB mapped at address 0 by `emu32 <image>`.
    pub ram_kib: Option<u32>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `emu32.toml`
    /// 3. User config `~/.config/emu32/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// The configured system include directories (empty by default).
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.include_paths
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    /// The RAM size for the run mode, in bytes.
    pub fn ram_bytes(&self) -> u32 {
        self.ram_kib.unwrap_or(DEFAULT_RAM_KIB) * 1024
    }

    /// Load user configuration from ~/.config/emu32/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("emu32").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./emu32.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("emu32.toml"))
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.include_paths.is_some() {
            self.include_paths = other.include_paths;
        }
        if other.ram_kib.is_some() {
            self.ram_kib = other.ram_kib;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(paths) = std::env::var("EMU32_INCLUDE_PATH") {
            log::info!("Using EMU32_INCLUDE_PATH from environment: {}", paths);
            self.include_paths = Some(
                std::env::split_paths(&paths)
                    .map(|p| p.display().to_string())
                    .collect(),
            );
        }
        if let Ok(kib) = std::env::var("EMU32_RAM_KIB") {
            match kib.parse() {
                Ok(kib) => self.ram_kib = Some(kib),
                Err(_) => log::warn!("Ignoring non-numeric EMU32_RAM_KIB: {}", kib),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("emu32").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# emu32 configuration
# Place this file at ~/.config/emu32/config.toml or ./emu32.toml

# System include directories searched by `#include <"...">`
# include_paths = ["/usr/local/share/emu32/include"]

# RAM size (KiB) mapped at address 0 when running a flat image
# ram_kib = 64
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.include_paths().is_empty());
        assert_eq!(config.ram_bytes(), DEFAULT_RAM_KIB * 1024);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            include_paths: Some(vec!["/base/include".to_string()]),
            ram_kib: None,
        };

        let overlay = Config {
            include_paths: None,
            ram_kib: Some(128),
        };

        base.merge(overlay);

        // include_paths unchanged (overlay was None)
        assert_eq!(base.include_paths, Some(vec!["/base/include".to_string()]));
        // ram_kib set from overlay
        assert_eq!(base.ram_kib, Some(128));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        // Should parse without error (all keys are commented out)
        let _: Config = toml::from_str(&sample).expect("Sample config should parse");
    }
}
