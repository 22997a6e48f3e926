use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagetile";
const MB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// One of off, error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub tiles: TileSettings,
}

/// Budgets for the two bitmap pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_node_cache_mb")]
    pub node_cache_mb: usize,

    #[serde(default = "default_page_cache_mb")]
    pub page_cache_mb: usize,

    /// How long an evicted bitmap may still be resurrected
    #[serde(default = "default_candidate_timeout_ms")]
    pub candidate_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSettings {
    /// Edge of a grid cell in scaled pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Decode threads; 0 picks one per core
    #[serde(default)]
    pub workers: usize,

    /// Pending decode slots; 0 means twice the worker count
    #[serde(default)]
    pub queue_capacity: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_node_cache_mb() -> usize {
    128
}

fn default_page_cache_mb() -> usize {
    32
}

fn default_candidate_timeout_ms() -> u64 {
    5000
}

fn default_tile_size() -> u32 {
    crate::tiles::DEFAULT_TILE_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            log_level: default_log_level(),
            cache: CacheSettings::default(),
            tiles: TileSettings::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            node_cache_mb: default_node_cache_mb(),
            page_cache_mb: default_page_cache_mb(),
            candidate_timeout_ms: default_candidate_timeout_ms(),
        }
    }
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            workers: 0,
            queue_capacity: 0,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn node_bytes(&self) -> usize {
        self.node_cache_mb.saturating_mul(MB)
    }

    #[must_use]
    pub fn page_bytes(&self) -> usize {
        self.page_cache_mb.saturating_mul(MB)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from the default location, falling back to defaults when the
    /// file is missing or unusable.
    pub fn load() -> Self {
        let Some(path) = default_config_path() else {
            warn!("Could not determine config directory, using default settings");
            return Self::default();
        };
        if !path.exists() {
            debug!("No settings file at {path:?}, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        info!("Loaded settings from {path:?}");
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source: std::io::Error| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).map_err(write_err)?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.tiles.tile_size == 0 {
            return Err(SettingsError::Invalid {
                field: "tiles.tile_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(SettingsError::Invalid {
                field: "log_level",
                reason: format!("unknown level {:?}", self.log_level),
            });
        }
        Ok(())
    }

    /// Parsed `log_level`; `Warn` if it does not parse
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings = serde_yaml::from_str("cache:\n  node_cache_mb: 64\n").unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.cache.node_cache_mb, 64);
        assert_eq!(settings.cache.page_cache_mb, 32);
        assert_eq!(settings.cache.candidate_timeout_ms, 5000);
        assert_eq!(settings.tiles, TileSettings::default());
        assert_eq!(settings.level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);

        let mut settings = Settings::default();
        settings.log_level = "debug".to_string();
        settings.tiles.workers = 3;
        settings.cache.page_cache_mb = 8;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.cache.page_bytes(), 8 * MB);
        assert_eq!(loaded.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn rejects_zero_tile_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "tiles:\n  tile_size: 0\n").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "tiles.tile_size", .. }));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "cache: [not, a, map").unwrap();

        assert!(matches!(
            Settings::load_from(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Settings::load_from(&dir.path().join("absent.yaml")),
            Err(SettingsError::Read { .. })
        ));
    }
}
