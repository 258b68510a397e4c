// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Optional config.toml in the working directory. Missing file or bad values
// fall back to defaults; there are no command-line flags.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Window".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Request VK_LAYER_KHRONOS_validation (only enabled if installed)
    pub validation: bool,
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: true,
            log_level: "info".to_string(),
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Where the configuration came from, reported once logging is up
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(e) => log::warn!("{:#}. Using defaults.", e),
        }
    }
}

impl Config {
    /// Load config.toml, falling back to defaults if it is missing or bad.
    ///
    /// Nothing is logged here: this runs before the logger is set up.
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Ok(Some(config)) => (config, ConfigSource::File(path.to_path_buf())),
            Ok(None) => (Config::default(), ConfigSource::Missing(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path; `None` if there is no file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Log filter for env_logger, unknown names fall back to info
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "Vulkan Window");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(config.debug.validation);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/triangle.frag.spv"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [debug]
            validation = false
            log_level = "debug"

            [shaders]
            fragment = "custom/tri.frag.spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert!(!config.debug.validation);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("custom/tri.frag.spv"));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn unknown_log_level_means_info() {
        let mut config = Config::default();
        config.debug.log_level = "chatty".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (config, source) = Config::load_or_default("does/not/exist/config.toml");
        assert_eq!(config.window.width, 800);
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    #[test]
    fn invalid_file_falls_back_with_the_error_kept() {
        let path = std::env::temp_dir().join(format!("triangle-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        match source {
            ConfigSource::Invalid(e) => assert!(format!("{:#}", e).contains("Failed to parse")),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_reported_as_loaded() {
        let path = std::env::temp_dir().join(format!("triangle-config-ok-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nheight = 480\n").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.height, 480);
        assert!(matches!(source, ConfigSource::File(p) if p == path));
    }
}
