// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field has a default, so a missing file or a partial one
// still yields a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::renderer::{BackendConfig, VULKAN_BACKEND};

/// Root configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
}

/// Window settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Renderer backend settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Registry name of the backend to load.
    pub backend: String,
    pub application_name: String,
    pub validation_layers: bool,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        let defaults = BackendConfig::default();
        Self {
            backend: VULKAN_BACKEND.to_string(),
            application_name: defaults.application_name,
            validation_layers: defaults.validation,
            clear_color: defaults.clear_color,
        }
    }
}

/// Log settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// env_logger filter, overridden by RUST_LOG.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Settings passed to the renderer backend's init.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            application_name: self.renderer.application_name.clone(),
            validation: self.renderer.validation_layers,
            clear_color: self.renderer.clear_color,
        }
    }
}
