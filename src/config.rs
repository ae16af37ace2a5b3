// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file both work.
// Present mode is not configurable: the swapchain always uses FIFO.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::{DeviceSelector, FirstDevice, LargestLocalHeap};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,
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
            title: "kiln".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// How the physical device is picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    #[default]
    First,
    LargestHeap,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub device_selection: DeviceSelection,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            device_selection: DeviceSelection::First,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// One of off, error, warn, info, debug, trace. RUST_LOG still wins.
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
        }
    }
}

/// Asset directory and hot reload
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub directory: PathBuf,
    pub hot_reload: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("assets"),
            hot_reload: true,
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn device_selector(&self) -> Box<dyn DeviceSelector> {
        match self.graphics.device_selection {
            DeviceSelection::First => Box::new(FirstDevice),
            DeviceSelection::LargestHeap => Box::new(LargestLocalHeap),
        }
    }

    /// Configured log level, `Info` when the value is not recognised.
    pub fn log_level(&self) -> LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!(
                "Unknown log level '{}', defaulting to info",
                self.debug.log_level
            );
            LevelFilter::Info
        })
    }
}
