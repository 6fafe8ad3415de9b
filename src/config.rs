// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults field by field, so a config file only
// needs the keys it wants to change.

use crate::renderer::RendererCreateInfo;
use crate::swapchain::{SwapchainCreateInfo, DEFAULT_FRAMES_IN_FLIGHT};
use crate::types::{GraphicsApi, Multisampling};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Bridge Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub api: GraphicsApi,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: u32,
    /// Sample count: 1, 2, 4, 8, 16, 32 or 64
    pub multisampling: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            api: GraphicsApi::Vulkan,
            present_mode: "fifo".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            multisampling: 1,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// `error`, `warn`, `info`, `debug` or `trace`
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

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }

    pub fn multisampling(&self) -> Result<Multisampling> {
        Ok(match self.graphics.multisampling {
            1 => Multisampling::X1,
            2 => Multisampling::X2,
            4 => Multisampling::X4,
            8 => Multisampling::X8,
            16 => Multisampling::X16,
            32 => Multisampling::X32,
            64 => Multisampling::X64,
            other => anyhow::bail!("multisampling must be a power of two up to 64, got {}", other),
        })
    }

    pub fn swapchain_info(&self) -> SwapchainCreateInfo {
        SwapchainCreateInfo::default()
            .frames_in_flight(self.graphics.frames_in_flight)
            .extent(self.window.width, self.window.height)
    }

    pub fn renderer_info(&self) -> Result<RendererCreateInfo> {
        Ok(RendererCreateInfo::default()
            .multisampling(self.multisampling()?)
            .clear_color(self.graphics.clear_color))
    }
}
