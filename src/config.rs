// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a partial (or missing) file is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub camera: CameraConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Wrapper".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Swapchain format to prefer when the surface offers it
    pub preferred_format: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.05, 0.05, 0.08, 1.0],
            max_frames_in_flight: 2,
            preferred_format: "b8g8r8a8_srgb".to_string(),
        }
    }
}

/// Asset locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub shader_dir: PathBuf,
    /// Albedo texture; a checkerboard is generated when missing
    pub texture: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            texture: Some(PathBuf::from("assets/albedo.png")),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
    pub hot_reload: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
            hot_reload: true,
        }
    }
}

/// Control key bindings and sensitivities
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
    pub move_speed: f32,
    pub mouse_sensitivity: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
            move_speed: 3.0,
            mouse_sensitivity: 0.15,
        }
    }
}

/// Initial camera parameters
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            near: 0.1,
            far: 100.0,
            position: [0.0, 1.0, 4.0],
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file is missing or invalid. Logging must already be running so the
    /// fallback warning is not lost.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Ok(Some(config)) => {
                log::info!("Loaded configuration from {:?}", path);
                log::debug!("Config: {:?}", config);
                config
            }
            Ok(None) => {
                log::info!("Config file not found at {:?}, using defaults", path);
                Config::default()
            }
            Err(e) => {
                log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
                Config::default()
            }
        }
    }

    /// Read and parse `path`. A missing file is `Ok(None)`.
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
        let mut config: Config = toml::from_str(content)?;
        config.graphics.max_frames_in_flight = config
            .graphics
            .max_frames_in_flight
            .clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
        Ok(config)
    }

    /// Configured log level; unknown names mean `Info`
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Get the preferred swapchain format as Vulkan enum
    pub fn preferred_format(&self) -> vk::Format {
        match self.graphics.preferred_format.to_lowercase().as_str() {
            "b8g8r8a8_srgb" => vk::Format::B8G8R8A8_SRGB,
            "r8g8b8a8_srgb" => vk::Format::R8G8B8A8_SRGB,
            "b8g8r8a8_unorm" => vk::Format::B8G8R8A8_UNORM,
            "r8g8b8a8_unorm" => vk::Format::R8G8B8A8_UNORM,
            _ => {
                log::warn!(
                    "Unknown surface format '{}', defaulting to B8G8R8A8_SRGB",
                    self.graphics.preferred_format
                );
                vk::Format::B8G8R8A8_SRGB
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.assets.shader_dir, PathBuf::from("shaders"));
        assert!(config.debug.hot_reload);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Demo"

            [graphics]
            present_mode = "mailbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Demo");
        assert_eq!(config.window.height, 720);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 1);

        let config = Config::parse("[graphics]\nmax_frames_in_flight = 16").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, MAX_FRAMES_IN_FLIGHT_LIMIT);
    }

    #[test]
    fn unknown_names_fall_back() {
        let config = Config::parse(
            "[graphics]\npresent_mode = \"vsync-ish\"\npreferred_format = \"rgb565\"",
        )
        .unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.preferred_format(), vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = 3").is_err());
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::parse(include_str!("../config.toml")).unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.camera.position, [0.0, 1.0, 4.0]);
        assert_eq!(config.controls.fullscreen_key, "F11");
    }

    #[test]
    fn missing_file_is_default() {
        assert!(Config::load_from_path("does/not/exist.toml").unwrap().is_none());
        let config = Config::load("does/not/exist.toml");
        assert_eq!(config.camera.fov_degrees, 60.0);
    }

    #[test]
    fn invalid_file_reports_error_and_loads_defaults() {
        let path = std::env::temp_dir().join(format!(
            "vulkan-wrapper-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window\nwidth = 3").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
        assert_eq!(Config::load(&path).window.width, 1280);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn log_level_names() {
        let config = Config::parse("[debug]\nlog_level = \"debug\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);

        let config = Config::parse("[debug]\nlog_level = \"chatty\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }
}
