//! Window and Vulkan settings, optionally loaded from TOML.
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialize(String),
}

/// Properties of the OS window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Client area width in pixels.
    pub width: u32,
    /// Client area height in pixels.
    pub height: u32,
    /// Show the frame rate in the title bar.
    pub show_fps: bool,
    /// Window title.
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            width: 800,
            height: 600,
            show_fps: true,
            title: "ABCg Window".to_owned(),
        }
    }
}

/// Properties of the Vulkan context.
///
/// Only read when the window is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanSettings {
    /// Depth buffer bits, 0 to disable.
    pub depth_buffer_size: u32,
    /// Stencil buffer bits, 0 to disable.
    pub stencil_buffer_size: u32,
    /// Desired MSAA samples. The device may provide fewer; 0 or 1 disables
    /// multisampling.
    pub samples: u32,
    /// Wait for vertical blank when presenting.
    pub vsync: bool,
}

impl Default for VulkanSettings {
    fn default() -> Self {
        VulkanSettings {
            depth_buffer_size: 24,
            stencil_buffer_size: 0,
            samples: 0,
            vsync: false,
        }
    }
}

impl VulkanSettings {
    /// `samples` clamped to `1..=64` and rounded down to a power of two.
    pub fn sample_count(&self) -> u32 {
        let samples = self.samples.clamp(1, 64);
        1 << (31 - samples.leading_zeros())
    }
}

/// All settings of a Vulkan window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Window section.
    pub window: WindowSettings,
    /// Vulkan section.
    pub vulkan: VulkanSettings,
}

impl Settings {
    /// Parses settings, filling in defaults for missing keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serializes the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Saves settings to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.window.height, 600);
        assert_eq!(settings.window.title, "ABCg Window");
        assert!(settings.window.show_fps);
        assert_eq!(settings.vulkan.depth_buffer_size, 24);
        assert_eq!(settings.vulkan.samples, 0);
        assert!(!settings.vulkan.vsync);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [window]
            title = "Hello"

            [vulkan]
            samples = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.window.title, "Hello");
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.vulkan.samples, 4);
        assert_eq!(settings.vulkan.depth_buffer_size, 24);
    }

    #[test]
    fn toml_round_trip() {
        let mut settings = Settings::default();
        settings.window.width = 1024;
        settings.vulkan.vsync = true;
        let text = settings.to_toml_string().unwrap();
        assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = Settings::from_toml_str("[window\nwidth = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Settings::load("/nonexistent/abcg.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn sample_count_rounds_down() {
        let count = |samples| {
            VulkanSettings {
                samples,
                ..Default::default()
            }
            .sample_count()
        };
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 1);
        assert_eq!(count(3), 2);
        assert_eq!(count(4), 4);
        assert_eq!(count(7), 4);
        assert_eq!(count(100), 64);
    }
}
