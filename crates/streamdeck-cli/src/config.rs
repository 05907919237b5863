//! Configuration management.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamdeck_hw::icon::parse_hex_color;
use streamdeck_hw::page::DEFAULT_CACHE_CAPACITY;
use streamdeck_hw::{ListenerOptions, Throttle};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device path or "auto" for auto-detection
    #[serde(default = "default_device")]
    pub device: String,

    /// Backlight brightness (0-100)
    #[serde(default = "default_brightness")]
    pub brightness: u8,

    /// Number of encoded key images kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Key listener throttling
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Per-key appearance
    #[serde(default, rename = "button")]
    pub buttons: Vec<ButtonConfig>,
}

/// Key listener throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Throttle listeners at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum time between two calls in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Fire on the first event of a window
    #[serde(default = "default_true")]
    pub leading: bool,

    /// Fire with the last event once the window has elapsed
    #[serde(default)]
    pub trailing: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_ms: default_window_ms(),
            leading: default_true(),
            trailing: false,
        }
    }
}

impl ThrottleConfig {
    /// Converts to listener options.
    pub fn listener_options(&self) -> ListenerOptions {
        if !self.enabled {
            return ListenerOptions::unthrottled();
        }
        ListenerOptions::throttled(Throttle {
            window: Duration::from_millis(self.window_ms),
            leading: self.leading,
            trailing: self.trailing,
        })
    }
}

/// Appearance of one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonConfig {
    /// Logical key number (1-15, left-to-right, top-to-bottom)
    pub button: u8,

    /// Image shown while released
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,

    /// Color shown while released, if no image (e.g. "#FF0000")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Image shown while held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressed_image: Option<PathBuf>,

    /// Color shown while held, if no pressed image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressed_color: Option<String>,
}

/// What to draw on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Face {
    Image(PathBuf),
    Color(u32),
}

impl ButtonConfig {
    /// Face shown while released.
    pub fn idle_face(&self) -> Result<Option<Face>> {
        face(self.image.as_ref(), self.color.as_deref())
    }

    /// Face shown while held.
    pub fn pressed_face(&self) -> Result<Option<Face>> {
        face(self.pressed_image.as_ref(), self.pressed_color.as_deref())
    }
}

fn face(image: Option<&PathBuf>, color: Option<&str>) -> Result<Option<Face>> {
    if let Some(path) = image {
        return Ok(Some(Face::Image(path.clone())));
    }
    match color {
        Some(hex) => parse_hex_color(hex)
            .map(|c| Some(Face::Color(c)))
            .ok_or_else(|| anyhow!("Invalid color: {}", hex)),
        None => Ok(None),
    }
}

// Default value functions
fn default_device() -> String {
    "auto".to_string()
}

fn default_brightness() -> u8 {
    70
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_window_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.brightness > 100 {
            anyhow::bail!("Brightness must be between 0 and 100");
        }
        for button in &self.buttons {
            if !(1..=streamdeck_hw::BUTTON_COUNT as u8).contains(&button.button) {
                anyhow::bail!("Button must be between 1 and 15, got {}", button.button);
            }
            button.idle_face()?;
            button.pressed_face()?;
        }
        Ok(())
    }

    /// Returns true unless a specific device path is configured.
    pub fn auto_detect(&self) -> bool {
        self.device.eq_ignore_ascii_case("auto")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device(),
            brightness: default_brightness(),
            cache_capacity: default_cache_capacity(),
            throttle: ThrottleConfig::default(),
            buttons: Vec::new(),
        }
    }
}
