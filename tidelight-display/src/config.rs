//! Display configuration, persisted as a JSON file.

use anyhow::{Context, Result};
use log::{info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tidelight_render_lib::WARN_DIVIDER_INCHES;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of LEDs on the strip
    #[serde(default = "default_num_pixels")]
    pub num_pixels: usize,
    /// Physical height the strip spans, in inches of water
    #[serde(default = "default_physical_height")]
    pub physical_height_inches: f64,
    /// Data pin the strip is wired to
    #[serde(default = "default_led_gpio")]
    pub led_gpio: u8,
    /// Global LED brightness (0-255)
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    /// Render frame period (ms)
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_num_pixels() -> usize {
    100
}

const fn default_physical_height() -> f64 {
    25.0
}

const fn default_led_gpio() -> u8 {
    48
}

const fn default_brightness() -> u8 {
    255
}

const fn default_frame_interval_ms() -> u64 {
    25
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_pixels: default_num_pixels(),
            physical_height_inches: default_physical_height(),
            led_gpio: default_led_gpio(),
            brightness: default_brightness(),
            frame_interval_ms: default_frame_interval_ms(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        if self.num_pixels == 0 {
            warn!("num_pixels is 0, resetting to {}", default_num_pixels());
            self.num_pixels = default_num_pixels();
        }
        // Both section dividers must land on the strip.
        if !(self.physical_height_inches > WARN_DIVIDER_INCHES) {
            warn!(
                "physical_height_inches {} must exceed {WARN_DIVIDER_INCHES}, resetting to {}",
                self.physical_height_inches,
                default_physical_height()
            );
            self.physical_height_inches = default_physical_height();
        }
        if self.frame_interval_ms == 0 {
            warn!(
                "frame_interval_ms is 0, resetting to {}",
                default_frame_interval_ms()
            );
            self.frame_interval_ms = default_frame_interval_ms();
        }
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(mut config) => {
                info!("Loaded config from {}", path.display());
                config.validate();
                config
            }
            Err(e) => {
                warn!("Failed to load config from {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let config: Config = serde_json::from_slice(&raw)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        info!("Config saved to {}", path.display());
        Ok(())
    }
}
