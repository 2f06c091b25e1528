use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::constants::classifier::{DEFAULT_CC_THRESHOLD, MAX_CC_THRESHOLD, MIN_CC_THRESHOLD};
use crate::constants::detector::{
    DEFAULT_BACKGROUND_THRESHOLD, MAX_BACKGROUND_THRESHOLD, MIN_BACKGROUND_THRESHOLD,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub detection: DetectionConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Minimum correlation against a prototype for a prediction to fire.
    pub threshold_cc: f64,
    /// Multiplier over the rolling background level a sample must clear to
    /// count as a keystroke.
    pub threshold_background: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Preferred input device name; `None` uses the system default.
    pub input_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            detection: DetectionConfig {
                threshold_cc: DEFAULT_CC_THRESHOLD,
                threshold_background: DEFAULT_BACKGROUND_THRESHOLD,
            },
            capture: CaptureConfig { input_device: None },
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".keysound"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.yaml"))
    }

    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                serde_yaml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            println!("Created default config at: {}", config_path.display());
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        let config_path = Self::config_path()?;
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(&config_path, yaml).context("Failed to write config file")?;

        Ok(())
    }

    /// Pin both thresholds to their supported ranges.
    pub fn clamp_thresholds(&mut self) {
        self.detection.threshold_cc = self
            .detection
            .threshold_cc
            .clamp(MIN_CC_THRESHOLD, MAX_CC_THRESHOLD);
        self.detection.threshold_background = self
            .detection
            .threshold_background
            .clamp(MIN_BACKGROUND_THRESHOLD, MAX_BACKGROUND_THRESHOLD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_range() {
        let mut config = Config::default();
        let before = (
            config.detection.threshold_cc,
            config.detection.threshold_background,
        );
        config.clamp_thresholds();
        assert_eq!(
            (
                config.detection.threshold_cc,
                config.detection.threshold_background
            ),
            before
        );
    }

    #[test]
    fn out_of_range_thresholds_are_clamped() {
        let mut config = Config::default();
        config.detection.threshold_cc = 5.0;
        config.detection.threshold_background = 0.0;
        config.clamp_thresholds();
        assert_eq!(config.detection.threshold_cc, MAX_CC_THRESHOLD);
        assert_eq!(
            config.detection.threshold_background,
            MIN_BACKGROUND_THRESHOLD
        );
    }
}
