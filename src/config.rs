// config.rs

use crate::error::{EngineError, Result};
use crate::models::intersection::{default_lane_ids, parse_lane_id};
use crate::state_estimation::lane_state_tracker::DEFAULT_HISTORY_LENGTH;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Fixed,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedTimeConfig {
    pub ns_green: f64,
    pub ew_green: f64,
}

impl Default for FixedTimeConfig {
    fn default() -> Self {
        Self {
            ns_green: 30.0,
            ew_green: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub min_green: f64,
    pub max_green: f64,
    /// Vehicles per second per lane.
    pub saturation_flow: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_green: 10.0,
            max_green: 60.0,
            saturation_flow: 0.5,
        }
    }
}

/// Engine settings. Every field is optional in the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lane_ids: Vec<String>,
    pub enable_smoothing: bool,
    pub history_length: usize,
    pub controller: ControllerKind,
    pub fixed: FixedTimeConfig,
    pub adaptive: AdaptiveConfig,
    /// Seconds per simulation tick.
    pub tick_interval: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lane_ids: default_lane_ids(),
            enable_smoothing: true,
            history_length: DEFAULT_HISTORY_LENGTH,
            controller: ControllerKind::Adaptive,
            fixed: FixedTimeConfig::default(),
            adaptive: AdaptiveConfig::default(),
            tick_interval: 0.1,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::config(format!("{} must be positive, got {}", name, value)))
    }
}

impl EngineConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        log::info!(
            "Loaded config from {}: {:?} controller, {} lanes",
            path.as_ref().display(),
            config.controller,
            config.lane_ids.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lane_ids.is_empty() {
            return Err(EngineError::config("lane_ids must not be empty"));
        }
        let mut seen = HashSet::new();
        for lane in &self.lane_ids {
            parse_lane_id(lane)?;
            if !seen.insert(lane.as_str()) {
                return Err(EngineError::DuplicateLane(lane.clone()));
            }
        }
        if self.history_length == 0 {
            return Err(EngineError::config("history_length must be at least 1"));
        }

        positive("tick_interval", self.tick_interval)?;
        positive("fixed.ns_green", self.fixed.ns_green)?;
        positive("fixed.ew_green", self.fixed.ew_green)?;
        positive("adaptive.min_green", self.adaptive.min_green)?;
        positive("adaptive.saturation_flow", self.adaptive.saturation_flow)?;
        if !self.adaptive.max_green.is_finite() || self.adaptive.max_green < self.adaptive.min_green {
            return Err(EngineError::config(format!(
                "adaptive.max_green ({}) must be >= adaptive.min_green ({})",
                self.adaptive.max_green, self.adaptive.min_green
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lane_ids.len(), 12);
        assert_eq!(config.controller, ControllerKind::Adaptive);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "controller": "fixed", "fixed": { "ew_green": 45 } }"#).unwrap();
        assert_eq!(config.controller, ControllerKind::Fixed);
        assert_eq!(config.fixed.ns_green, 30.0);
        assert_eq!(config.fixed.ew_green, 45.0);
        assert!(config.enable_smoothing);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.adaptive.max_green = 5.0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.lane_ids.push("N_in_0".to_string());
        assert!(matches!(config.validate(), Err(EngineError::DuplicateLane(_))));

        let mut config = EngineConfig::default();
        config.lane_ids = vec!["north_0".to_string()];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.tick_interval = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_json_file() {
        let path = std::env::temp_dir().join(format!("engine_config_{}.json", std::process::id()));
        fs::write(&path, r#"{ "enable_smoothing": false, "tick_interval": 0.5 }"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!config.enable_smoothing);
        assert_eq!(config.tick_interval, 0.5);

        assert!(matches!(
            EngineConfig::load("/nonexistent/engine.json"),
            Err(EngineError::Io(_))
        ));
    }
}
