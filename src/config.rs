//! Controller configuration.
//!
//! Configuration is plain JSON. Every field has a default, so an empty object
//! is a valid configuration:
//!
//! ```json
//! {
//!   "detection_radius": 50.0,
//!   "classes": { "veh_ambulance": 1, "veh_firefighter": 2, "veh_police": 3 },
//!   "max_reconnect_attempts": 3,
//!   "event_queue_capacity": 1024,
//!   "max_steps": null,
//!   "release_on_shutdown": false
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;
use crate::geometry::DEFAULT_DETECTION_RADIUS;
use crate::priority::PriorityRegistry;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The values are out of range.
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}

fn default_detection_radius() -> f64 {
    DEFAULT_DETECTION_RADIUS
}

const fn default_max_reconnect_attempts() -> u32 {
    3
}

const fn default_event_queue_capacity() -> usize {
    1024
}

/// Preemption controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionConfig {
    /// Distance within which a vehicle is considered to approach a junction.
    #[serde(default = "default_detection_radius")]
    pub detection_radius: f64,

    /// Prioritized vehicle classes and their ranks.
    #[serde(default)]
    pub classes: PriorityRegistry,

    /// Reconnect attempts after the simulation connection is lost.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Per-subscriber event queue capacity.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Stop after this many steps even if vehicles remain.
    #[serde(default)]
    pub max_steps: Option<u64>,

    /// Restore every junction still overridden when the run stops normally.
    /// Off by default: junctions are only released by the release check.
    #[serde(default)]
    pub release_on_shutdown: bool,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self {
            detection_radius: default_detection_radius(),
            classes: PriorityRegistry::default(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            event_queue_capacity: default_event_queue_capacity(),
            max_steps: None,
            release_on_shutdown: false,
        }
    }
}

impl PreemptionConfig {
    /// Load and validate configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or a value is out of range.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.detection_radius.is_finite() && self.detection_radius > 0.0) {
            return Err(ValidationError::InvalidDetectionRadius {
                value: self.detection_radius,
            });
        }
        if self.event_queue_capacity == 0 {
            return Err(ValidationError::MustBePositive {
                field: "event_queue_capacity".to_string(),
            });
        }
        if self.max_steps == Some(0) {
            return Err(ValidationError::MustBePositive {
                field: "max_steps".to_string(),
            });
        }
        self.classes.validate()
    }
}
