//! Threshold classification of readings against the configured safe ranges.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Safe operating ranges. Each range is a closed interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub temp_min: f32,
    pub temp_max: f32,
    pub humidity_min: f32,
    pub humidity_max: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temp_min: 0.0,
            temp_max: 50.0,
            humidity_min: 0.0,
            humidity_max: 100.0,
        }
    }
}

/// Which bounds a reading falls outside of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertFlags {
    pub temp_low: bool,
    pub temp_high: bool,
    pub humidity_low: bool,
    pub humidity_high: bool,
}

impl AlertFlags {
    pub fn any(&self) -> bool {
        self.temp_low || self.temp_high || self.humidity_low || self.humidity_high
    }
}

/// Classify a sample. Values on a bound are inside the range and raise no flag.
pub fn classify(temperature: f32, humidity: f32, thresholds: &AlertThresholds) -> AlertFlags {
    AlertFlags {
        temp_low: temperature < thresholds.temp_min,
        temp_high: temperature > thresholds.temp_max,
        humidity_low: humidity < thresholds.humidity_min,
        humidity_high: humidity > thresholds.humidity_max,
    }
}

/// Applies [`classify`] and logs alert transitions.
#[derive(Debug, Clone)]
pub struct ThresholdAlerter {
    thresholds: AlertThresholds,
    last: AlertFlags,
}

impl ThresholdAlerter {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            last: AlertFlags::default(),
        }
    }

    /// Classify a sample, logging once when an alert is raised and once when it clears.
    pub fn evaluate(&mut self, temperature: f32, humidity: f32) -> AlertFlags {
        let flags = classify(temperature, humidity, &self.thresholds);

        if flags.any() && flags != self.last {
            warn!(
                temperature = temperature,
                humidity = humidity,
                temp_low = flags.temp_low,
                temp_high = flags.temp_high,
                humidity_low = flags.humidity_low,
                humidity_high = flags.humidity_high,
                "Reading outside safe range"
            );
        } else if !flags.any() && self.last.any() {
            info!(temperature = temperature, humidity = humidity, "Readings back within safe range");
        }

        self.last = flags;
        flags
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }
}
