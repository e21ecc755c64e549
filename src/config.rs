//! Engine configuration
//!
//! Loaded from a JSON file; every key is optional and falls back to its
//! default so partial files stay valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FxError, Result};

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default render block size in frames
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default metering cadence (~30 Hz)
pub const DEFAULT_METER_INTERVAL_MS: u64 = 33;

/// Default gain ramp length
pub const DEFAULT_GAIN_RAMP_MS: f32 = 20.0;

/// Default upper bound for strip gain (linear, ~ +12 dB)
pub const DEFAULT_MAX_GAIN: f32 = 4.0;

/// Default level mapped to the bottom of a meter
pub const DEFAULT_METER_FLOOR_DB: f32 = -60.0;

/// Runtime settings shared by the session, its strips and the metering loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate used by effect factories and gain ramps
    pub sample_rate: u32,
    /// Frames per render block
    pub block_size: usize,
    /// Interval between metering passes in milliseconds
    pub meter_interval_ms: u64,
    /// Duration of a gain ramp in milliseconds
    pub gain_ramp_ms: f32,
    /// Maximum linear gain a strip accepts
    pub max_gain: f32,
    /// Level (dB) shown as an empty meter
    pub meter_floor_db: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            meter_interval_ms: DEFAULT_METER_INTERVAL_MS,
            gain_ramp_ms: DEFAULT_GAIN_RAMP_MS,
            max_gain: DEFAULT_MAX_GAIN,
            meter_floor_db: DEFAULT_METER_FLOOR_DB,
        }
    }
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field for a usable value
    pub fn validate(&self) -> Result<()> {
        let reason = if self.sample_rate == 0 {
            Some("sample_rate must be positive")
        } else if self.block_size == 0 {
            Some("block_size must be positive")
        } else if self.meter_interval_ms == 0 {
            Some("meter_interval_ms must be positive")
        } else if !(self.gain_ramp_ms >= 0.0) {
            Some("gain_ramp_ms must not be negative")
        } else if !(self.max_gain > 0.0) {
            Some("max_gain must be positive")
        } else if !(self.meter_floor_db < 0.0) {
            Some("meter_floor_db must be below 0 dB")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(FxError::InvalidConfig {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Gain ramp length in samples (at least one)
    pub fn gain_ramp_samples(&self) -> usize {
        ((self.gain_ramp_ms / 1000.0) * self.sample_rate as f32).max(1.0) as usize
    }
}
