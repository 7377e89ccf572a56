//! Engine configuration
//!
//! All thresholds and weights are tunable so sensors can be calibrated
//! without recompiling. Configuration is plain JSON; missing fields fall
//! back to the defaults below.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// Full-scale value of a 16-bit ADC channel
pub const DEFAULT_ADC_FULL_SCALE: f64 = 65535.0;

/// Default number of RR intervals retained for HRV
pub const DEFAULT_RR_HISTORY_LEN: usize = 60;

/// Default polling cadence (1 Hz)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// One day
const MAX_TICK_INTERVAL_MS: u64 = 86_400_000;

/// Posture thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureThresholds {
    /// |pitch| above this counts as a torso slouch
    pub slouch_angle_alert_deg: f64,
    /// pitch above this counts as a forward lean
    pub forward_lean_alert_deg: f64,
    /// Used both for left/right imbalance and for seat occupancy
    pub fsr_pressure_threshold: u32,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            slouch_angle_alert_deg: 20.0,
            forward_lean_alert_deg: 25.0,
            fsr_pressure_threshold: 5000,
        }
    }
}

/// Stress score weighting and normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressWeights {
    pub adc_full_scale: f64,
    pub gsr_weight: f64,
    pub hrv_weight: f64,
    /// RMSSD (ms) that maps to an HRV contribution of 0
    pub hrv_norm_ms: f64,
    /// HRV contribution used while RMSSD is undefined.
    ///
    /// With no pulse data this fallback dominates the HRV half of the score.
    pub missing_hrv_norm: f64,
    /// Score at or above which the pipeline raises a stress buzz
    pub stress_alert_score: f64,
}

impl Default for StressWeights {
    fn default() -> Self {
        Self {
            adc_full_scale: DEFAULT_ADC_FULL_SCALE,
            gsr_weight: 0.6,
            hrv_weight: 0.4,
            hrv_norm_ms: 100.0,
            missing_hrv_norm: 0.0,
            stress_alert_score: 0.7,
        }
    }
}

/// Session alert policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    /// Buzzer count at which the excessive-correction alert latches
    pub excessive_buzzer_count: u64,
    /// Open-session age (seconds) after which the break alert latches
    pub break_after_secs: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            excessive_buzzer_count: 5,
            break_after_secs: 7200,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub posture: PostureThresholds,
    pub stress: StressWeights,
    pub alerts: AlertPolicy,
    pub rr_history_len: usize,
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            posture: PostureThresholds::default(),
            stress: StressWeights::default(),
            alerts: AlertPolicy::default(),
            rr_history_len: DEFAULT_RR_HISTORY_LEN,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let posture = &self.posture;
        if !posture.slouch_angle_alert_deg.is_finite()
            || !posture.forward_lean_alert_deg.is_finite()
        {
            return Err(EngineError::InvalidConfig(
                "posture angles must be finite".to_string(),
            ));
        }

        let stress = &self.stress;
        if !(stress.adc_full_scale.is_finite() && stress.adc_full_scale > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "adc_full_scale must be positive, got {}",
                stress.adc_full_scale
            )));
        }
        if !(stress.hrv_norm_ms.is_finite() && stress.hrv_norm_ms > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "hrv_norm_ms must be positive, got {}",
                stress.hrv_norm_ms
            )));
        }
        for (name, value) in [
            ("gsr_weight", stress.gsr_weight),
            ("hrv_weight", stress.hrv_weight),
            ("missing_hrv_norm", stress.missing_hrv_norm),
            ("stress_alert_score", stress.stress_alert_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if stress.gsr_weight + stress.hrv_weight > 1.0 + f64::EPSILON {
            return Err(EngineError::InvalidConfig(
                "gsr_weight + hrv_weight must not exceed 1".to_string(),
            ));
        }

        if self.alerts.excessive_buzzer_count == 0 {
            return Err(EngineError::InvalidConfig(
                "excessive_buzzer_count must be at least 1".to_string(),
            ));
        }
        if self.alerts.break_after_secs < 0 {
            return Err(EngineError::InvalidConfig(
                "break_after_secs must not be negative".to_string(),
            ));
        }
        if self.rr_history_len < 2 {
            return Err(EngineError::InvalidConfig(
                "rr_history_len must hold at least two intervals".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 || self.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            return Err(EngineError::InvalidConfig(format!(
                "tick_interval_ms must be within 1..={MAX_TICK_INTERVAL_MS}, got {}",
                self.tick_interval_ms
            )));
        }
        Ok(())
    }

    /// Polling cadence as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::milliseconds(self.tick_interval_ms.min(MAX_TICK_INTERVAL_MS) as i64)
    }
}
