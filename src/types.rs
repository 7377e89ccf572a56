//! Core types for the Posture Flux engine
//!
//! This module defines the data structures that flow through the engine:
//! raw sensor readings, interpreted posture/stress values, classified samples,
//! and the session projections handed to collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;

/// Opaque session identifier, assigned when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the actor (user, device) that owns sessions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 3-axis acceleration (any consistent unit, e.g. m/s² or g)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
}

impl Acceleration {
    /// Gravity straight down the sensor's z axis
    pub const RESTING: Acceleration = Acceleration {
        ax: 0.0,
        ay: 0.0,
        az: 1.0,
    };
}

/// One raw tick from the sample source, before interpretation.
///
/// Unavailable sensors report a neutral 0 rather than a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub acceleration: Acceleration,
    pub fsr_left: u32,
    pub fsr_right: u32,
    pub fsr_center: u32,
    #[serde(default)]
    pub gsr_raw: u32,
    /// Beat-to-beat intervals (ms) observed during this tick
    #[serde(default)]
    pub rr_intervals: Vec<f64>,
}

/// Tilt angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

impl Orientation {
    pub const LEVEL: Orientation = Orientation {
        pitch_deg: 0.0,
        roll_deg: 0.0,
    };
}

/// Independent posture predicates for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureFlags {
    pub torso_slouch: bool,
    pub forward_lean: bool,
    pub weight_imbalance: bool,
    pub seated: bool,
}

impl PostureFlags {
    /// Whether this posture warrants a corrective buzz
    pub fn needs_correction(&self) -> bool {
        self.torso_slouch || self.forward_lean
    }
}

/// Intermediate values behind a stress score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressComponents {
    /// GSR normalized to full scale (0-1)
    pub gsr_norm: f64,
    /// RMSSD of the RR window (ms); `None` when fewer than two intervals
    pub hrv: Option<f64>,
    /// HRV contribution actually used (0-1)
    pub hrv_norm: f64,
}

/// Stress score (0-1) with its components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressAssessment {
    pub score: f64,
    pub components: StressComponents,
}

/// One classified sensor reading, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub pitch: f64,
    pub roll: f64,
    pub fsr_left: u32,
    pub fsr_right: u32,
    pub fsr_center: u32,
    #[serde(default)]
    pub gsr_raw: u32,
    #[serde(default)]
    pub rr_intervals: Vec<f64>,
    #[serde(default)]
    pub is_seated: bool,
    /// Stress score (0-1); samples arriving pre-classified may omit it
    #[serde(default)]
    pub stress_score: Option<f64>,
    #[serde(default)]
    pub buzzer_triggered: bool,
}

impl Sample {
    /// Parse a sample from JSON. Missing or mistyped fields are reported as
    /// `InvalidSample`; malformed JSON stays a JSON error.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| match e.classify() {
            serde_json::error::Category::Data => EngineError::InvalidSample(e.to_string()),
            _ => EngineError::Json(e),
        })
    }

    /// Check that every numeric field is usable
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.pitch.is_finite() {
            return Err(EngineError::InvalidSample(format!(
                "pitch is not finite: {}",
                self.pitch
            )));
        }
        if !self.roll.is_finite() {
            return Err(EngineError::InvalidSample(format!(
                "roll is not finite: {}",
                self.roll
            )));
        }
        if let Some(score) = self.stress_score {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(EngineError::InvalidSample(format!(
                    "stress_score must be within [0, 1], got {score}"
                )));
            }
        }
        if let Some(bad) = self
            .rr_intervals
            .iter()
            .find(|rr| !rr.is_finite() || **rr < 0.0)
        {
            return Err(EngineError::InvalidSample(format!(
                "rr interval must be a non-negative number of ms, got {bad}"
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

/// Read-only projection of a session's aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub id: SessionId,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds from start to end (or to now while open)
    pub duration_secs: u64,
    /// Count of seated samples, one per tick (not wall-clock seconds)
    pub sitting_duration: u64,
    /// 100 * sitting_duration / duration_secs, 0 when duration is 0
    pub sitting_percentage: f64,
    /// Mean stress score, 0 until a scored sample arrives
    pub session_score: f64,
    pub scored_samples: u64,
    pub sample_count: u64,
    pub buzzer_count: u64,
    pub break_alert: bool,
    pub excessive_buzzer_alert: bool,
}

/// Session stats plus its ordered readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub stats: SessionStats,
    pub readings: Vec<Sample>,
}

/// Dashboard totals across all of an owner's sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub owner: OwnerId,
    pub total_sessions: usize,
    pub total_sitting_ticks: u64,
    pub avg_session_score: f64,
    pub break_alerts: usize,
    pub buzzer_alerts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "timestamp": "2024-01-15T08:30:00Z",
            "pitch": 15.2,
            "roll": -1.5,
            "fsr_left": 45000,
            "fsr_right": 48000,
            "fsr_center": 50000,
            "stress_score": 0.42,
            "is_seated": true
        }"#
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let sample = Sample::from_json(sample_json()).unwrap();
        assert!(sample.is_seated);
        assert!(!sample.buzzer_triggered);
        assert_eq!(sample.gsr_raw, 0);
        assert!(sample.rr_intervals.is_empty());
        assert_eq!(sample.stress_score, Some(0.42));
        assert!(sample.validate().is_ok());
    }

    #[test]
    fn test_missing_field_is_invalid_sample() {
        let json = r#"{"timestamp": "2024-01-15T08:30:00Z", "roll": 0.0,
            "fsr_left": 1, "fsr_right": 1, "fsr_center": 1}"#;
        let err = Sample::from_json(json).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSample(_)));
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let err = Sample::from_json("{not json").unwrap_err();
        assert!(matches!(err, EngineError::Json(_)));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut sample = Sample::from_json(sample_json()).unwrap();
        sample.pitch = f64::NAN;
        assert!(matches!(
            sample.validate(),
            Err(EngineError::InvalidSample(_))
        ));

        let mut sample = Sample::from_json(sample_json()).unwrap();
        sample.stress_score = Some(1.5);
        assert!(sample.validate().is_err());

        let mut sample = Sample::from_json(sample_json()).unwrap();
        sample.rr_intervals = vec![1000.0, f64::INFINITY];
        assert!(sample.validate().is_err());
    }

    #[test]
    fn test_session_id_round_trips_as_string() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            format!("\"{id}\"")
        );
    }
}
