//! Signal interpretation
//!
//! Stateless transforms from raw physical inputs to posture and stress values:
//! - Orientation (pitch/roll) from 3-axis acceleration
//! - Posture predicates from orientation and seat force sensors
//! - Heart rate variability (RMSSD) from RR intervals
//! - Stress score from GSR and HRV
//!
//! Every function is total over its numeric domain. A sensor that is not
//! available reports 0, and 0 is treated as an ordinary reading.

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, PostureThresholds, StressWeights};
use crate::types::{
    Orientation, PostureFlags, RawReading, Sample, StressAssessment, StressComponents,
};

/// Pitch and roll (degrees) from acceleration.
///
/// `pitch = atan2(ax, sqrt(ay² + az²))`, `roll = atan2(ay, sqrt(ax² + az²))`.
/// All-zero acceleration yields level; non-finite input does too.
pub fn orientation(ax: f64, ay: f64, az: f64) -> Orientation {
    if !(ax.is_finite() && ay.is_finite() && az.is_finite()) {
        return Orientation::LEVEL;
    }

    let pitch = ax.atan2((ay * ay + az * az).sqrt()).to_degrees();
    let roll = ay.atan2((ax * ax + az * az).sqrt()).to_degrees();

    Orientation {
        pitch_deg: pitch,
        roll_deg: roll,
    }
}

/// Threshold posture predicates. Roll is carried for display only.
pub fn posture_flags(
    pitch: f64,
    _roll: f64,
    fsr_left: u32,
    fsr_right: u32,
    fsr_center: u32,
    thresholds: &PostureThresholds,
) -> PostureFlags {
    PostureFlags {
        torso_slouch: pitch.abs() > thresholds.slouch_angle_alert_deg,
        forward_lean: pitch > thresholds.forward_lean_alert_deg,
        weight_imbalance: fsr_left.abs_diff(fsr_right) > thresholds.fsr_pressure_threshold,
        seated: fsr_center > thresholds.fsr_pressure_threshold,
    }
}

/// Root mean square of successive differences (ms).
///
/// Undefined (`None`) for fewer than two intervals. `Some(0.0)` is a real
/// value: a perfectly steady rhythm.
pub fn heart_rate_variability(rr_intervals_ms: &[f64]) -> Option<f64> {
    if rr_intervals_ms.len() < 2 {
        return None;
    }

    let (sum_sq, count) = rr_intervals_ms
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold((0.0, 0usize), |(sum, n), d| (sum + d * d, n + 1));

    Some((sum_sq / count as f64).sqrt())
}

/// Weighted stress score from GSR and HRV.
///
/// `gsr_norm = gsr_raw / adc_full_scale` (clamped to 0-1),
/// `hrv_norm = clamp(1 - hrv / hrv_norm_ms, 0, 1)` or `missing_hrv_norm` when
/// HRV is undefined, `score = gsr_weight * gsr_norm + hrv_weight * hrv_norm`.
pub fn stress_score(
    gsr_raw: u32,
    rr_intervals_ms: &[f64],
    weights: &StressWeights,
) -> StressAssessment {
    let gsr_norm = (gsr_raw as f64 / weights.adc_full_scale).clamp(0.0, 1.0);
    let hrv = heart_rate_variability(rr_intervals_ms);

    // Lower HRV reads as higher stress
    let hrv_norm = match hrv {
        Some(rmssd) => (1.0 - rmssd / weights.hrv_norm_ms).clamp(0.0, 1.0),
        None => weights.missing_hrv_norm,
    };

    let score = (weights.gsr_weight * gsr_norm + weights.hrv_weight * hrv_norm).clamp(0.0, 1.0);

    StressAssessment {
        score,
        components: StressComponents {
            gsr_norm,
            hrv,
            hrv_norm,
        },
    }
}

/// Everything derived from one raw reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub orientation: Orientation,
    pub posture: PostureFlags,
    pub stress: StressAssessment,
}

/// Interpreter bound to a configuration
#[derive(Debug, Clone, Default)]
pub struct SignalInterpreter {
    posture: PostureThresholds,
    stress: StressWeights,
}

impl SignalInterpreter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            posture: config.posture.clone(),
            stress: config.stress.clone(),
        }
    }

    pub fn stress_weights(&self) -> &StressWeights {
        &self.stress
    }

    /// Interpret a raw reading against an RR window.
    ///
    /// `rr_window` is the caller's RR history, already including this
    /// reading's intervals.
    pub fn interpret(&self, raw: &RawReading, rr_window: &[f64]) -> Interpretation {
        let acc = raw.acceleration;
        let orientation = orientation(acc.ax, acc.ay, acc.az);
        let posture = posture_flags(
            orientation.pitch_deg,
            orientation.roll_deg,
            raw.fsr_left,
            raw.fsr_right,
            raw.fsr_center,
            &self.posture,
        );
        let stress = stress_score(raw.gsr_raw, rr_window, &self.stress);

        Interpretation {
            orientation,
            posture,
            stress,
        }
    }

    /// Build the classified sample for a raw reading
    pub fn to_sample(
        &self,
        raw: &RawReading,
        interpretation: &Interpretation,
        buzzer_triggered: bool,
    ) -> Sample {
        Sample {
            timestamp: raw.timestamp,
            pitch: interpretation.orientation.pitch_deg,
            roll: interpretation.orientation.roll_deg,
            fsr_left: raw.fsr_left,
            fsr_right: raw.fsr_right,
            fsr_center: raw.fsr_center,
            gsr_raw: raw.gsr_raw,
            rr_intervals: raw.rr_intervals.clone(),
            is_seated: interpretation.posture.seated,
            stress_score: Some(interpretation.stress.score),
            buzzer_triggered,
        }
    }
}
