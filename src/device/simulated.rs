//! Simulated and replayed sample sources

use std::collections::VecDeque;
use std::io::BufRead;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DEFAULT_ADC_FULL_SCALE;
use crate::device::SampleSource;
use crate::error::EngineError;
use crate::types::{Acceleration, RawReading};

/// Synthetic seated-user signal.
///
/// Pitch drifts on a slow sinusoid around 15° (±5°), roll around level
/// (±3°), seat pads sit near 45000/48000/50000 with jitter, and skin
/// conductance swings between 20% and 80% of full scale. Readings are
/// reproducible for a given seed.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    rng: StdRng,
    start: DateTime<Utc>,
    interval: Duration,
    tick: u64,
    limit: Option<u64>,
    heartbeat: bool,
}

impl SimulatedSource {
    pub fn new(seed: u64, start: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start,
            interval,
            tick: 0,
            limit: None,
            heartbeat: false,
        }
    }

    /// Stop after `ticks` readings
    pub fn with_limit(mut self, ticks: u64) -> Self {
        self.limit = Some(ticks);
        self
    }

    /// Emit one or two RR intervals per tick around 800 ms
    pub fn with_heartbeat(mut self) -> Self {
        self.heartbeat = true;
        self
    }

    fn acceleration(pitch_deg: f64, roll_deg: f64) -> Acceleration {
        let (sin_p, cos_p) = pitch_deg.to_radians().sin_cos();
        let sin_r = roll_deg.to_radians().sin();
        Acceleration {
            ax: sin_p,
            ay: sin_r,
            az: (cos_p * cos_p - sin_r * sin_r).max(0.0).sqrt(),
        }
    }
}

impl SampleSource for SimulatedSource {
    fn next_reading(&mut self) -> Option<RawReading> {
        if self.limit.is_some_and(|limit| self.tick >= limit) {
            return None;
        }
        // Ends the stream once the offset no longer fits
        let offset = i32::try_from(self.tick).ok()?;
        let timestamp = self
            .interval
            .checked_mul(offset)
            .and_then(|elapsed| self.start.checked_add_signed(elapsed))?;

        let t = self.tick as f64;
        let pitch = 15.0 + 5.0 * (t / 20.0).sin();
        let roll = 3.0 * (t / 25.0).cos();
        let conductance = (0.5 + 0.25 * (t / 15.0).sin()).clamp(0.2, 0.8);

        let rr_intervals = if self.heartbeat {
            let beats = self.rng.gen_range(1..=2);
            (0..beats)
                .map(|_| 800.0 + self.rng.gen_range(-50.0..=50.0))
                .collect()
        } else {
            Vec::new()
        };

        let reading = RawReading {
            timestamp,
            acceleration: Self::acceleration(pitch, roll),
            fsr_left: jitter(&mut self.rng, 45000, 3000),
            fsr_right: jitter(&mut self.rng, 48000, 3000),
            fsr_center: jitter(&mut self.rng, 50000, 2000),
            gsr_raw: (conductance * DEFAULT_ADC_FULL_SCALE).round() as u32,
            rr_intervals,
        };

        self.tick += 1;
        Some(reading)
    }
}

fn jitter(rng: &mut StdRng, base: u32, spread: u32) -> u32 {
    rng.gen_range(base - spread..=base + spread)
}

/// Replays pre-recorded readings in order
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    readings: VecDeque<RawReading>,
}

impl ReplaySource {
    pub fn new(readings: Vec<RawReading>) -> Self {
        Self {
            readings: readings.into(),
        }
    }

    /// Parse one JSON reading per line; blank lines are skipped
    pub fn from_ndjson<R: BufRead>(reader: R) -> Result<Self, EngineError> {
        let mut readings = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            readings.push(serde_json::from_str(line)?);
        }
        Ok(Self::new(readings))
    }

    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
}

impl SampleSource for ReplaySource {
    fn next_reading(&mut self) -> Option<RawReading> {
        self.readings.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::orientation;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_simulated_source_is_reproducible() {
        let mut a = SimulatedSource::new(7, t0(), Duration::seconds(1)).with_heartbeat();
        let mut b = SimulatedSource::new(7, t0(), Duration::seconds(1)).with_heartbeat();
        for _ in 0..20 {
            assert_eq!(a.next_reading(), b.next_reading());
        }
    }

    #[test]
    fn test_simulated_source_pattern() {
        let mut source = SimulatedSource::new(42, t0(), Duration::seconds(1)).with_limit(60);
        let mut count = 0;
        while let Some(reading) = source.next_reading() {
            let o = orientation(
                reading.acceleration.ax,
                reading.acceleration.ay,
                reading.acceleration.az,
            );
            let t = count as f64;
            assert!((o.pitch_deg - (15.0 + 5.0 * (t / 20.0).sin())).abs() < 1e-6);
            assert!((o.roll_deg - 3.0 * (t / 25.0).cos()).abs() < 1e-6);
            assert!((42000..=48000).contains(&reading.fsr_left));
            assert!((48000..=52000).contains(&reading.fsr_center));
            assert!(reading.rr_intervals.is_empty());
            assert_eq!(reading.timestamp, t0() + Duration::seconds(count));
            count += 1;
        }
        assert_eq!(count, 60);
    }

    #[test]
    fn test_simulated_source_ends_when_offset_overflows() {
        let mut source = SimulatedSource::new(3, t0(), Duration::seconds(1));
        source.tick = i32::MAX as u64;
        let last = source.next_reading().unwrap();
        assert_eq!(last.timestamp, t0() + Duration::seconds(i32::MAX as i64));

        assert!(source.next_reading().is_none());
        assert!(source.next_reading().is_none());
    }

    #[test]
    fn test_simulated_source_ends_past_representable_time() {
        let mut source = SimulatedSource::new(3, t0(), Duration::days(365_000));
        assert!(source.next_reading().is_some());
        source.tick = 1_000;
        assert!(source.next_reading().is_none());
    }

    #[test]
    fn test_replay_source_from_ndjson() {
        let first = serde_json::json!({
            "timestamp": "2024-01-15T09:00:00Z",
            "acceleration": {"ax": 0.0, "ay": 0.0, "az": 1.0},
            "fsr_left": 1, "fsr_right": 2, "fsr_center": 3
        });
        let second = serde_json::json!({
            "timestamp": "2024-01-15T09:00:01Z",
            "acceleration": {"ax": 0.5, "ay": 0.0, "az": 1.0},
            "fsr_left": 4, "fsr_right": 5, "fsr_center": 6,
            "gsr_raw": 100, "rr_intervals": [800.0]
        });
        let input = format!("{first}\n\n{second}\n");
        let mut source = ReplaySource::from_ndjson(input.as_bytes()).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_reading().unwrap();
        assert_eq!(first.gsr_raw, 0);
        let second = source.next_reading().unwrap();
        assert_eq!(second.rr_intervals, vec![800.0]);
        assert!(source.next_reading().is_none());
    }

    #[test]
    fn test_replay_source_rejects_malformed_line() {
        let result = ReplaySource::from_ndjson("{not json}\n".as_bytes());
        assert!(matches!(result, Err(EngineError::Json(_))));
    }
}
