//! Session aggregate
//!
//! A session accumulates running statistics over the samples recorded into
//! it and latches alerts once their thresholds are crossed. The type is a
//! pure state machine: every operation receives `now` from the caller, and
//! all preconditions are checked before any field changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AlertPolicy;
use crate::error::EngineError;
use crate::rr_history::RrHistory;
use crate::types::{OwnerId, Sample, SessionId, SessionState, SessionStats};

/// Alerts that flipped during a single `record` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub break_alert_raised: bool,
    pub excessive_buzzer_alert_raised: bool,
}

/// One bounded monitoring interval and its running aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) owner: OwnerId,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    /// Seconds from start to end, frozen at close
    pub(crate) total_duration: Option<u64>,
    /// Seated sample count (one per tick)
    pub(crate) sitting_duration: u64,
    pub(crate) sample_count: u64,
    pub(crate) score_sum: f64,
    pub(crate) scored_samples: u64,
    pub(crate) buzzer_count: u64,
    pub(crate) break_alert: bool,
    pub(crate) excessive_buzzer_alert: bool,
    pub(crate) rr_history: RrHistory,
}

impl Session {
    /// Start a new open session
    pub fn open(owner: OwnerId, now: DateTime<Utc>, rr_history_len: usize) -> Self {
        Self {
            id: SessionId::new(),
            owner,
            start_time: now,
            end_time: None,
            total_duration: None,
            sitting_duration: 0,
            sample_count: 0,
            score_sum: 0.0,
            scored_samples: 0,
            buzzer_count: 0,
            break_alert: false,
            excessive_buzzer_alert: false,
            rr_history: RrHistory::new(rr_history_len),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn total_duration(&self) -> Option<u64> {
        self.total_duration
    }

    pub fn state(&self) -> SessionState {
        if self.end_time.is_some() {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn sitting_duration(&self) -> u64 {
        self.sitting_duration
    }

    pub fn buzzer_count(&self) -> u64 {
        self.buzzer_count
    }

    pub fn break_alert(&self) -> bool {
        self.break_alert
    }

    pub fn excessive_buzzer_alert(&self) -> bool {
        self.excessive_buzzer_alert
    }

    pub fn rr_history(&self) -> &RrHistory {
        &self.rr_history
    }

    /// Mean of all recorded stress scores; 0 before the first scored sample
    pub fn session_score(&self) -> f64 {
        if self.scored_samples == 0 {
            0.0
        } else {
            self.score_sum / self.scored_samples as f64
        }
    }

    /// Record one sample.
    ///
    /// Fails with `SessionClosed` on a closed session and `InvalidSample` on
    /// unusable numeric fields; in both cases the session is untouched.
    pub fn record(
        &mut self,
        sample: &Sample,
        now: DateTime<Utc>,
        policy: &AlertPolicy,
    ) -> Result<RecordOutcome, EngineError> {
        if !self.is_open() {
            return Err(EngineError::SessionClosed(self.id));
        }
        sample.validate()?;

        let mut outcome = RecordOutcome::default();

        self.sample_count += 1;
        self.rr_history.extend(&sample.rr_intervals);

        if sample.is_seated {
            self.sitting_duration += 1;
        }

        if sample.buzzer_triggered {
            self.buzzer_count += 1;
            if self.buzzer_count >= policy.excessive_buzzer_count && !self.excessive_buzzer_alert {
                self.excessive_buzzer_alert = true;
                outcome.excessive_buzzer_alert_raised = true;
            }
        }

        if let Some(score) = sample.stress_score {
            self.score_sum += score;
            self.scored_samples += 1;
        }

        if !self.break_alert && (now - self.start_time).num_seconds() > policy.break_after_secs {
            self.break_alert = true;
            outcome.break_alert_raised = true;
        }

        Ok(outcome)
    }

    /// Close the session. Returns false if it was already closed, in which
    /// case nothing changes.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.end_time = Some(now);
        self.total_duration = Some(whole_seconds(self.start_time, now));
        true
    }

    /// Seconds from start to end, or to `now` while open
    pub fn duration_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.total_duration {
            Some(total) => total,
            None => whole_seconds(self.start_time, now),
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SessionStats {
        let duration_secs = self.duration_secs(now);
        let sitting_percentage = if duration_secs == 0 {
            0.0
        } else {
            100.0 * self.sitting_duration as f64 / duration_secs as f64
        };

        SessionStats {
            id: self.id,
            state: self.state(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_secs,
            sitting_duration: self.sitting_duration,
            sitting_percentage,
            session_score: self.session_score(),
            scored_samples: self.scored_samples,
            sample_count: self.sample_count,
            buzzer_count: self.buzzer_count,
            break_alert: self.break_alert,
            excessive_buzzer_alert: self.excessive_buzzer_alert,
        }
    }
}

fn whole_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn make_sample(at: DateTime<Utc>, seated: bool, buzz: bool, score: Option<f64>) -> Sample {
        Sample {
            timestamp: at,
            pitch: 10.0,
            roll: 0.0,
            fsr_left: 45000,
            fsr_right: 48000,
            fsr_center: if seated { 50000 } else { 0 },
            gsr_raw: 0,
            rr_intervals: vec![],
            is_seated: seated,
            stress_score: score,
            buzzer_triggered: buzz,
        }
    }

    #[test]
    fn test_five_sample_scenario() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);

        for i in 0..5 {
            let at = t0() + Duration::seconds(i);
            let last = i == 4;
            let score = if last { 0.9 } else { 0.1 };
            session
                .record(&make_sample(at, true, last, Some(score)), at, &policy)
                .unwrap();
        }

        let stats = session.stats(t0() + Duration::seconds(4));
        assert_eq!(stats.sitting_duration, 5);
        assert_eq!(stats.buzzer_count, 1);
        assert!(!stats.excessive_buzzer_alert);
        assert!((stats.session_score - 0.26).abs() < 1e-9);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn test_excessive_buzzer_latches_at_threshold() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);

        for i in 0..4 {
            let outcome = session
                .record(&make_sample(t0(), false, true, None), t0(), &policy)
                .unwrap();
            assert!(!outcome.excessive_buzzer_alert_raised, "raised early at {i}");
        }
        assert!(!session.excessive_buzzer_alert());

        let outcome = session
            .record(&make_sample(t0(), false, true, None), t0(), &policy)
            .unwrap();
        assert!(outcome.excessive_buzzer_alert_raised);
        assert!(session.excessive_buzzer_alert());

        let outcome = session
            .record(&make_sample(t0(), false, false, None), t0(), &policy)
            .unwrap();
        assert!(!outcome.excessive_buzzer_alert_raised);
        assert!(session.excessive_buzzer_alert());
        assert_eq!(session.buzzer_count(), 5);
    }

    #[test]
    fn test_break_alert_after_threshold() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);

        let at_limit = t0() + Duration::seconds(7200);
        session
            .record(&make_sample(at_limit, true, false, None), at_limit, &policy)
            .unwrap();
        assert!(!session.break_alert());

        let past = at_limit + Duration::seconds(1);
        let outcome = session
            .record(&make_sample(past, true, false, None), past, &policy)
            .unwrap();
        assert!(outcome.break_alert_raised);
        assert!(session.break_alert());

        // Stays latched, and is not re-raised
        let outcome = session
            .record(&make_sample(past, true, false, None), past, &policy)
            .unwrap();
        assert!(!outcome.break_alert_raised);
        assert!(session.break_alert());
    }

    #[test]
    fn test_break_threshold_at_i64_max_never_fires() {
        let policy = AlertPolicy {
            break_after_secs: i64::MAX,
            ..AlertPolicy::default()
        };
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);

        let much_later = t0() + Duration::days(365 * 100);
        let outcome = session
            .record(&make_sample(much_later, true, false, None), much_later, &policy)
            .unwrap();
        assert!(!outcome.break_alert_raised);
        assert!(!session.break_alert());
    }

    #[test]
    fn test_record_after_close_fails_without_mutation() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);
        session
            .record(&make_sample(t0(), true, false, Some(0.5)), t0(), &policy)
            .unwrap();
        assert!(session.close(t0() + Duration::seconds(10)));

        let before = session.clone();
        let err = session
            .record(&make_sample(t0(), true, true, Some(0.9)), t0(), &policy)
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionClosed(id) if id == session.id()));
        assert_eq!(session, before);
    }

    #[test]
    fn test_invalid_sample_leaves_session_untouched() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);
        let before = session.clone();

        let mut sample = make_sample(t0(), true, true, Some(0.5));
        sample.roll = f64::NAN;
        let err = session.record(&sample, t0(), &policy).unwrap_err();

        assert!(matches!(err, EngineError::InvalidSample(_)));
        assert_eq!(session, before);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);
        assert!(session.close(t0() + Duration::seconds(90)));
        let first = session.clone();

        assert!(!session.close(t0() + Duration::seconds(500)));
        assert_eq!(session, first);
        assert_eq!(session.total_duration(), Some(90));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_empty_session_stats() {
        let session = Session::open(OwnerId::from("alice"), t0(), 60);
        let stats = session.stats(t0());

        assert_eq!(stats.session_score, 0.0);
        assert_eq!(stats.duration_secs, 0);
        assert_eq!(stats.sitting_percentage, 0.0);
        assert_eq!(stats.state, SessionState::Open);
    }

    #[test]
    fn test_sitting_percentage_counts_ticks() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);
        for i in 0..3 {
            let at = t0() + Duration::seconds(i);
            session
                .record(&make_sample(at, i != 1, false, None), at, &policy)
                .unwrap();
        }
        session.close(t0() + Duration::seconds(4));

        let stats = session.stats(t0() + Duration::hours(1));
        assert_eq!(stats.duration_secs, 4);
        assert_eq!(stats.sitting_duration, 2);
        assert!((stats.sitting_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_unscored_samples_do_not_dilute_mean() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 60);
        session
            .record(&make_sample(t0(), true, false, Some(0.4)), t0(), &policy)
            .unwrap();
        session
            .record(&make_sample(t0(), true, false, None), t0(), &policy)
            .unwrap();

        assert!((session.session_score() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_record_extends_rr_history() {
        let policy = AlertPolicy::default();
        let mut session = Session::open(OwnerId::from("alice"), t0(), 3);
        let mut sample = make_sample(t0(), true, false, None);
        sample.rr_intervals = vec![800.0, 810.0, 820.0, 830.0];
        session.record(&sample, t0(), &policy).unwrap();

        assert_eq!(session.rr_history().to_vec(), vec![810.0, 820.0, 830.0]);
    }
}
