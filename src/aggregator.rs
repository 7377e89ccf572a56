//! Session Aggregator
//!
//! Service over a `SessionStore` and a `Clock`. It enforces ownership and
//! the one-open-session-per-owner rule, runs `Session::record` on a copy of
//! the stored aggregate, and commits the result together with the reading so
//! that a failed call leaves the store unchanged.

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::{RecordOutcome, Session};
use crate::store::SessionStore;
use crate::types::{OwnerId, OwnerSummary, Sample, SessionDetail, SessionId, SessionStats};

/// Stateful session service for any number of owners
pub struct SessionAggregator<S: SessionStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
    config: EngineConfig,
}

impl<S: SessionStore> SessionAggregator<S, SystemClock> {
    /// Create an aggregator on the system clock
    pub fn with_system_clock(store: S, config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(store, SystemClock, config)
    }
}

impl<S: SessionStore, C: Clock> SessionAggregator<S, C> {
    /// Create an aggregator; the configuration is validated up front
    pub fn new(store: S, clock: C, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Release the store handle, e.g. to close a database
    pub fn into_store(self) -> S {
        self.store
    }

    /// Open a new session for `owner`.
    ///
    /// An already open session of the same owner is closed first, with its
    /// end time set to now.
    pub fn open(&mut self, owner: &OwnerId) -> Result<Session, EngineError> {
        let now = self.clock.now();

        let closed_prior = match self.store.open_session_for(owner)? {
            Some(mut prior) => {
                prior.close(now);
                warn!(
                    "Force-closed open session {} for {} after {}s",
                    prior.id(),
                    owner,
                    prior.duration_secs(now)
                );
                Some(prior)
            }
            None => None,
        };

        let session = Session::open(owner.clone(), now, self.config.rr_history_len);
        self.store.start_session(closed_prior.as_ref(), &session)?;

        info!("Opened session {} for {}", session.id(), owner);
        Ok(session)
    }

    /// Record one classified sample into an open session
    pub fn record(
        &mut self,
        owner: &OwnerId,
        id: SessionId,
        sample: &Sample,
    ) -> Result<RecordOutcome, EngineError> {
        let mut session = self.owned(owner, id)?;
        let now = self.clock.now();

        let outcome = match session.record(sample, now, &self.config.alerts) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Rejected sample for session {}: {}", id, e);
                return Err(e);
            }
        };

        self.store.append_reading(&session, sample)?;

        debug!(
            "Recorded sample into {} (seated={}, buzz={}, score={:?})",
            id, sample.is_seated, sample.buzzer_triggered, sample.stress_score
        );
        if outcome.excessive_buzzer_alert_raised {
            warn!(
                "Excessive posture corrections in session {} ({} buzzes)",
                id,
                session.buzzer_count()
            );
        }
        if outcome.break_alert_raised {
            warn!(
                "Break needed: session {} open for {}s",
                id,
                session.duration_secs(now)
            );
        }

        Ok(outcome)
    }

    /// Close a session; closing a closed session returns it unchanged
    pub fn close(&mut self, owner: &OwnerId, id: SessionId) -> Result<Session, EngineError> {
        let mut session = self.owned(owner, id)?;
        let now = self.clock.now();

        if session.close(now) {
            self.store.update_session(&session)?;
            info!(
                "Closed session {} for {} after {}s",
                id,
                owner,
                session.duration_secs(now)
            );
        } else {
            debug!("Session {} already closed", id);
        }

        Ok(session)
    }

    pub fn stats(&self, owner: &OwnerId, id: SessionId) -> Result<SessionStats, EngineError> {
        let session = self.owned(owner, id)?;
        Ok(session.stats(self.clock.now()))
    }

    /// The session's RR window as it will look once `pending` is recorded
    pub fn rr_window(
        &self,
        owner: &OwnerId,
        id: SessionId,
        pending: &[f64],
    ) -> Result<Vec<f64>, EngineError> {
        let session = self.owned(owner, id)?;
        Ok(session.rr_history().preview(pending))
    }

    /// Stats for every session of `owner`, most recent start first
    pub fn sessions(&self, owner: &OwnerId) -> Result<Vec<SessionStats>, EngineError> {
        let now = self.clock.now();
        Ok(self
            .store
            .sessions_for(owner)?
            .iter()
            .map(|s| s.stats(now))
            .collect())
    }

    pub fn detail(&self, owner: &OwnerId, id: SessionId) -> Result<SessionDetail, EngineError> {
        let session = self.owned(owner, id)?;
        let readings = self.store.readings(id)?;
        Ok(SessionDetail {
            stats: session.stats(self.clock.now()),
            readings,
        })
    }

    /// Dashboard totals across all of an owner's sessions
    pub fn owner_summary(&self, owner: &OwnerId) -> Result<OwnerSummary, EngineError> {
        let sessions = self.store.sessions_for(owner)?;

        let total_sessions = sessions.len();
        let total_sitting_ticks = sessions.iter().map(|s| s.sitting_duration()).sum();
        let avg_session_score = if total_sessions == 0 {
            0.0
        } else {
            sessions.iter().map(|s| s.session_score()).sum::<f64>() / total_sessions as f64
        };

        Ok(OwnerSummary {
            owner: owner.clone(),
            total_sessions,
            total_sitting_ticks,
            avg_session_score,
            break_alerts: sessions.iter().filter(|s| s.break_alert()).count(),
            buzzer_alerts: sessions.iter().filter(|s| s.excessive_buzzer_alert()).count(),
        })
    }

    /// Load a session, treating another owner's session as missing
    fn owned(&self, owner: &OwnerId, id: SessionId) -> Result<Session, EngineError> {
        match self.store.session(id)? {
            Some(session) if session.owner() == owner => Ok(session),
            _ => Err(EngineError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::SessionState;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn make_aggregator() -> (SessionAggregator<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(t0());
        let aggregator =
            SessionAggregator::new(MemoryStore::new(), clock.clone(), EngineConfig::default())
                .unwrap();
        (aggregator, clock)
    }

    fn make_sample(seated: bool, buzz: bool, score: Option<f64>) -> Sample {
        Sample {
            timestamp: t0(),
            pitch: 8.0,
            roll: 1.0,
            fsr_left: 45000,
            fsr_right: 48000,
            fsr_center: if seated { 50000 } else { 0 },
            gsr_raw: 12000,
            rr_intervals: vec![],
            is_seated: seated,
            stress_score: score,
            buzzer_triggered: buzz,
        }
    }

    #[test]
    fn test_open_record_close_scenario() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        for i in 0..5 {
            let last = i == 4;
            let score = if last { 0.9 } else { 0.1 };
            agg.record(&owner, session.id(), &make_sample(true, last, Some(score)))
                .unwrap();
            if !last {
                clock.advance(Duration::seconds(1));
            }
        }

        let stats = agg.stats(&owner, session.id()).unwrap();
        assert_eq!(stats.sitting_duration, 5);
        assert_eq!(stats.buzzer_count, 1);
        assert!(!stats.excessive_buzzer_alert);
        assert!((stats.session_score - 0.26).abs() < 1e-9);
        assert_eq!(stats.duration_secs, 4);

        let closed = agg.close(&owner, session.id()).unwrap();
        assert_eq!(closed.state(), SessionState::Closed);
        assert_eq!(closed.total_duration(), Some(4));
    }

    #[test]
    fn test_open_force_closes_prior_session() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let first = agg.open(&owner).unwrap();

        clock.advance(Duration::minutes(10));
        let second = agg.open(&owner).unwrap();

        let first_stats = agg.stats(&owner, first.id()).unwrap();
        assert_eq!(first_stats.state, SessionState::Closed);
        assert_eq!(first_stats.end_time, Some(t0() + Duration::minutes(10)));
        assert_eq!(first_stats.duration_secs, 600);

        let listed = agg.sessions(&owner).unwrap();
        let ids: Vec<SessionId> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id(), first.id()]);
        assert_eq!(
            listed.iter().filter(|s| s.state == SessionState::Open).count(),
            1
        );
    }

    #[test]
    fn test_other_owner_sees_not_found() {
        let (mut agg, _clock) = make_aggregator();
        let alice = OwnerId::from("alice");
        let bob = OwnerId::from("bob");
        let session = agg.open(&alice).unwrap();

        let err = agg
            .record(&bob, session.id(), &make_sample(true, false, Some(0.2)))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(id) if id == session.id()));
        assert!(matches!(
            agg.close(&bob, session.id()),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            agg.stats(&alice, SessionId::new()),
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(agg.stats(&alice, session.id()).unwrap().sample_count, 0);
    }

    #[test]
    fn test_record_after_close_is_rejected() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();
        agg.record(&owner, session.id(), &make_sample(true, false, Some(0.3)))
            .unwrap();
        clock.advance(Duration::seconds(30));
        agg.close(&owner, session.id()).unwrap();

        let before = agg.detail(&owner, session.id()).unwrap();
        let err = agg
            .record(&owner, session.id(), &make_sample(true, true, Some(0.9)))
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionClosed(_)));
        assert_eq!(agg.detail(&owner, session.id()).unwrap(), before);
    }

    #[test]
    fn test_invalid_sample_is_not_stored() {
        let (mut agg, _clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        let mut sample = make_sample(true, true, Some(0.5));
        sample.pitch = f64::INFINITY;
        let err = agg.record(&owner, session.id(), &sample).unwrap_err();

        assert!(matches!(err, EngineError::InvalidSample(_)));
        let detail = agg.detail(&owner, session.id()).unwrap();
        assert!(detail.readings.is_empty());
        assert_eq!(detail.stats.buzzer_count, 0);
    }

    #[test]
    fn test_close_twice_keeps_first_end_time() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        clock.advance(Duration::seconds(45));
        let first = agg.close(&owner, session.id()).unwrap();
        clock.advance(Duration::hours(1));
        let second = agg.close(&owner, session.id()).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.total_duration(), Some(45));
    }

    #[test]
    fn test_break_alert_follows_clock() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        clock.advance(Duration::seconds(7200));
        let outcome = agg
            .record(&owner, session.id(), &make_sample(true, false, None))
            .unwrap();
        assert!(!outcome.break_alert_raised);

        clock.advance(Duration::seconds(1));
        let outcome = agg
            .record(&owner, session.id(), &make_sample(true, false, None))
            .unwrap();
        assert!(outcome.break_alert_raised);
        assert!(agg.stats(&owner, session.id()).unwrap().break_alert);
    }

    #[test]
    fn test_running_mean_matches_recomputed_mean() {
        let (mut agg, _clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        let scores = [
            Some(0.13),
            Some(0.71),
            None,
            Some(0.05),
            Some(0.999),
            Some(0.42),
            None,
            Some(0.3333),
        ];
        for score in scores {
            agg.record(&owner, session.id(), &make_sample(true, false, score))
                .unwrap();
        }

        let detail = agg.detail(&owner, session.id()).unwrap();
        let scored: Vec<f64> = detail
            .readings
            .iter()
            .filter_map(|r| r.stress_score)
            .collect();
        let recomputed = scored.iter().sum::<f64>() / scored.len() as f64;

        assert_eq!(detail.stats.session_score, recomputed);
        assert_eq!(detail.stats.scored_samples, scored.len() as u64);
        assert_eq!(detail.stats.sample_count, scores.len() as u64);
    }

    #[test]
    fn test_rr_window_previews_pending_intervals() {
        let (mut agg, _clock) = make_aggregator();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        let mut sample = make_sample(true, false, None);
        sample.rr_intervals = vec![800.0, 820.0];
        agg.record(&owner, session.id(), &sample).unwrap();

        let window = agg.rr_window(&owner, session.id(), &[790.0]).unwrap();
        assert_eq!(window, vec![800.0, 820.0, 790.0]);
        assert_eq!(
            agg.rr_window(&owner, session.id(), &[]).unwrap(),
            vec![800.0, 820.0]
        );
    }

    #[test]
    fn test_owner_summary_totals() {
        let (mut agg, clock) = make_aggregator();
        let owner = OwnerId::from("alice");

        let first = agg.open(&owner).unwrap();
        for _ in 0..5 {
            agg.record(&owner, first.id(), &make_sample(true, true, Some(0.2)))
                .unwrap();
        }
        clock.advance(Duration::minutes(5));
        agg.close(&owner, first.id()).unwrap();

        let second = agg.open(&owner).unwrap();
        agg.record(&owner, second.id(), &make_sample(false, false, Some(0.6)))
            .unwrap();

        let summary = agg.owner_summary(&owner).unwrap();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.total_sitting_ticks, 5);
        assert!((summary.avg_session_score - 0.4).abs() < 1e-9);
        assert_eq!(summary.buzzer_alerts, 1);
        assert_eq!(summary.break_alerts, 0);

        let empty = agg.owner_summary(&OwnerId::from("nobody")).unwrap();
        assert_eq!(empty.total_sessions, 0);
        assert_eq!(empty.avg_session_score, 0.0);
    }

    #[test]
    fn test_unbounded_break_threshold_records_normally() {
        let json = r#"{"alerts": {"break_after_secs": 9223372036854775807}}"#;
        let config = EngineConfig::from_json(json).unwrap();
        let clock = ManualClock::new(t0());
        let mut agg = SessionAggregator::new(MemoryStore::new(), clock.clone(), config).unwrap();
        let owner = OwnerId::from("alice");
        let session = agg.open(&owner).unwrap();

        clock.advance(Duration::days(30));
        let outcome = agg
            .record(&owner, session.id(), &make_sample(true, false, Some(0.4)))
            .unwrap();
        assert!(!outcome.break_alert_raised);
        assert_eq!(agg.stats(&owner, session.id()).unwrap().sample_count, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.alerts.excessive_buzzer_count = 0;
        let result = SessionAggregator::new(MemoryStore::new(), ManualClock::new(t0()), config);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
