//! Pipeline orchestration
//!
//! Per-tick monitoring loop: read a raw reading from the sample source,
//! interpret it against the session's RR window, drive the effector, then
//! record the classified sample into the aggregator.

use log::debug;

use crate::aggregator::SessionAggregator;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::device::{Effector, SampleSource};
use crate::error::EngineError;
use crate::interpreter::{Interpretation, SignalInterpreter};
use crate::rr_history::RrHistory;
use crate::session::RecordOutcome;
use crate::store::SessionStore;
use crate::types::{OwnerId, RawReading, Sample, SessionId, SessionStats};

/// Classify a batch of raw readings without a session.
///
/// RR intervals accumulate across the batch in a window sized by
/// `config.rr_history_len`, as they would inside a live session.
pub fn classify_readings<I>(readings: I, config: &EngineConfig) -> Vec<Sample>
where
    I: IntoIterator<Item = RawReading>,
{
    let interpreter = SignalInterpreter::new(config);
    let mut history = RrHistory::new(config.rr_history_len);

    readings
        .into_iter()
        .map(|raw| {
            history.extend(&raw.rr_intervals);
            let interpretation = interpreter.interpret(&raw, &history.to_vec());
            interpreter.to_sample(&raw, &interpretation, interpretation.posture.needs_correction())
        })
        .collect()
}

/// Four short display lines describing one interpretation
pub fn status_lines(interpretation: &Interpretation) -> Vec<String> {
    let posture = &interpretation.posture;
    let stress = &interpretation.stress;
    let hrv = match stress.components.hrv {
        Some(hrv) => format!("{hrv:.1}"),
        None => "n/a".to_string(),
    };

    vec![
        format!(
            "Posture: {}",
            if posture.seated { "Seated" } else { "Away" }
        ),
        format!(
            "Pitch:{:.1} Fwd:{}",
            interpretation.orientation.pitch_deg, posture.forward_lean
        ),
        format!(
            "Slouch:{} Imbal:{}",
            posture.torso_slouch, posture.weight_imbalance
        ),
        format!("Stress:{:.2} HRV:{}", stress.score, hrv),
    ]
}

/// Result of one pipeline tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub interpretation: Interpretation,
    pub sample: Sample,
    pub outcome: RecordOutcome,
    /// Buzzer pulses issued this tick (posture and stress combined)
    pub buzzes: u32,
}

/// Live monitoring of one owner's session.
///
/// The pipeline owns its source, effector and aggregator; hardware choice
/// is made by whoever constructs it.
pub struct MonitorPipeline<Src, E, S, C>
where
    Src: SampleSource,
    E: Effector,
    S: SessionStore,
    C: Clock,
{
    source: Src,
    effector: E,
    aggregator: SessionAggregator<S, C>,
    interpreter: SignalInterpreter,
    owner: OwnerId,
    session: Option<SessionId>,
}

impl<Src, E, S, C> MonitorPipeline<Src, E, S, C>
where
    Src: SampleSource,
    E: Effector,
    S: SessionStore,
    C: Clock,
{
    pub fn new(
        source: Src,
        effector: E,
        aggregator: SessionAggregator<S, C>,
        owner: OwnerId,
    ) -> Self {
        let interpreter = SignalInterpreter::new(aggregator.config());
        Self {
            source,
            effector,
            aggregator,
            interpreter,
            owner,
            session: None,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    pub fn aggregator(&self) -> &SessionAggregator<S, C> {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut SessionAggregator<S, C> {
        &mut self.aggregator
    }

    pub fn into_parts(self) -> (Src, E, SessionAggregator<S, C>) {
        (self.source, self.effector, self.aggregator)
    }

    /// Open a fresh session, closing any session the owner still has open
    pub fn start(&mut self) -> Result<SessionId, EngineError> {
        let session = self.aggregator.open(&self.owner)?;
        self.session = Some(session.id());
        Ok(session.id())
    }

    fn ensure_started(&mut self) -> Result<SessionId, EngineError> {
        match self.session {
            Some(id) => Ok(id),
            None => self.start(),
        }
    }

    /// Process one reading. Returns `None` when the source is exhausted.
    ///
    /// The display and buzzer are driven only after the sample is recorded.
    pub fn tick(&mut self) -> Result<Option<TickReport>, EngineError> {
        let id = self.ensure_started()?;
        let raw = match self.source.next_reading() {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let rr_window = self.aggregator.rr_window(&self.owner, id, &raw.rr_intervals)?;
        let interpretation = self.interpreter.interpret(&raw, &rr_window);
        let corrective = interpretation.posture.needs_correction();

        let sample = self.interpreter.to_sample(&raw, &interpretation, corrective);
        let outcome = self.aggregator.record(&self.owner, id, &sample)?;

        self.effector.show_status(&status_lines(&interpretation));

        let mut buzzes = 0;
        if corrective {
            self.effector.buzz(1);
            buzzes += 1;
        }
        if interpretation.stress.score >= self.interpreter.stress_weights().stress_alert_score {
            self.effector.buzz(2);
            buzzes += 2;
        }
        debug!("Tick for session {} issued {} buzz pulses", id, buzzes);

        Ok(Some(TickReport {
            interpretation,
            sample,
            outcome,
            buzzes,
        }))
    }

    /// Tick until the source is exhausted or `max_ticks` readings are
    /// processed. Returns the number processed.
    pub fn run(&mut self, max_ticks: Option<u64>) -> Result<u64, EngineError> {
        let mut processed = 0;
        while max_ticks.map_or(true, |max| processed < max) {
            if self.tick()?.is_none() {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Close the live session and return its final stats
    pub fn finish(&mut self) -> Result<SessionStats, EngineError> {
        let id = self.ensure_started()?;
        self.aggregator.close(&self.owner, id)?;
        self.session = None;
        self.aggregator.stats(&self.owner, id)
    }
}
