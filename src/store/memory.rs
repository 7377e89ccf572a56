//! In-memory session store

use std::collections::HashMap;

use crate::error::StoreError;
use crate::session::Session;
use crate::store::SessionStore;
use crate::types::{OwnerId, Sample, SessionId};

/// In-memory session store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: HashMap<SessionId, Session>,
    readings: HashMap<SessionId, Vec<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn ensure_known(&self, id: SessionId) -> Result<(), StoreError> {
        if self.sessions.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::UnknownSession(id))
        }
    }
}

impl SessionStore for MemoryStore {
    fn start_session(
        &mut self,
        closed_prior: Option<&Session>,
        opened: &Session,
    ) -> Result<(), StoreError> {
        if let Some(prior) = closed_prior {
            self.ensure_known(prior.id)?;
            self.sessions.insert(prior.id, prior.clone());
        }
        self.sessions.insert(opened.id, opened.clone());
        self.readings.entry(opened.id).or_default();
        Ok(())
    }

    fn update_session(&mut self, session: &Session) -> Result<(), StoreError> {
        self.ensure_known(session.id)?;
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn append_reading(&mut self, session: &Session, sample: &Sample) -> Result<(), StoreError> {
        self.ensure_known(session.id)?;
        self.sessions.insert(session.id, session.clone());
        self.readings
            .entry(session.id)
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(&id).cloned())
    }

    fn open_session_for(&self, owner: &OwnerId) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .values()
            .filter(|s| &s.owner == owner && s.is_open())
            .max_by_key(|s| s.start_time)
            .cloned())
    }

    fn sessions_for(&self, owner: &OwnerId) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    fn readings(&self, id: SessionId) -> Result<Vec<Sample>, StoreError> {
        Ok(self.readings.get(&id).cloned().unwrap_or_default())
    }
}
