//! Session persistence
//!
//! The aggregator reads and writes sessions through a `SessionStore` handle
//! that is constructed explicitly and passed in. Backends:
//! - `MemoryStore`: in-process maps, the default
//! - `SqliteStore`: SQLite file or in-memory database (feature `sqlite`)

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::session::Session;
use crate::types::{OwnerId, Sample, SessionId};

/// Persistence boundary for sessions and their readings
pub trait SessionStore {
    /// Persist a newly opened session, first saving `closed_prior` (the
    /// owner's previously open session, already closed) when present.
    /// Both writes land together or not at all.
    fn start_session(
        &mut self,
        closed_prior: Option<&Session>,
        opened: &Session,
    ) -> Result<(), StoreError>;

    /// Overwrite a session's aggregate fields
    fn update_session(&mut self, session: &Session) -> Result<(), StoreError>;

    /// Append a reading and save the session aggregates it produced, atomically
    fn append_reading(&mut self, session: &Session, sample: &Sample) -> Result<(), StoreError>;

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// The owner's session without an end time, if any
    fn open_session_for(&self, owner: &OwnerId) -> Result<Option<Session>, StoreError>;

    /// All of an owner's sessions, most recent start first
    fn sessions_for(&self, owner: &OwnerId) -> Result<Vec<Session>, StoreError>;

    /// A session's readings in recording order
    fn readings(&self, id: SessionId) -> Result<Vec<Sample>, StoreError>;
}
