//! SQLite session store
//!
//! Sessions and readings live in two tables; the schema version is tracked
//! with `PRAGMA user_version`. Timestamps are stored as fixed-width RFC 3339
//! text with nanosecond precision.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::error::StoreError;
use crate::rr_history::RrHistory;
use crate::session::Session;
use crate::store::SessionStore;
use crate::types::{OwnerId, Sample, SessionId};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    total_duration INTEGER,
    sitting_duration INTEGER NOT NULL DEFAULT 0,
    sample_count INTEGER NOT NULL DEFAULT 0,
    score_sum REAL NOT NULL DEFAULT 0,
    scored_samples INTEGER NOT NULL DEFAULT 0,
    buzzer_count INTEGER NOT NULL DEFAULT 0,
    break_alert INTEGER NOT NULL DEFAULT 0,
    excessive_buzzer_alert INTEGER NOT NULL DEFAULT 0,
    rr_history_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_owner_start ON sessions (owner_id, start_time DESC);

CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions (id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    pitch REAL NOT NULL,
    roll REAL NOT NULL,
    fsr_left INTEGER NOT NULL,
    fsr_right INTEGER NOT NULL,
    fsr_center INTEGER NOT NULL,
    gsr_raw INTEGER NOT NULL,
    rr_intervals_json TEXT NOT NULL,
    is_seated INTEGER NOT NULL,
    stress_score REAL,
    buzzer_triggered INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_readings_session ON readings (session_id, id);
";

const SESSION_COLUMNS: &str = "id, owner_id, start_time, end_time, total_duration, \
    sitting_duration, sample_count, score_sum, scored_samples, buzzer_count, \
    break_alert, excessive_buzzer_alert, rr_history_json";

/// SQLite-backed session store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and migrate it
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!("Session store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Close the underlying connection, surfacing any flush error
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::from(e))
    }

    fn query_sessions(&self, sql: &str, param: &str) -> Result<Vec<Session>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![param])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Backend(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| {
        StoreError::Corrupt(format!("{field} value {value} exceeds SQLite INTEGER range"))
    })
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{field} contains negative value {value}")))
}

fn format_datetime(value: DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid {field} '{value}': {e}")))
}

fn row_to_session(row: &Row) -> Result<Session, StoreError> {
    let id: String = row.get("id")?;
    let owner: String = row.get("owner_id")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let total_duration: Option<i64> = row.get("total_duration")?;
    let rr_json: String = row.get("rr_history_json")?;

    let id: SessionId = id
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("invalid session id '{id}': {e}")))?;
    let rr_history: RrHistory = serde_json::from_str(&rr_json)
        .map_err(|e| StoreError::Corrupt(format!("invalid rr history for {id}: {e}")))?;

    Ok(Session {
        id,
        owner: OwnerId::new(owner),
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: end_time
            .map(|raw| parse_datetime(&raw, "end_time"))
            .transpose()?,
        total_duration: total_duration
            .map(|v| to_u64(v, "total_duration"))
            .transpose()?,
        sitting_duration: to_u64(row.get("sitting_duration")?, "sitting_duration")?,
        sample_count: to_u64(row.get("sample_count")?, "sample_count")?,
        score_sum: row.get("score_sum")?,
        scored_samples: to_u64(row.get("scored_samples")?, "scored_samples")?,
        buzzer_count: to_u64(row.get("buzzer_count")?, "buzzer_count")?,
        break_alert: row.get("break_alert")?,
        excessive_buzzer_alert: row.get("excessive_buzzer_alert")?,
        rr_history,
    })
}

fn row_to_sample(row: &Row) -> Result<Sample, StoreError> {
    let timestamp: String = row.get("timestamp")?;
    let rr_json: String = row.get("rr_intervals_json")?;

    Ok(Sample {
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        pitch: row.get("pitch")?,
        roll: row.get("roll")?,
        fsr_left: row.get("fsr_left")?,
        fsr_right: row.get("fsr_right")?,
        fsr_center: row.get("fsr_center")?,
        gsr_raw: row.get("gsr_raw")?,
        rr_intervals: serde_json::from_str(&rr_json)
            .map_err(|e| StoreError::Corrupt(format!("invalid rr intervals: {e}")))?,
        is_seated: row.get("is_seated")?,
        stress_score: row.get("stress_score")?,
        buzzer_triggered: row.get("buzzer_triggered")?,
    })
}

fn insert_session(tx: &Transaction<'_>, session: &Session) -> Result<(), StoreError> {
    let rr_json = serde_json::to_string(&session.rr_history)
        .map_err(|e| StoreError::Backend(format!("failed to serialize rr history: {e}")))?;

    tx.execute(
        &format!(
            "INSERT INTO sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            session.id.to_string(),
            session.owner.as_str(),
            format_datetime(session.start_time),
            session.end_time.map(format_datetime),
            session
                .total_duration
                .map(|v| to_i64(v, "total_duration"))
                .transpose()?,
            to_i64(session.sitting_duration, "sitting_duration")?,
            to_i64(session.sample_count, "sample_count")?,
            session.score_sum,
            to_i64(session.scored_samples, "scored_samples")?,
            to_i64(session.buzzer_count, "buzzer_count")?,
            session.break_alert,
            session.excessive_buzzer_alert,
            rr_json,
        ],
    )?;
    Ok(())
}

fn write_aggregates(tx: &Transaction<'_>, session: &Session) -> Result<(), StoreError> {
    let rr_json = serde_json::to_string(&session.rr_history)
        .map_err(|e| StoreError::Backend(format!("failed to serialize rr history: {e}")))?;

    let rows_affected = tx.execute(
        "UPDATE sessions
         SET end_time = ?1,
             total_duration = ?2,
             sitting_duration = ?3,
             sample_count = ?4,
             score_sum = ?5,
             scored_samples = ?6,
             buzzer_count = ?7,
             break_alert = ?8,
             excessive_buzzer_alert = ?9,
             rr_history_json = ?10
         WHERE id = ?11",
        params![
            session.end_time.map(format_datetime),
            session
                .total_duration
                .map(|v| to_i64(v, "total_duration"))
                .transpose()?,
            to_i64(session.sitting_duration, "sitting_duration")?,
            to_i64(session.sample_count, "sample_count")?,
            session.score_sum,
            to_i64(session.scored_samples, "scored_samples")?,
            to_i64(session.buzzer_count, "buzzer_count")?,
            session.break_alert,
            session.excessive_buzzer_alert,
            rr_json,
            session.id.to_string(),
        ],
    )?;

    if rows_affected == 0 {
        return Err(StoreError::UnknownSession(session.id));
    }
    Ok(())
}

impl SessionStore for SqliteStore {
    fn start_session(
        &mut self,
        closed_prior: Option<&Session>,
        opened: &Session,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        if let Some(prior) = closed_prior {
            write_aggregates(&tx, prior)?;
        }
        insert_session(&tx, opened)?;
        tx.commit()?;
        Ok(())
    }

    fn update_session(&mut self, session: &Session) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        write_aggregates(&tx, session)?;
        tx.commit()?;
        Ok(())
    }

    fn append_reading(&mut self, session: &Session, sample: &Sample) -> Result<(), StoreError> {
        let rr_json = serde_json::to_string(&sample.rr_intervals)
            .map_err(|e| StoreError::Backend(format!("failed to serialize rr intervals: {e}")))?;

        let tx = self.conn.transaction()?;
        write_aggregates(&tx, session)?;
        tx.execute(
            "INSERT INTO readings (
                session_id, timestamp, pitch, roll, fsr_left, fsr_right, fsr_center,
                gsr_raw, rr_intervals_json, is_seated, stress_score, buzzer_triggered
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id.to_string(),
                format_datetime(sample.timestamp),
                sample.pitch,
                sample.roll,
                sample.fsr_left,
                sample.fsr_right,
                sample.fsr_center,
                sample.gsr_raw,
                rr_json,
                sample.is_seated,
                sample.stress_score,
                sample.buzzer_triggered,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    fn open_session_for(&self, owner: &OwnerId) -> Result<Option<Session>, StoreError> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM sessions
                 WHERE owner_id = ?1 AND end_time IS NULL
                 ORDER BY start_time DESC
                 LIMIT 1",
                params![owner.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => {
                let id: SessionId = id
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("invalid session id '{id}': {e}")))?;
                self.session(id)
            }
            None => Ok(None),
        }
    }

    fn sessions_for(&self, owner: &OwnerId) -> Result<Vec<Session>, StoreError> {
        self.query_sessions(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE owner_id = ?1
                 ORDER BY start_time DESC"
            ),
            owner.as_str(),
        )
    }

    fn readings(&self, id: SessionId) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, pitch, roll, fsr_left, fsr_right, fsr_center, gsr_raw,
                    rr_intervals_json, is_seated, stress_score, buzzer_triggered
             FROM readings
             WHERE session_id = ?1
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let mut samples = Vec::new();
        while let Some(row) = rows.next()? {
            samples.push(row_to_sample(row)?);
        }
        Ok(samples)
    }
}
