//! Posture Flux - On-device posture and stress scoring with session aggregation
//!
//! Flux turns raw seat and wearable sensor readings into per-sample posture
//! and stress classifications, and aggregates classified samples into
//! bounded sessions with running statistics and latched alerts.
//!
//! ## Modules
//!
//! - **Signal Interpreter**: stateless orientation, posture, HRV and stress transforms
//! - **Session Aggregator**: open/record/close/stats over a pluggable session store
//! - **Monitor Pipeline**: per-tick loop wiring a sample source and effector to both

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod interpreter;
pub mod pipeline;
pub mod rr_history;
pub mod session;
pub mod store;
pub mod types;

pub use aggregator::SessionAggregator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, StoreError};
pub use interpreter::{Interpretation, SignalInterpreter};
pub use pipeline::{classify_readings, MonitorPipeline, TickReport};
pub use session::{RecordOutcome, Session};
pub use store::{MemoryStore, SessionStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

// Core data types
pub use types::{
    OwnerId, OwnerSummary, RawReading, Sample, SessionDetail, SessionId, SessionState,
    SessionStats,
};

/// Engine version reported by the CLI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "posture-flux";
