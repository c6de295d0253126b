//! Pending-move correlation
//!
//! Turns independent "deleted" and "created" observations back into moves.
//!
//! # Module Organization
//!
//! - [`config`] - Tracker configuration and validation
//! - [`pending`] - The pending deletion set and its per-bucket ordering
//! - [`matching`] - Fingerprint and heuristic match rules
//! - [`monitoring`] - Counters and statistics
//! - [`engine`] - The locked engine tying the above together

pub mod config;
pub mod engine;
pub mod matching;
pub mod monitoring;
pub mod pending;

pub use config::TrackerConfig;
pub use engine::{unmatched_event, CorrelationEngine, ExpiredMoves, MatchedMove};
pub use monitoring::{CorrelationCounters, PendingSnapshot, TrackerStatistics};
pub use pending::{PendingMove, PendingSet};
