//! Snapshot Persistence
//!
//! Point-in-time snapshots of the store, taken when a save rule is met, on
//! `SAVE`, and at shutdown, and loaded once at startup.
//!
//! - `rules`: save rule parsing and evaluation
//! - `snapshot`: the file format and the [`SnapshotManager`]

pub mod rules;
pub mod snapshot;

pub use rules::{evaluate, format_save_rules, parse_save_rules, RuleError, SaveDecision, SaveRule};
pub use snapshot::{LoadOutcome, SnapshotConfig, SnapshotError, SnapshotManager};
