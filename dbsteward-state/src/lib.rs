//! Persisted reconciliation state for `dbsteward`.
//!
//! The record is a flat `KEY=value` text file kept inside the service's data
//! directory. Its presence means a reconciliation pass completed at least once;
//! its absence is surfaced as [`PriorState::Absent`].

pub mod error;
pub mod file;
pub mod record;

pub use error::StateError;
pub use file::{PriorState, StateFile};
pub use record::PersistedState;
