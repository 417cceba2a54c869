use serde::Serialize;
use std::fmt::Display;

use crate::accounts::ServiceIdentity;

/// Which branch of the state machine a start took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePath {
    /// `SKIP_UPDATE` was set.
    Skipped,
    /// First boot; the wrapped image initializes the data store itself.
    Deferred,
    /// Pass completed and the new state may be persisted.
    Reconciled,
    /// Statements ran but the administrative instance did not stop cleanly.
    StopFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityReport {
    pub before: Option<ServiceIdentity>,
    pub after: Option<ServiceIdentity>,
    pub account_updated: bool,
    pub entries_reowned: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    pub step: &'static str,
    pub subject: String,
}

/// A recoverable failure: logged, recorded here, and skipped over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: &'static str,
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub identity: IdentityReport,
    pub ready_after_attempts: Option<u32>,
    pub applied: Vec<AppliedStep>,
    pub failures: Vec<StepFailure>,
    /// State keys that differ from the prior record.
    pub changed_keys: Vec<String>,
}

impl ReconcileReport {
    pub(crate) fn record_applied(&mut self, step: &'static str, subject: &str) {
        self.applied.push(AppliedStep {
            step,
            subject: subject.to_string(),
        });
    }

    pub(crate) fn record_failure(&mut self, step: &'static str, subject: &str, error: impl Display) {
        self.failures.push(StepFailure {
            step,
            subject: subject.to_string(),
            error: error.to_string(),
        });
    }

    pub fn failed(&self, step: &str, subject: &str) -> bool {
        self.failures
            .iter()
            .any(|f| f.step == step && f.subject == subject)
    }
}
