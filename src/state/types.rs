//! State types for the persisted run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::planner::RunReport;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of runs kept in the log.
pub const MAX_HISTORY: usize = 50;

/// Persisted provisioning state: the log of recent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionState {
    /// State format version.
    pub version: String,
    /// Host the state belongs to.
    pub hostname: String,
    /// Hash of the configuration of the last run.
    pub config_hash: String,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunReport>,
}

impl ProvisionState {
    /// Creates an empty state for a host.
    #[must_use]
    pub fn new(hostname: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            hostname: hostname.to_string(),
            config_hash: String::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Appends a run, dropping the oldest entries beyond [`MAX_HISTORY`].
    pub fn record(&mut self, report: RunReport) {
        self.config_hash.clone_from(&report.config_hash);
        self.last_updated = report.finished_at;
        self.history.push(report);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Returns the most recent run.
    #[must_use]
    pub fn last_run(&self) -> Option<&RunReport> {
        self.history.last()
    }

    /// Checks that the state was written by a compatible version.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::VersionMismatch`] for an unknown format.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn report(hash: &str) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            hostname: String::from("erp-01"),
            config_hash: hash.to_string(),
            results: Vec::new(),
            service_health: None,
            app_log: String::from("/var/log/odoo/odoo.log"),
        }
    }

    #[test]
    fn test_record_keeps_last_runs() {
        let mut state = ProvisionState::new("erp-01");
        for i in 0..(MAX_HISTORY + 5) {
            state.record(report(&format!("hash-{i}")));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "hash-5");
        assert_eq!(state.config_hash, format!("hash-{}", MAX_HISTORY + 4));
        assert_eq!(state.last_run().map(|r| r.config_hash.as_str()), Some(state.config_hash.as_str()));
    }

    #[test]
    fn test_version_mismatch() {
        let mut state = ProvisionState::new("erp-01");
        assert!(state.check_version().is_ok());

        state.version = String::from("0.1");
        assert!(matches!(
            state.check_version(),
            Err(StateError::VersionMismatch { .. })
        ));
    }
}
