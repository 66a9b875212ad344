//! Run outcomes and the aggregate run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EXIT_FAILED, EXIT_OK, FailureKind, StepError};
use crate::steps::StepId;

/// Phases a step passes through while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    /// Waiting to run.
    Pending,
    /// Evaluating the check.
    Checking,
    /// The check holds. Terminal.
    Satisfied,
    /// Running the action.
    Applying,
    /// The action completed.
    Applied,
    /// Re-probing and re-checking after the action.
    Reconfirming,
    /// The action failed.
    ApplyError,
    /// The step failed. Terminal.
    Failed,
}

/// Final outcome of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The action ran and the check now holds.
    Applied,
    /// The check already held; nothing ran.
    SkippedAlreadySatisfied,
    /// The step did not converge.
    Failed {
        /// Failure category.
        kind: FailureKind,
        /// Diagnostic text.
        diagnostic: String,
    },
}

impl Outcome {
    /// Creates a failed outcome from a step error.
    #[must_use]
    pub fn failed(error: &StepError) -> Self {
        Self::Failed {
            kind: error.kind(),
            diagnostic: error.to_string(),
        }
    }

    /// Returns true if the step ended in the satisfied state.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Applied | Self::SkippedAlreadySatisfied)
    }

    /// Returns the report label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Applied => String::from("applied"),
            Self::SkippedAlreadySatisfied => String::from("skipped (already satisfied)"),
            Self::Failed { kind, .. } => format!("failed: {kind}"),
        }
    }
}

/// Recorded result of one step in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Step id.
    pub step_id: StepId,
    /// Step description.
    pub description: String,
    /// Outcome.
    pub outcome: Outcome,
    /// Phases the step passed through.
    pub phases: Vec<StepPhase>,
    /// Wall time spent on the step.
    pub duration_ms: u64,
}

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    /// Every step is satisfied.
    AllSatisfied,
    /// Some steps are satisfied, some failed.
    Partial,
    /// No step is satisfied.
    Failed,
}

impl std::fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllSatisfied => write!(f, "all satisfied"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Web endpoint state observed after the steps ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Endpoint URL.
    pub url: String,
    /// HTTP status, if the endpoint answered.
    pub status_code: Option<u16>,
    /// Whether the status shows a serving application.
    pub healthy: bool,
}

/// Report of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Host the run executed on.
    pub hostname: String,
    /// Hash of the configuration the run converged to.
    pub config_hash: String,
    /// Results in execution order.
    pub results: Vec<RunResult>,
    /// Endpoint state at the end of the run.
    pub service_health: Option<ServiceHealth>,
    /// Application log file to consult on failures.
    pub app_log: String,
}

impl RunReport {
    /// Returns the aggregate status.
    #[must_use]
    pub fn status(&self) -> AggregateStatus {
        let failed = self.failed_count();
        if failed == 0 {
            AggregateStatus::AllSatisfied
        } else if failed == self.results.len() {
            AggregateStatus::Failed
        } else {
            AggregateStatus::Partial
        }
    }

    /// Returns the process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.status() == AggregateStatus::AllSatisfied {
            EXIT_OK
        } else {
            EXIT_FAILED
        }
    }

    /// Number of applied steps.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Applied))
    }

    /// Number of skipped steps.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::SkippedAlreadySatisfied))
    }

    /// Number of failed steps.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    /// Returns the total duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, outcome: Outcome) -> RunResult {
        RunResult {
            step_id: StepId::from(id),
            description: id.to_string(),
            outcome,
            phases: Vec::new(),
            duration_ms: 0,
        }
    }

    fn report(results: Vec<RunResult>) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            hostname: String::from("erp-01"),
            config_hash: String::new(),
            results,
            service_health: None,
            app_log: String::from("/var/log/odoo/odoo.log"),
        }
    }

    fn failure() -> Outcome {
        Outcome::failed(&StepError::Apply {
            operation: String::from("`createuser odoo`"),
            message: String::from("exit status 1"),
        })
    }

    #[test]
    fn test_aggregate_status() {
        let ok = report(vec![
            result("a", Outcome::Applied),
            result("b", Outcome::SkippedAlreadySatisfied),
        ]);
        assert_eq!(ok.status(), AggregateStatus::AllSatisfied);
        assert_eq!(ok.exit_code(), EXIT_OK);

        let partial = report(vec![result("a", Outcome::Applied), result("b", failure())]);
        assert_eq!(partial.status(), AggregateStatus::Partial);
        assert_eq!(partial.exit_code(), EXIT_FAILED);

        let failed = report(vec![result("a", failure())]);
        assert_eq!(failed.status(), AggregateStatus::Failed);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::SkippedAlreadySatisfied).unwrap();
        assert_eq!(json["status"], "skipped_already_satisfied");

        let json = serde_json::to_value(failure()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "apply");
    }

    #[test]
    fn test_labels() {
        assert_eq!(Outcome::Applied.label(), "applied");
        assert_eq!(failure().label(), "failed: apply error");
    }
}
