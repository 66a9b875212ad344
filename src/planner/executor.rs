//! Step executor: runs ordered steps through the guard.
//!
//! Steps run one at a time in the given order. A failed step fails its
//! dependents with an unmet prerequisite, while independent branches keep
//! running. Nothing is rolled back.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::error::StepError;
use crate::host::{FactProber, Host, HostFacts};
use crate::steps::{Step, StepId};

use super::guard::{Guarded, IdempotencyGuard};
use super::outcome::{Outcome, RunResult, StepPhase};

/// Executor for an ordered list of steps.
pub struct StepExecutor<'a> {
    /// Guard each step runs through.
    guard: IdempotencyGuard<'a>,
    /// Prober used to refresh stale facts.
    prober: FactProber<'a>,
    /// Run deadline, checked before each step.
    timeout: Option<Duration>,
}

impl<'a> StepExecutor<'a> {
    /// Creates an executor for a host.
    #[must_use]
    pub const fn new(host: &'a dyn Host) -> Self {
        Self {
            guard: IdempotencyGuard::new(host),
            prober: FactProber::new(host),
            timeout: None,
        }
    }

    /// Sets the run deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executes steps in order against an initial snapshot.
    ///
    /// Once any step has applied, the snapshot no longer describes the
    /// host, so each later step re-probes its own facts before its check.
    pub async fn execute(&self, order: &[&Step], initial: HostFacts) -> Vec<RunResult> {
        info!("Executing {} steps", order.len());

        let started = Instant::now();
        let mut facts = initial;
        let mut satisfied: HashSet<&StepId> = HashSet::new();
        let mut stale = false;
        let mut results = Vec::with_capacity(order.len());

        for (position, step) in order.iter().enumerate() {
            let step_started = Instant::now();
            info!("[{}/{}] {}", position + 1, order.len(), step.description);

            let guarded = if let Some(error) = self.precondition_error(step, &satisfied, started) {
                error!("{}: {error}", step.id);
                Guarded {
                    outcome: Outcome::failed(&error),
                    phases: vec![StepPhase::Pending, StepPhase::Failed],
                }
            } else {
                if stale {
                    let refreshed = self.prober.snapshot(step.check.required_facts()).await;
                    facts = facts.layered(&refreshed);
                }
                self.guard.run(step, &facts).await
            };

            match &guarded.outcome {
                Outcome::Applied => {
                    info!("{}: applied", step.id);
                    stale = true;
                    satisfied.insert(&step.id);
                }
                Outcome::SkippedAlreadySatisfied => {
                    info!("{}: already satisfied", step.id);
                    satisfied.insert(&step.id);
                }
                Outcome::Failed { kind, diagnostic } => {
                    error!("{}: {kind}: {diagnostic}", step.id);
                    // A failed apply may have changed the host partway.
                    if guarded.phases.contains(&StepPhase::Applying) {
                        stale = true;
                    }
                }
            }

            results.push(RunResult {
                step_id: step.id.clone(),
                description: step.description.clone(),
                outcome: guarded.outcome,
                phases: guarded.phases,
                duration_ms: u64::try_from(step_started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        results
    }

    /// Returns why the step cannot start, if it cannot.
    fn precondition_error(
        &self,
        step: &Step,
        satisfied: &HashSet<&StepId>,
        started: Instant,
    ) -> Option<StepError> {
        if let Some(timeout) = self.timeout
            && started.elapsed() >= timeout
        {
            return Some(StepError::RunTimeout {
                timeout_secs: timeout.as_secs(),
            });
        }

        step.prerequisites
            .iter()
            .find(|p| !satisfied.contains(p))
            .map(|p| StepError::PrerequisiteUnmet {
                prerequisite: p.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::host::{CommandOutput, CommandSpec, MockHost};
    use crate::planner::StepGraph;
    use crate::steps::{Check, Operation};

    fn command_step(id: &str, deps: &[&str], program: &str) -> Step {
        Step::new(id, id, Check::CommandSucceeds(CommandSpec::new("check").arg(id)))
            .requires(deps.iter().copied())
            .then(Operation::Run(CommandSpec::new(program).arg(id)))
    }

    fn kinds(results: &[RunResult]) -> Vec<Option<FailureKind>> {
        results
            .iter()
            .map(|r| match &r.outcome {
                Outcome::Failed { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        // Every check fails; only `true` exits 0.
        let mut host = MockHost::new();
        host.expect_run().returning(|c| {
            let code = match c.program.as_str() {
                "true" => 0,
                _ => 1,
            };
            Ok(CommandOutput {
                status: Some(code),
                ..CommandOutput::default()
            })
        });

        let graph = StepGraph::new(vec![
            command_step("a", &[], "false"),
            command_step("b", &["a"], "true"),
            command_step("c", &["b"], "true"),
            command_step("independent", &[], "false"),
        ])
        .unwrap();
        let order = graph.execution_order().unwrap();

        let keys = order.iter().flat_map(|s| s.check.required_facts());
        let initial = FactProber::new(&host).snapshot(keys).await;

        let executor = StepExecutor::new(&host);
        let results = executor.execute(&order, initial).await;

        assert_eq!(
            kinds(&results),
            vec![
                Some(FailureKind::Apply),
                Some(FailureKind::PrerequisiteUnmet),
                Some(FailureKind::PrerequisiteUnmet),
                Some(FailureKind::Apply),
            ]
        );
        assert_eq!(results[1].phases, vec![StepPhase::Pending, StepPhase::Failed]);
        assert!(matches!(
            &results[2].outcome,
            Outcome::Failed { diagnostic, .. } if diagnostic.contains("'b'")
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_every_step() {
        let mut host = MockHost::new();
        host.expect_run().never();

        let steps = [command_step("a", &[], "true"), command_step("b", &[], "true")];
        let order: Vec<&Step> = steps.iter().collect();

        let executor = StepExecutor::new(&host).with_timeout(Some(Duration::ZERO));
        let results = executor.execute(&order, HostFacts::new()).await;

        assert_eq!(kinds(&results), vec![Some(FailureKind::Timeout); 2]);
    }
}
