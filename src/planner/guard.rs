//! Idempotency guard: check, apply only when needed, then reconfirm.

use tracing::{debug, info, warn};

use crate::error::StepError;
use crate::host::{FactProber, Host, HostFacts};
use crate::steps::{Step, Verdict};

use super::outcome::{Outcome, StepPhase};

/// Outcome of one guarded step together with its phase trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded {
    /// Final outcome.
    pub outcome: Outcome,
    /// Phases passed through, starting with [`StepPhase::Pending`].
    pub phases: Vec<StepPhase>,
}

/// Runs steps through the check / apply / reconfirm state machine.
pub struct IdempotencyGuard<'a> {
    /// Host the action runs on.
    host: &'a dyn Host,
    /// Prober used to reconfirm after an apply.
    prober: FactProber<'a>,
}

impl<'a> IdempotencyGuard<'a> {
    /// Creates a guard for a host.
    #[must_use]
    pub const fn new(host: &'a dyn Host) -> Self {
        Self {
            host,
            prober: FactProber::new(host),
        }
    }

    /// Guards one step against the given facts.
    ///
    /// The action runs only if the check does not hold. After it runs, the
    /// step's facts are probed again and the check must hold on them.
    pub async fn run(&self, step: &Step, facts: &HostFacts) -> Guarded {
        let mut phases = vec![StepPhase::Pending, StepPhase::Checking];

        let reason = match step.check.evaluate(facts) {
            Ok(Verdict::Satisfied) => {
                debug!("{}: already satisfied", step.id);
                phases.push(StepPhase::Satisfied);
                return Guarded {
                    outcome: Outcome::SkippedAlreadySatisfied,
                    phases,
                };
            }
            Ok(Verdict::Unsatisfied { reason }) => reason,
            Err(e) => {
                warn!("{}: {e}", step.id);
                phases.push(StepPhase::Failed);
                return Guarded {
                    outcome: Outcome::failed(&e),
                    phases,
                };
            }
        };

        info!("{}: {reason}; applying", step.id);
        phases.push(StepPhase::Applying);
        if let Err(e) = step.apply(self.host).await {
            warn!("{}: {e}", step.id);
            phases.extend([StepPhase::ApplyError, StepPhase::Failed]);
            return Guarded {
                outcome: Outcome::failed(&e),
                phases,
            };
        }
        phases.extend([StepPhase::Applied, StepPhase::Reconfirming]);

        let refreshed = facts.layered(&self.prober.snapshot(step.check.required_facts()).await);
        let outcome = match step.check.evaluate(&refreshed) {
            Ok(Verdict::Satisfied) => {
                phases.push(StepPhase::Satisfied);
                Outcome::Applied
            }
            Ok(Verdict::Unsatisfied { reason }) => {
                warn!("{}: still unsatisfied after apply: {reason}", step.id);
                phases.push(StepPhase::Failed);
                Outcome::failed(&StepError::Postcondition { reason })
            }
            Err(e) => {
                warn!("{}: {e}", step.id);
                phases.push(StepPhase::Failed);
                Outcome::failed(&e)
            }
        };
        Guarded { outcome, phases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::host::{CommandOutput, CommandSpec, FactKey, FactValue, MockHost};
    use crate::steps::{Check, Operation};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn user_step() -> Step {
        Step::new("create-system-user", "Create user", Check::UserExists(String::from("odoo")))
            .then(Operation::Run(CommandSpec::new("useradd").arg("odoo")))
    }

    fn facts_with_user(exists: bool) -> HostFacts {
        HostFacts::from_results([(
            FactKey::SystemUser(String::from("odoo")),
            Ok(FactValue::Flag(exists)),
        )])
    }

    fn exit(code: i32) -> CommandOutput {
        CommandOutput {
            status: Some(code),
            ..CommandOutput::default()
        }
    }

    #[tokio::test]
    async fn test_satisfied_step_never_applies() {
        let mut host = MockHost::new();
        host.expect_run().never();

        let guard = IdempotencyGuard::new(&host);
        let guarded = guard.run(&user_step(), &facts_with_user(true)).await;

        assert_eq!(guarded.outcome, Outcome::SkippedAlreadySatisfied);
        assert_eq!(
            guarded.phases,
            vec![StepPhase::Pending, StepPhase::Checking, StepPhase::Satisfied]
        );
    }

    #[tokio::test]
    async fn test_apply_then_reconfirm() {
        let created = Arc::new(AtomicBool::new(false));
        let mut host = MockHost::new();
        let flag = Arc::clone(&created);
        host.expect_run().returning(move |c| {
            if c.program == "useradd" {
                flag.store(true, Ordering::SeqCst);
                Ok(exit(0))
            } else {
                // getent passwd odoo
                Ok(exit(if flag.load(Ordering::SeqCst) { 0 } else { 2 }))
            }
        });

        let guard = IdempotencyGuard::new(&host);
        let guarded = guard.run(&user_step(), &facts_with_user(false)).await;

        assert_eq!(guarded.outcome, Outcome::Applied);
        assert_eq!(
            guarded.phases,
            vec![
                StepPhase::Pending,
                StepPhase::Checking,
                StepPhase::Applying,
                StepPhase::Applied,
                StepPhase::Reconfirming,
                StepPhase::Satisfied,
            ]
        );
        assert!(created.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_postcondition_failure() {
        let mut host = MockHost::new();
        host.expect_run().returning(|c| {
            if c.program == "useradd" {
                Ok(exit(0))
            } else {
                Ok(exit(2))
            }
        });

        let guard = IdempotencyGuard::new(&host);
        let guarded = guard.run(&user_step(), &facts_with_user(false)).await;

        match guarded.outcome {
            Outcome::Failed { kind, diagnostic } => {
                assert_eq!(kind, FailureKind::Postcondition);
                assert!(diagnostic.contains("system user odoo does not exist"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(guarded.phases.last(), Some(&StepPhase::Failed));
        assert!(guarded.phases.contains(&StepPhase::Reconfirming));
    }

    #[tokio::test]
    async fn test_apply_error() {
        let mut host = MockHost::new();
        host.expect_run().returning(|_| Ok(exit(9)));

        let guard = IdempotencyGuard::new(&host);
        let guarded = guard.run(&user_step(), &facts_with_user(false)).await;

        assert!(matches!(
            guarded.outcome,
            Outcome::Failed { kind: FailureKind::Apply, .. }
        ));
        assert_eq!(
            &guarded.phases[2..],
            &[StepPhase::Applying, StepPhase::ApplyError, StepPhase::Failed]
        );
    }

    #[tokio::test]
    async fn test_probe_error_fails_without_apply() {
        let mut host = MockHost::new();
        host.expect_run().never();

        let guard = IdempotencyGuard::new(&host);
        let guarded = guard.run(&user_step(), &HostFacts::new()).await;

        assert!(matches!(
            guarded.outcome,
            Outcome::Failed { kind: FailureKind::Probe, .. }
        ));
        assert_eq!(
            guarded.phases,
            vec![StepPhase::Pending, StepPhase::Checking, StepPhase::Failed]
        );
    }
}
