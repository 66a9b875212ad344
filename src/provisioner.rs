//! Provisioner: drives a full run against a host.
//!
//! Builds the step graph from the configuration, probes the host, runs the
//! steps through the executor and assembles the run report. The run log is
//! persisted separately so the report can be shown even when that fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigHasher, ProvisionConfig};
use crate::error::Result;
use crate::host::{FactKey, FactProber, FactValue, Host, HostFacts, is_healthy_status};
use crate::planner::{AggregateStatus, RunReport, ServiceHealth, StepExecutor, StepGraph};
use crate::state::{ProvisionState, StateStore};
use crate::steps::{Step, StepId, Verdict, build_steps};

/// What a run would do with a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// The check already holds.
    AlreadySatisfied,
    /// The check does not hold; the action would run.
    WillApply {
        /// Why the check does not hold.
        reason: String,
    },
    /// The check could not be evaluated.
    Unknown {
        /// Probe diagnostic.
        diagnostic: String,
    },
}

/// One step of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    /// Step id.
    pub step_id: StepId,
    /// Step description.
    pub description: String,
    /// Steps that must be satisfied first.
    pub prerequisites: Vec<StepId>,
    /// Planned action.
    pub action: PlannedAction,
}

/// Dry-run result: every step in execution order with its planned action.
///
/// Checks are evaluated against the current host only. A step whose
/// prerequisite would apply may change verdict once that happens.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPlan {
    /// Configuration hash.
    pub config_hash: String,
    /// Entries in execution order.
    pub entries: Vec<PlanEntry>,
}

impl ProvisionPlan {
    /// Number of steps whose action would run.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.action, PlannedAction::WillApply { .. }))
            .count()
    }

    /// Returns true if nothing would change.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.action == PlannedAction::AlreadySatisfied)
    }
}

/// State of one systemd unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    /// Unit name.
    pub unit: String,
    /// Whether the unit is enabled, if it could be probed.
    pub enabled: Option<bool>,
    /// Whether the unit is active, if it could be probed.
    pub active: Option<bool>,
}

/// Current health of the provisioned stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    /// Database and application units.
    pub units: Vec<UnitStatus>,
    /// Web endpoint health.
    pub endpoint: ServiceHealth,
    /// When the last recorded run finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Status of the last recorded run.
    pub last_run_status: Option<AggregateStatus>,
}

impl StackStatus {
    /// Returns true if every unit is up and the endpoint is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.endpoint.healthy
            && self
                .units
                .iter()
                .all(|u| u.enabled == Some(true) && u.active == Some(true))
    }
}

/// Runs provisioning for one configuration on one host.
pub struct Provisioner<'a, S: StateStore> {
    /// Configuration.
    config: &'a ProvisionConfig,
    /// Host being provisioned.
    host: &'a dyn Host,
    /// Run log store.
    state_store: &'a S,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

impl<'a, S: StateStore> Provisioner<'a, S> {
    /// Creates a new provisioner.
    #[must_use]
    pub const fn new(config: &'a ProvisionConfig, host: &'a dyn Host, state_store: &'a S) -> Self {
        Self {
            config,
            host,
            state_store,
            hasher: ConfigHasher::new(),
        }
    }

    /// Builds and validates the step graph for the configuration.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate ids, unknown prerequisites or a
    /// dependency cycle.
    pub fn graph(&self) -> Result<StepGraph> {
        let graph = StepGraph::new(build_steps(self.config))?;
        graph.execution_order()?;
        Ok(graph)
    }

    /// Performs a full run and returns its report.
    ///
    /// Step failures are recorded in the report and never abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the step graph is invalid, in which case no
    /// step has run.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<RunReport> {
        self.run_steps(build_steps(self.config), timeout).await
    }

    async fn run_steps(&self, steps: Vec<Step>, timeout: Option<Duration>) -> Result<RunReport> {
        let graph = StepGraph::new(steps)?;
        let order = graph.execution_order()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting provisioning run {run_id} ({} steps)", order.len());

        let prober = FactProber::new(self.host);
        let initial = prober.snapshot(required_facts(&order)).await;

        let executor = StepExecutor::new(self.host).with_timeout(timeout);
        let results = executor.execute(&order, initial).await;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            hostname: local_hostname(),
            config_hash: self.hasher.hash_config(self.config),
            results,
            service_health: Some(self.endpoint_health().await),
            app_log: self.config.server.logfile.display().to_string(),
        };

        info!(
            "Run {} finished: {} ({} applied, {} skipped, {} failed)",
            report.run_id,
            report.status(),
            report.applied_count(),
            report.skipped_count(),
            report.failed_count()
        );
        Ok(report)
    }

    /// Appends a report to the run log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or written.
    pub async fn record(&self, report: &RunReport) -> Result<()> {
        let mut state = self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| ProvisionState::new(&report.hostname));
        state.record(report.clone());
        self.state_store.save(&state).await
    }

    /// Evaluates every check without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the step graph is invalid.
    pub async fn plan(&self) -> Result<ProvisionPlan> {
        let graph = self.graph()?;
        let order = graph.execution_order()?;
        let facts = FactProber::new(self.host)
            .snapshot(required_facts(&order))
            .await;

        let entries = order
            .iter()
            .map(|step| {
                let action = match step.check.evaluate(&facts) {
                    Ok(Verdict::Satisfied) => PlannedAction::AlreadySatisfied,
                    Ok(Verdict::Unsatisfied { reason }) => PlannedAction::WillApply { reason },
                    Err(e) => PlannedAction::Unknown {
                        diagnostic: e.to_string(),
                    },
                };
                debug!("{}: {action:?}", step.id);
                PlanEntry {
                    step_id: step.id.clone(),
                    description: step.description.clone(),
                    prerequisites: step.prerequisites.clone(),
                    action,
                }
            })
            .collect();

        Ok(ProvisionPlan {
            config_hash: self.hasher.hash_config(self.config),
            entries,
        })
    }

    /// Probes every fact the steps depend on.
    pub async fn facts(&self) -> HostFacts {
        let steps = build_steps(self.config);
        let order: Vec<&Step> = steps.iter().collect();
        FactProber::new(self.host)
            .snapshot(required_facts(&order))
            .await
    }

    /// Probes service and endpoint health and reads the last recorded run.
    ///
    /// # Errors
    ///
    /// Returns an error if the run log exists but cannot be read.
    pub async fn status(&self) -> Result<StackStatus> {
        let units = [self.config.database.service_unit.clone(), self.config.unit_name()];
        let keys = units.iter().flat_map(|unit| {
            [
                FactKey::ServiceEnabled(unit.clone()),
                FactKey::ServiceActive(unit.clone()),
            ]
        });
        let facts = FactProber::new(self.host).snapshot(keys).await;

        let flag = |key: FactKey| match facts.get(&key) {
            Ok(FactValue::Flag(value)) => Some(*value),
            _ => None,
        };
        let units = units
            .iter()
            .map(|unit| UnitStatus {
                unit: unit.clone(),
                enabled: flag(FactKey::ServiceEnabled(unit.clone())),
                active: flag(FactKey::ServiceActive(unit.clone())),
            })
            .collect();

        let state = self.state_store.load().await?;
        let last_run = state.as_ref().and_then(ProvisionState::last_run);

        Ok(StackStatus {
            units,
            endpoint: self.endpoint_health().await,
            last_run_at: last_run.map(|r| r.finished_at),
            last_run_status: last_run.map(RunReport::status),
        })
    }

    /// Returns the recorded runs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the run log cannot be read.
    pub async fn history(&self) -> Result<Vec<RunReport>> {
        Ok(self
            .state_store
            .load()
            .await?
            .map(|s| s.history)
            .unwrap_or_default())
    }

    async fn endpoint_health(&self) -> ServiceHealth {
        let url = self.config.endpoint_url();
        let status_code = match self.host.http_status(&url).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not query {url}: {e}");
                None
            }
        };
        ServiceHealth {
            healthy: status_code.is_some_and(is_healthy_status),
            url,
            status_code,
        }
    }
}

/// Collects the facts a list of steps needs, each once.
fn required_facts(steps: &[&Step]) -> BTreeSet<FactKey> {
    steps
        .iter()
        .flat_map(|s| s.check.required_facts())
        .collect()
}

fn local_hostname() -> String {
    hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomStepConfig;
    use crate::error::{EXIT_FAILED, EXIT_INVALID_INPUT, EXIT_OK, FailureKind, GraphError, ProvisionError};
    use crate::host::{CommandSpec, Credential, FileSpec};
    use crate::host::fake::FakeHost;
    use crate::planner::Outcome;
    use crate::state::LocalStateStore;
    use crate::steps::catalog::{CREATE_DB_ROLE, VERIFY_WEB_ENDPOINT};
    use crate::steps::{Check, Operation};
    use tempfile::TempDir;

    const CONFIG_PATH: &str = "/etc/odoo.conf";
    const CONFIG_BODY: &str = "[options]\ndb_user = odoo\n";

    fn store() -> (LocalStateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (LocalStateStore::with_base_dir(dir.path()), dir)
    }

    /// Role, configuration file and service, each depending on the last.
    fn three_steps() -> Vec<Step> {
        let create_role = Step::new(
            "create-db-role",
            "Create database role",
            Check::DbRoleExists(String::from("odoo")),
        )
        .then(Operation::Run(
            CommandSpec::new("createuser")
                .args(["-s", "odoo"])
                .run_as(Credential::User(String::from("postgres"))),
        ));

        let write_config = Step::new(
            "write-config",
            "Write configuration",
            Check::FileContent {
                path: CONFIG_PATH.into(),
                digest: ConfigHasher::new().digest(CONFIG_BODY.as_bytes()),
            },
        )
        .requires(["create-db-role"])
        .then(Operation::WriteFile(FileSpec {
            path: CONFIG_PATH.into(),
            contents: String::from(CONFIG_BODY),
            mode: 0o640,
            owner: None,
            group: None,
        }));

        let register_service = Step::new(
            "register-service",
            "Register service",
            Check::All(vec![
                Check::ServiceEnabled(String::from("odoo.service")),
                Check::ServiceActive(String::from("odoo.service")),
            ]),
        )
        .requires(["write-config"])
        .then(Operation::Run(
            CommandSpec::new("systemctl").args(["enable", "--now", "odoo.service"]),
        ));

        vec![create_role, write_config, register_service]
    }

    fn outcomes(report: &RunReport) -> Vec<(&str, &Outcome)> {
        report
            .results
            .iter()
            .map(|r| (r.step_id.as_str(), &r.outcome))
            .collect()
    }

    #[tokio::test]
    async fn test_three_step_scenario_converges_then_skips() {
        let host = FakeHost::with_database();
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let first = provisioner.run_steps(three_steps(), None).await.unwrap();
        assert_eq!(
            outcomes(&first),
            vec![
                ("create-db-role", &Outcome::Applied),
                ("write-config", &Outcome::Applied),
                ("register-service", &Outcome::Applied),
            ]
        );
        assert_eq!(host.mutations(), 3);
        assert_eq!(host.file(CONFIG_PATH).as_deref(), Some(CONFIG_BODY));

        let second = provisioner.run_steps(three_steps(), None).await.unwrap();
        assert!(
            second
                .results
                .iter()
                .all(|r| r.outcome == Outcome::SkippedAlreadySatisfied)
        );
        assert_eq!(second.exit_code(), EXIT_OK);
        assert_eq!(host.mutations(), 3);
    }

    #[tokio::test]
    async fn test_three_step_scenario_failure() {
        let host = FakeHost::with_database();
        host.fail_when("createuser");
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let report = provisioner.run_steps(three_steps(), None).await.unwrap();
        let kinds: Vec<_> = report
            .results
            .iter()
            .map(|r| match &r.outcome {
                Outcome::Failed { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                Some(FailureKind::Apply),
                Some(FailureKind::PrerequisiteUnmet),
                Some(FailureKind::PrerequisiteUnmet),
            ]
        );
        assert_eq!(report.exit_code(), EXIT_FAILED);
        assert_eq!(report.status(), AggregateStatus::Failed);
        assert_eq!(host.file(CONFIG_PATH), None);
    }

    #[tokio::test]
    async fn test_full_catalog_is_idempotent() {
        let host = FakeHost::new();
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let first = provisioner.run(None).await.unwrap();
        assert_eq!(first.status(), AggregateStatus::AllSatisfied, "{first:#?}");
        assert_eq!(first.applied_count(), first.results.len() - 1);
        assert!(first.service_health.as_ref().is_some_and(|h| h.healthy));
        provisioner.record(&first).await.unwrap();

        let applied = host.mutations();
        let second = provisioner.run(None).await.unwrap();
        assert_eq!(second.skipped_count(), second.results.len());
        assert_eq!(host.mutations(), applied);
        provisioner.record(&second).await.unwrap();

        let history = provisioner.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_failure_propagates_to_transitive_dependents() {
        let host = FakeHost::new();
        host.fail_when("createuser");
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let report = provisioner.run(None).await.unwrap();
        let graph = provisioner.graph().unwrap();
        let dependents: BTreeSet<&StepId> = graph
            .transitive_dependents(&StepId::from(CREATE_DB_ROLE))
            .into_iter()
            .collect();
        assert!(dependents.contains(&StepId::from(VERIFY_WEB_ENDPOINT)));

        for result in &report.results {
            if result.step_id.as_str() == CREATE_DB_ROLE {
                assert!(matches!(
                    result.outcome,
                    Outcome::Failed { kind: FailureKind::Apply, .. }
                ));
            } else if dependents.contains(&result.step_id) {
                assert!(
                    matches!(
                        result.outcome,
                        Outcome::Failed { kind: FailureKind::PrerequisiteUnmet, .. }
                    ),
                    "{} should be blocked",
                    result.step_id
                );
            } else {
                assert_eq!(result.outcome, Outcome::Applied, "{}", result.step_id);
            }
        }
        assert_eq!(report.status(), AggregateStatus::Partial);
        assert_eq!(report.exit_code(), EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_step() {
        let host = FakeHost::new();
        let mut config = ProvisionConfig::default();
        for (id, requires) in [("a", "b"), ("b", "a")] {
            config.custom_steps.push(CustomStepConfig {
                id: id.to_string(),
                description: None,
                requires: vec![requires.to_string()],
                check: vec![String::from("false")],
                apply: vec![vec![String::from("true")]],
                run_as: None,
            });
        }
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let err = provisioner.run(None).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Graph(GraphError::Cycle { .. })));
        assert_eq!(err.exit_code(), EXIT_INVALID_INPUT);
        assert_eq!(host.mutations(), 0);
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let host = FakeHost::new();
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let plan = provisioner.plan().await.unwrap();
        assert_eq!(plan.apply_count(), plan.entries.len());
        assert!(!plan.is_converged());
        assert_eq!(host.mutations(), 0);

        provisioner.run(None).await.unwrap();
        let plan = provisioner.plan().await.unwrap();
        assert!(plan.is_converged());
    }

    #[tokio::test]
    async fn test_status_after_run() {
        let host = FakeHost::new();
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let before = provisioner.status().await.unwrap();
        assert!(!before.is_healthy());
        assert_eq!(before.last_run_at, None);

        let report = provisioner.run(None).await.unwrap();
        provisioner.record(&report).await.unwrap();

        let after = provisioner.status().await.unwrap();
        assert!(after.is_healthy());
        assert_eq!(after.endpoint.status_code, Some(303));
        assert_eq!(after.last_run_status, Some(AggregateStatus::AllSatisfied));
    }

    #[tokio::test]
    async fn test_facts_cover_every_check() {
        let host = FakeHost::new();
        let config = ProvisionConfig::default();
        let (store, _dir) = store();
        let provisioner = Provisioner::new(&config, &host, &store);

        let facts = provisioner.facts().await;
        assert_eq!(facts.failures().count(), 0);
        assert!(facts.get(&FactKey::SystemUser(String::from("odoo"))).is_ok());
    }
}
