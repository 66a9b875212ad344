//! Step definitions: what to check and how to converge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::StepError;
use crate::host::{is_healthy_status, CommandSpec, FactKey, FactValue, FileSpec, Host, HostFacts};

/// Unique identifier of a step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a step id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One provisioning unit. Immutable once the catalog is built.
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique id.
    pub id: StepId,
    /// Human description.
    pub description: String,
    /// Steps that must be satisfied before this one runs.
    pub prerequisites: Vec<StepId>,
    /// Condition that holds when the step needs no action.
    pub check: Check,
    /// Operations that make the check hold, run in order.
    pub action: Vec<Operation>,
}

impl Step {
    /// Creates a step with no prerequisites and no action.
    #[must_use]
    pub fn new(id: impl Into<StepId>, description: impl Into<String>, check: Check) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            prerequisites: Vec::new(),
            check,
            action: Vec::new(),
        }
    }

    /// Adds prerequisites.
    #[must_use]
    pub fn requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.prerequisites.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Appends an operation to the action.
    #[must_use]
    pub fn then(mut self, operation: Operation) -> Self {
        self.action.push(operation);
        self
    }

    /// Runs every operation of the action in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Apply`] naming the failing operation.
    pub async fn apply(&self, host: &dyn Host) -> Result<(), StepError> {
        for operation in &self.action {
            operation.perform(host).await?;
        }
        Ok(())
    }
}

/// Result of evaluating a check against facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The target state holds.
    Satisfied,
    /// The target state does not hold.
    Unsatisfied {
        /// What is missing.
        reason: String,
    },
}

impl Verdict {
    /// Returns true if satisfied.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// A condition over host facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Every inner check holds.
    All(Vec<Check>),
    /// A package is installed.
    PackageInstalled(String),
    /// A system user exists.
    UserExists(String),
    /// A database role exists.
    DbRoleExists(String),
    /// A path exists.
    PathExists(PathBuf),
    /// A file exists with exactly the given digest.
    FileContent {
        /// File path.
        path: PathBuf,
        /// Expected SHA-256 of the contents.
        digest: String,
    },
    /// A systemd unit is enabled.
    ServiceEnabled(String),
    /// A systemd unit is running.
    ServiceActive(String),
    /// An HTTP endpoint answers with a healthy status.
    EndpointReachable(String),
    /// A command exits successfully.
    CommandSucceeds(CommandSpec),
}

impl Check {
    /// Returns the facts this check reads.
    #[must_use]
    pub fn required_facts(&self) -> Vec<FactKey> {
        match self {
            Self::All(checks) => checks.iter().flat_map(Self::required_facts).collect(),
            Self::PackageInstalled(name) => vec![FactKey::Package(name.clone())],
            Self::UserExists(name) => vec![FactKey::SystemUser(name.clone())],
            Self::DbRoleExists(name) => vec![FactKey::DbRole(name.clone())],
            Self::PathExists(path) => vec![FactKey::PathExists(path.clone())],
            Self::FileContent { path, .. } => vec![FactKey::FileDigest(path.clone())],
            Self::ServiceEnabled(unit) => vec![FactKey::ServiceEnabled(unit.clone())],
            Self::ServiceActive(unit) => vec![FactKey::ServiceActive(unit.clone())],
            Self::EndpointReachable(url) => vec![FactKey::Endpoint(url.clone())],
            Self::CommandSucceeds(command) => vec![FactKey::CommandSucceeds(command.clone())],
        }
    }

    /// Evaluates the check. Pure: reads only the given facts.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Probe`] if a required fact is unknown.
    pub fn evaluate(&self, facts: &HostFacts) -> Result<Verdict, StepError> {
        if let Self::All(checks) = self {
            for check in checks {
                let verdict = check.evaluate(facts)?;
                if !verdict.is_satisfied() {
                    return Ok(verdict);
                }
            }
            return Ok(Verdict::Satisfied);
        }

        let keys = self.required_facts();
        let Some(key) = keys.first() else {
            return Ok(Verdict::Satisfied);
        };
        let value = facts.get(key)?;

        let holds = match (self, value) {
            (Self::FileContent { digest, .. }, FactValue::Digest(actual)) => {
                actual.as_deref() == Some(digest.as_str())
            }
            (Self::EndpointReachable(_), FactValue::HttpStatus(status)) => {
                status.is_some_and(is_healthy_status)
            }
            (_, FactValue::Flag(flag)) => *flag,
            _ => {
                return Err(StepError::Probe {
                    fact: key.to_string(),
                    message: format!("unexpected value {value}"),
                });
            }
        };

        if holds {
            Ok(Verdict::Satisfied)
        } else {
            Ok(Verdict::Unsatisfied {
                reason: self.unmet_reason(value),
            })
        }
    }

    fn unmet_reason(&self, value: &FactValue) -> String {
        match self {
            Self::PackageInstalled(name) => format!("package {name} is not installed"),
            Self::UserExists(name) => format!("system user {name} does not exist"),
            Self::DbRoleExists(name) => format!("database role {name} does not exist"),
            Self::PathExists(path) => format!("{} does not exist", path.display()),
            Self::FileContent { path, .. } => match value {
                FactValue::Digest(None) => format!("{} does not exist", path.display()),
                _ => format!("{} differs from the rendered contents", path.display()),
            },
            Self::ServiceEnabled(unit) => format!("{unit} is not enabled"),
            Self::ServiceActive(unit) => format!("{unit} is not running"),
            Self::EndpointReachable(url) => format!("{url} answered {value}"),
            Self::CommandSucceeds(command) => format!("`{command}` did not succeed"),
            Self::All(_) => String::from("a condition does not hold"),
        }
    }
}

/// One side-effecting operation of an apply action.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Run a command; a non-zero exit fails the step.
    Run(CommandSpec),
    /// Install a file.
    WriteFile(FileSpec),
    /// Poll an endpoint until it answers with a healthy status.
    WaitForEndpoint {
        /// Endpoint URL.
        url: String,
        /// How long to wait.
        wait: Duration,
        /// Delay between attempts.
        interval: Duration,
    },
}

impl Operation {
    /// Performs the operation on the host.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Apply`] describing the failure.
    pub async fn perform(&self, host: &dyn Host) -> Result<(), StepError> {
        debug!("Performing {self}");
        match self {
            Self::Run(command) => {
                let output = host.run(command).await.map_err(|e| self.failed(e.to_string()))?;
                if output.success() {
                    Ok(())
                } else {
                    Err(self.failed(output.diagnostic()))
                }
            }
            Self::WriteFile(file) => host.write_file(file).await.map_err(|e| self.failed(e.to_string())),
            Self::WaitForEndpoint { url, wait, interval } => {
                let deadline = tokio::time::Instant::now() + *wait;
                loop {
                    let status = host.http_status(url).await.map_err(|e| self.failed(e.to_string()))?;
                    if status.is_some_and(is_healthy_status) {
                        return Ok(());
                    }
                    if tokio::time::Instant::now() >= deadline {
                        let last = status.map_or_else(|| String::from("no answer"), |s| format!("HTTP {s}"));
                        return Err(self.failed(format!(
                            "not healthy after {}s (last: {last})",
                            wait.as_secs()
                        )));
                    }
                    tokio::time::sleep(*interval).await;
                }
            }
        }
    }

    fn failed(&self, message: String) -> StepError {
        StepError::Apply {
            operation: self.to_string(),
            message,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(command) => write!(f, "`{command}`"),
            Self::WriteFile(file) => write!(f, "{file}"),
            Self::WaitForEndpoint { url, .. } => write!(f, "wait for {url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CommandOutput, MockHost};

    fn facts(entries: Vec<(FactKey, FactValue)>) -> HostFacts {
        HostFacts::from_results(entries.into_iter().map(|(k, v)| (k, Ok(v))))
    }

    #[test]
    fn test_all_reports_first_unmet() {
        let check = Check::All(vec![
            Check::PackageInstalled(String::from("git")),
            Check::PackageInstalled(String::from("wget")),
        ]);
        let facts = facts(vec![
            (FactKey::Package(String::from("git")), FactValue::Flag(true)),
            (FactKey::Package(String::from("wget")), FactValue::Flag(false)),
        ]);

        assert_eq!(
            check.evaluate(&facts).unwrap(),
            Verdict::Unsatisfied {
                reason: String::from("package wget is not installed")
            }
        );
    }

    #[test]
    fn test_file_content_compares_digest() {
        let path = PathBuf::from("/etc/odoo.conf");
        let check = Check::FileContent {
            path: path.clone(),
            digest: String::from("abc"),
        };

        let same = facts(vec![(FactKey::FileDigest(path.clone()), FactValue::Digest(Some(String::from("abc"))))]);
        assert!(check.evaluate(&same).unwrap().is_satisfied());

        let missing = facts(vec![(FactKey::FileDigest(path), FactValue::Digest(None))]);
        assert_eq!(
            check.evaluate(&missing).unwrap(),
            Verdict::Unsatisfied {
                reason: String::from("/etc/odoo.conf does not exist")
            }
        );
    }

    #[test]
    fn test_missing_fact_is_probe_error() {
        let check = Check::DbRoleExists(String::from("odoo"));
        let err = check.evaluate(&HostFacts::new()).unwrap_err();
        assert!(matches!(err, StepError::Probe { .. }));
    }

    #[test]
    fn test_endpoint_redirect_satisfies() {
        let url = String::from("http://127.0.0.1:8069/web/database/selector");
        let check = Check::EndpointReachable(url.clone());
        let up = facts(vec![(FactKey::Endpoint(url.clone()), FactValue::HttpStatus(Some(303)))]);
        let down = facts(vec![(FactKey::Endpoint(url), FactValue::HttpStatus(None))]);
        assert!(check.evaluate(&up).unwrap().is_satisfied());
        assert!(!check.evaluate(&down).unwrap().is_satisfied());
    }

    #[tokio::test]
    async fn test_run_failure_is_apply_error() {
        let mut host = MockHost::new();
        host.expect_run().returning(|_| {
            Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: String::from("createuser: error: role already exists"),
            })
        });

        let op = Operation::Run(CommandSpec::new("createuser").arg("odoo"));
        let err = op.perform(&host).await.unwrap_err();
        assert_eq!(
            err,
            StepError::Apply {
                operation: String::from("`createuser odoo`"),
                message: String::from("exit status 1: createuser: error: role already exists"),
            }
        );
    }

    #[tokio::test]
    async fn test_wait_for_endpoint_times_out() {
        let mut host = MockHost::new();
        host.expect_http_status().returning(|_| Ok(None));

        let op = Operation::WaitForEndpoint {
            url: String::from("http://127.0.0.1:8069/"),
            wait: Duration::ZERO,
            interval: Duration::ZERO,
        };
        let err = op.perform(&host).await.unwrap_err();
        assert!(err.to_string().contains("no answer"));
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let mut host = MockHost::new();
        host.expect_run()
            .times(1)
            .returning(|_| Ok(CommandOutput { status: Some(2), ..CommandOutput::default() }));

        let step = Step::new("broken", "Broken step", Check::All(Vec::new()))
            .then(Operation::Run(CommandSpec::new("false")))
            .then(Operation::Run(CommandSpec::new("true")));
        assert!(step.apply(&host).await.is_err());
    }
}
