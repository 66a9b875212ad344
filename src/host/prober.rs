//! Fact prober: reads host state without changing it.

use tracing::{debug, info, warn};

use crate::config::ConfigHasher;
use crate::error::HostError;

use super::command::{CommandOutput, CommandSpec, Credential};
use super::facts::{FactKey, FactValue, HostFacts};
use super::Host;

/// System user that owns the database cluster.
const DB_SUPERUSER: &str = "postgres";

/// Probes facts on a host.
pub struct FactProber<'a> {
    /// Host being observed.
    host: &'a dyn Host,
}

impl<'a> FactProber<'a> {
    /// Creates a prober for the given host.
    #[must_use]
    pub const fn new(host: &'a dyn Host) -> Self {
        Self { host }
    }

    /// Probes a set of facts into a snapshot.
    ///
    /// Never fails: a fact that cannot be probed is recorded as a failure in
    /// the snapshot, and only the steps that need it are affected.
    pub async fn snapshot<I>(&self, keys: I) -> HostFacts
    where
        I: IntoIterator<Item = FactKey>,
    {
        let mut results = Vec::new();
        for key in keys {
            let result = self.probe(&key).await.map_err(|e| {
                warn!("Could not probe {key}: {e}");
                e.to_string()
            });
            results.push((key, result));
        }
        let facts = HostFacts::from_results(results);
        info!("Probed {} host facts", facts.len());
        facts
    }

    /// Probes a single fact.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried or answers in a way
    /// that does not determine the fact.
    pub async fn probe(&self, key: &FactKey) -> Result<FactValue, HostError> {
        debug!("Probing {key}");
        match key {
            FactKey::Package(name) => self.package_installed(name).await.map(FactValue::Flag),
            FactKey::SystemUser(name) => self.user_exists(name).await.map(FactValue::Flag),
            FactKey::DbRole(name) => self.db_role_exists(name).await.map(FactValue::Flag),
            FactKey::PathExists(path) => self.host.path_exists(path).await.map(FactValue::Flag),
            FactKey::FileDigest(path) => {
                let contents = self.host.read_file(path).await?;
                let hasher = ConfigHasher::new();
                Ok(FactValue::Digest(contents.map(|c| hasher.digest(&c))))
            }
            FactKey::ServiceEnabled(unit) => self
                .systemctl_query("is-enabled", unit, "enabled")
                .await
                .map(FactValue::Flag),
            FactKey::ServiceActive(unit) => self
                .systemctl_query("is-active", unit, "active")
                .await
                .map(FactValue::Flag),
            FactKey::Endpoint(url) => self.host.http_status(url).await.map(FactValue::HttpStatus),
            FactKey::CommandSucceeds(command) => {
                let output = self.host.run(command).await?;
                Ok(FactValue::Flag(output.success()))
            }
        }
    }

    async fn package_installed(&self, name: &str) -> Result<bool, HostError> {
        let command = CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Status}"])
            .arg(name);
        let output = self.host.run(&command).await?;
        match output.status {
            Some(0) => Ok(output.stdout.contains("install ok installed")),
            // dpkg-query exits 1 for packages it has never seen.
            Some(1) => Ok(false),
            _ => Err(unexpected(&command, &output)),
        }
    }

    async fn user_exists(&self, name: &str) -> Result<bool, HostError> {
        let command = CommandSpec::new("getent").args(["passwd", name]);
        let output = self.host.run(&command).await?;
        match output.status {
            Some(0) => Ok(true),
            Some(2) => Ok(false),
            _ => Err(unexpected(&command, &output)),
        }
    }

    async fn db_role_exists(&self, name: &str) -> Result<bool, HostError> {
        let command = CommandSpec::new("psql")
            .arg("-tAc")
            .arg(format!("SELECT 1 FROM pg_roles WHERE rolname='{name}'"))
            .run_as(Credential::User(String::from(DB_SUPERUSER)));
        let output = self.host.run(&command).await?;
        match output.status {
            Some(0) => Ok(output.stdout.trim() == "1"),
            // No client installed means no server and no roles.
            Some(CommandOutput::NOT_FOUND) => Ok(false),
            _ => Err(unexpected(&command, &output)),
        }
    }

    async fn systemctl_query(&self, query: &str, unit: &str, expected: &str) -> Result<bool, HostError> {
        let command = CommandSpec::new("systemctl").args([query, unit]);
        let output = self.host.run(&command).await?;
        match output.status {
            Some(CommandOutput::NOT_FOUND) | None => Err(unexpected(&command, &output)),
            // Non-zero exits carry states like "disabled" or "inactive".
            Some(_) => Ok(output.stdout.trim() == expected),
        }
    }
}

fn unexpected(command: &CommandSpec, output: &CommandOutput) -> HostError {
    HostError::Command {
        command: command.to_string(),
        message: output.diagnostic(),
    }
}
