//! Host access layer.
//!
//! Everything the provisioner observes or changes on the machine goes
//! through the [`Host`] trait:
//! - [`SystemHost`] runs real commands, optionally through `sudo`
//! - [`FactProber`] turns host queries into [`HostFacts`]
//! - [`HealthChecker`] probes the web endpoint over HTTP

mod command;
mod facts;
mod health;
mod prober;
mod system;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::path::Path;

use crate::error::HostError;

pub use command::{CommandOutput, CommandSpec, Credential, FileSpec, REDACTED};
pub use facts::{FactKey, FactValue, HostFacts};
pub use health::{HealthChecker, is_healthy_status};
pub use prober::FactProber;
pub use system::{SystemHost, argv};

/// Operations the provisioner performs on a host.
///
/// Query methods must be free of side effects; only [`Host::run`] with an
/// apply command and [`Host::write_file`] change the machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Host: Send + Sync {
    /// Runs a command to completion and captures its output.
    ///
    /// A program that does not exist yields exit status
    /// [`CommandOutput::NOT_FOUND`] rather than an error.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, HostError>;

    /// Reads a file, returning `None` if it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError>;

    /// Returns true if the path exists.
    async fn path_exists(&self, path: &Path) -> Result<bool, HostError>;

    /// Installs a file with the given contents, mode and ownership.
    async fn write_file(&self, file: &FileSpec) -> Result<(), HostError>;

    /// Returns the HTTP status of a GET request, or `None` if nothing answered.
    async fn http_status(&self, url: &str) -> Result<Option<u16>, HostError>;
}
