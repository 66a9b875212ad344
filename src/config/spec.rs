//! Configuration specification types for the provisioning system.
//!
//! This module defines all the structs that map to the `odoo-provision.yaml`
//! file. Every field has a default taken from the manual install guide, so an
//! empty file (or no file at all) describes the standard single-host stack.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed HTTP port of the application web endpoint.
pub const WEB_PORT: u16 = 8069;

/// The root configuration structure for a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Application server settings written to the configuration file.
    pub server: ServerConfig,
    /// Database connection and role settings.
    pub database: DatabaseConfig,
    /// Application user, source checkout and virtualenv.
    pub app: AppConfig,
    /// Service unit settings.
    pub service: ServiceConfig,
    /// Packages installed from the distribution.
    pub packages: PackagesConfig,
    /// Python runtime checks.
    pub python: PythonConfig,
    /// How privileged operations are executed on the host.
    pub host: HostConfig,
    /// Web endpoint verification.
    pub health: HealthConfig,
    /// Run-level settings.
    pub run: RunConfig,
    /// Where the run log is stored.
    pub state: StateConfig,
    /// Operator-defined steps appended after the standard catalog.
    pub custom_steps: Vec<CustomStepConfig>,
}

/// Settings written to the application configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Master password allowing database management from the web UI.
    pub admin_passwd: Option<String>,
    /// Path of the configuration file.
    pub config_path: PathBuf,
    /// Application log file.
    pub logfile: PathBuf,
    /// Addon directories, joined with commas in the configuration file.
    pub addons_path: Vec<PathBuf>,
}

/// Database connection and role settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database host; `None` means the local unix socket.
    pub host: Option<String>,
    /// Database port; `None` means the server default.
    pub port: Option<u16>,
    /// Database role used by the application.
    pub user: String,
    /// Role password; `None` relies on peer authentication.
    pub password: Option<String>,
    /// Systemd unit of the database server.
    pub service_unit: String,
}

/// Application user, source checkout and virtualenv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// System user the service runs as.
    pub user: String,
    /// Home directory of the system user.
    pub home: PathBuf,
    /// Source checkout directory.
    pub source_dir: PathBuf,
    /// Python virtualenv directory.
    pub venv_dir: PathBuf,
    /// Git repository to clone.
    pub repository: String,
    /// Branch to check out.
    pub branch: String,
}

/// Service unit settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Unit name without the `.service` suffix.
    pub name: String,
    /// Unit description.
    pub description: String,
}

/// Distribution packages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackagesConfig {
    /// Build and runtime dependencies installed with apt.
    pub system: Vec<String>,
    /// Database server package.
    pub database: String,
}

/// Python runtime checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PythonConfig {
    /// Modules that must import from the virtualenv once requirements are installed.
    pub probe_modules: Vec<String>,
}

/// How privileged operations are executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Privilege escalation strategy.
    pub escalation: Escalation,
}

/// Privilege escalation strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Escalation {
    /// The tool runs as root; user switches use `runuser`.
    #[default]
    None,
    /// The tool runs unprivileged; every privileged command uses `sudo -n`.
    Sudo,
}

/// Web endpoint verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthConfig {
    /// Host the endpoint is probed on.
    pub host: String,
    /// Path requested on the endpoint.
    pub path: String,
    /// How long to wait for the endpoint after the service starts.
    pub wait_secs: u64,
    /// Delay between attempts while waiting.
    pub interval_secs: u64,
}

/// Run-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Deadline for the whole run; checked between steps only.
    pub timeout_secs: Option<u64>,
}

/// Run log location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StateConfig {
    /// State directory; defaults to the user data directory.
    pub dir: Option<PathBuf>,
}

/// An operator-defined step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomStepConfig {
    /// Unique step id.
    pub id: String,
    /// Human description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ids of steps that must be satisfied first.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Command whose success means the step is satisfied.
    pub check: Vec<String>,
    /// Commands run in order to apply the step.
    pub apply: Vec<Vec<String>>,
    /// User to run the check and apply commands as; root when absent.
    #[serde(default)]
    pub run_as: Option<String>,
}

impl ProvisionConfig {
    /// Returns the admin password or an empty string when unset.
    #[must_use]
    pub fn admin_passwd(&self) -> &str {
        self.server.admin_passwd.as_deref().unwrap_or("")
    }

    /// Returns the path of the service unit file.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        PathBuf::from(format!("/etc/systemd/system/{}.service", self.service.name))
    }

    /// Returns the service unit name including the `.service` suffix.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.service.name)
    }

    /// Returns the web endpoint URL probed after provisioning.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{WEB_PORT}{}", self.health.host, self.health.path)
    }

    /// Returns the addon directories that the tool must create.
    ///
    /// Directories inside the source checkout come with the clone.
    #[must_use]
    pub fn extra_addons_dirs(&self) -> Vec<&PathBuf> {
        self.server
            .addons_path
            .iter()
            .filter(|p| !p.starts_with(&self.app.source_dir))
            .collect()
    }

    /// Returns the directory holding the log file.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.server
            .logfile
            .parent()
            .map_or_else(|| PathBuf::from("/var/log"), std::path::Path::to_path_buf)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_passwd: None,
            config_path: PathBuf::from("/etc/odoo.conf"),
            logfile: PathBuf::from("/var/log/odoo/odoo.log"),
            addons_path: vec![
                PathBuf::from("/opt/odoo/odoo/addons"),
                PathBuf::from("/opt/odoo/custom-addons"),
            ],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: String::from("odoo"),
            password: None,
            service_unit: String::from("postgresql.service"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user: String::from("odoo"),
            home: PathBuf::from("/opt/odoo"),
            source_dir: PathBuf::from("/opt/odoo/odoo"),
            venv_dir: PathBuf::from("/opt/odoo/venv"),
            repository: String::from("https://github.com/odoo/odoo.git"),
            branch: String::from("17.0"),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::from("odoo"),
            description: String::from("Odoo"),
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            system: [
                "git",
                "python3-pip",
                "python3-dev",
                "python3-venv",
                "python3-wheel",
                "build-essential",
                "wget",
                "libxml2-dev",
                "libxslt1-dev",
                "libzip-dev",
                "libldap2-dev",
                "libsasl2-dev",
                "libjpeg-dev",
                "zlib1g-dev",
                "libpq-dev",
                "node-less",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            database: String::from("postgresql"),
        }
    }
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            probe_modules: ["psycopg2", "lxml", "werkzeug", "babel", "passlib"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            path: String::from("/web/database/selector"),
            wait_secs: 120,
            interval_secs: 2,
        }
    }
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sudo => write!(f, "sudo"),
        }
    }
}
