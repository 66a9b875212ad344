//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

/// odoo-provision - Idempotent provisioning for a single-host Odoo stack.
#[derive(Parser, Debug)]
#[command(name = "odoo-provision")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "ODOO_PROVISION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Directory holding the run log.
    #[arg(long, global = true, env = "ODOO_PROVISION_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs that override the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Admin (master) password written to the config file.
    #[arg(long, env = "ODOO_ADMIN_PASSWD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Password set on the database role when it is created.
    #[arg(long, env = "ODOO_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Addon directories, comma-separated.
    #[arg(long, env = "ODOO_ADDONS_PATH", value_delimiter = ',')]
    pub addons_path: Vec<PathBuf>,
}

impl InputArgs {
    /// Converts the flags into configuration overrides.
    #[must_use]
    pub fn overrides(&self, timeout_secs: Option<u64>) -> Overrides {
        Overrides {
            admin_passwd: self.admin_password.clone(),
            db_password: self.db_password.clone(),
            addons_path: self.addons_path.clone(),
            timeout_secs,
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample configuration file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and the step graph.
    Validate {
        /// Configuration inputs.
        #[command(flatten)]
        input: InputArgs,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show which steps a run would apply, without changing the host.
    Plan {
        /// Configuration inputs.
        #[command(flatten)]
        input: InputArgs,
    },

    /// Provision the host.
    Apply {
        /// Configuration inputs.
        #[command(flatten)]
        input: InputArgs,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Run deadline in seconds, checked between steps.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Probe and print the host facts the steps depend on.
    Facts,

    /// Print a rendered file.
    Render {
        /// Configuration inputs.
        #[command(flatten)]
        input: InputArgs,

        /// File to render.
        #[arg(value_enum)]
        target: RenderTarget,
    },

    /// Show service and web endpoint health.
    Status,

    /// Show the run log.
    History {
        /// Number of most recent runs to show.
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Delete the run log.
        #[arg(long)]
        clear: bool,
    },
}

/// Files that can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenderTarget {
    /// The application configuration file.
    Config,
    /// The systemd service unit.
    Unit,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
