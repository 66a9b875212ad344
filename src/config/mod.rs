//! Configuration for a provisioning run.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `odoo-provision.yaml` with environment and flag overrides
//! - Validation of configuration values
//! - Rendering the application config file and service unit
//! - Computing configuration hashes for the run log

mod spec;
mod parser;
mod validator;
mod hash;
mod render;

pub use spec::{
    AppConfig, CustomStepConfig, DatabaseConfig, Escalation, HealthConfig, HostConfig,
    PackagesConfig, ProvisionConfig, PythonConfig, RunConfig, ServerConfig, ServiceConfig,
    StateConfig, WEB_PORT,
};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, Overrides, SAMPLE_CONFIG, SAMPLE_ENV, find_config_file,
    split_paths,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
pub use render::{render_app_config, render_service_unit, venv_python};
