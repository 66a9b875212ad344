//! Configuration validation for provisioning runs.
//!
//! This module validates a fully merged configuration before any host state
//! is touched. Any error here maps to exit code 2.

use crate::error::{ConfigError, ProvisionError, Result};
use crate::steps::catalog::STANDARD_STEP_IDS;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use super::spec::{CustomStepConfig, ProvisionConfig};

/// Minimum admin password length below which a warning is emitted.
const MIN_ADMIN_PASSWD_LEN: usize = 8;

/// Validator for provisioning configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &ProvisionConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_database(config, &mut result);
        Self::validate_app(config, &mut result);
        Self::validate_service(config, &mut result);
        Self::validate_packages(config, &mut result);
        Self::validate_python(config, &mut result);
        Self::validate_health(config, &mut result);
        Self::validate_custom_steps(&config.custom_steps, &mut result);

        result
    }

    /// Validates a provisioning configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &ProvisionConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first_error) => Err(ProvisionError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            })),
        }
    }

    /// Validates the values written to the configuration file.
    fn validate_server(config: &ProvisionConfig, result: &mut ValidationResult) {
        let server = &config.server;

        match server.admin_passwd.as_deref() {
            None | Some("") => result.error(
                "server.admin_passwd",
                "Admin password is required (--admin-password or ODOO_ADMIN_PASSWD)",
            ),
            Some(passwd) => {
                check_single_line(passwd, "server.admin_passwd", result);
                if passwd.len() < MIN_ADMIN_PASSWD_LEN {
                    result.warnings.push(format!(
                        "Admin password is shorter than {MIN_ADMIN_PASSWD_LEN} characters"
                    ));
                }
            }
        }

        check_path(&server.config_path, "server.config_path", result);
        check_path(&server.logfile, "server.logfile", result);

        if server.addons_path.is_empty() {
            result.error("server.addons_path", "At least one addons directory is required");
        }
        for (i, path) in server.addons_path.iter().enumerate() {
            let field = format!("server.addons_path[{i}]");
            check_path(path, &field, result);
            if path.to_string_lossy().contains(',') {
                result.error(&field, "Addons directories cannot contain commas");
            }
        }
    }

    /// Validates database settings.
    fn validate_database(config: &ProvisionConfig, result: &mut ValidationResult) {
        let db = &config.database;

        if !is_valid_user_name(&db.user) {
            result.error(
                "database.user",
                &format!("Database user '{}' is not a valid role name", db.user),
            );
        }
        if db.port == Some(0) {
            result.error("database.port", "Database port cannot be 0");
        }
        if let Some(host) = &db.host {
            if host.is_empty() {
                result.error("database.host", "Database host cannot be empty");
            }
            check_single_line(host, "database.host", result);
        }
        if let Some(password) = &db.password {
            check_single_line(password, "database.password", result);
            if password.contains('\'') {
                result.error("database.password", "Database password cannot contain quotes");
            }
            if db.host.is_none() {
                result.warnings.push(String::from(
                    "Database password is set but the connection uses the unix socket (peer authentication)",
                ));
            }
        }
        if db.service_unit.is_empty() {
            result.error("database.service_unit", "Database service unit cannot be empty");
        }
        check_single_line(&db.service_unit, "database.service_unit", result);
    }

    /// Validates application paths and source settings.
    fn validate_app(config: &ProvisionConfig, result: &mut ValidationResult) {
        let app = &config.app;

        if !is_valid_user_name(&app.user) {
            result.error(
                "app.user",
                &format!("System user '{}' is not a valid user name", app.user),
            );
        }
        check_path(&app.home, "app.home", result);
        check_path(&app.source_dir, "app.source_dir", result);
        check_path(&app.venv_dir, "app.venv_dir", result);

        if app.repository.is_empty() {
            result.error("app.repository", "Repository URL cannot be empty");
        }
        if app.branch.is_empty() {
            result.error("app.branch", "Branch cannot be empty");
        }
    }

    /// Validates service unit settings.
    fn validate_service(config: &ProvisionConfig, result: &mut ValidationResult) {
        let service = &config.service;

        if service.name.is_empty()
            || !service
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        {
            result.error(
                "service.name",
                &format!("Service name '{}' is not a valid unit name", service.name),
            );
        }
        check_single_line(&service.description, "service.description", result);
    }

    /// Validates package lists.
    fn validate_packages(config: &ProvisionConfig, result: &mut ValidationResult) {
        for (i, package) in config.packages.system.iter().enumerate() {
            if !is_valid_package_name(package) {
                result.error(
                    &format!("packages.system[{i}]"),
                    &format!("Invalid package name '{package}'"),
                );
            }
        }
        if !is_valid_package_name(&config.packages.database) {
            result.error(
                "packages.database",
                &format!("Invalid package name '{}'", config.packages.database),
            );
        }
    }

    /// Validates the modules imported to confirm the requirements install.
    fn validate_python(config: &ProvisionConfig, result: &mut ValidationResult) {
        if config.python.probe_modules.is_empty() {
            result.error(
                "python.probe_modules",
                "At least one module is required to confirm the requirements are installed",
            );
        }
        for (i, module) in config.python.probe_modules.iter().enumerate() {
            if !is_valid_module_name(module) {
                result.error(
                    &format!("python.probe_modules[{i}]"),
                    &format!("'{module}' is not a valid Python module name"),
                );
            }
        }
    }

    /// Validates endpoint verification settings.
    fn validate_health(config: &ProvisionConfig, result: &mut ValidationResult) {
        if config.health.host.is_empty() {
            result.error("health.host", "Health host cannot be empty");
        }
        check_single_line(&config.health.host, "health.host", result);
        if !config.health.path.starts_with('/') {
            result.error("health.path", "Health path must start with '/'");
        }
        check_single_line(&config.health.path, "health.path", result);
        if config.health.interval_secs == 0 {
            result.error("health.interval_secs", "Health interval must be at least 1 second");
        }
    }

    /// Validates operator-defined steps.
    fn validate_custom_steps(steps: &[CustomStepConfig], result: &mut ValidationResult) {
        let standard: HashSet<&str> = STANDARD_STEP_IDS.iter().copied().collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, step) in steps.iter().enumerate() {
            let prefix = format!("custom_steps[{i}]");

            if !is_valid_step_id(&step.id) {
                result.error(
                    &format!("{prefix}.id"),
                    &format!(
                        "Step id '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        step.id
                    ),
                );
            } else if standard.contains(step.id.as_str()) {
                result.error(
                    &format!("{prefix}.id"),
                    &format!("Step id '{}' collides with a standard step", step.id),
                );
            } else if !seen.insert(step.id.as_str()) {
                result.error(
                    &format!("{prefix}.id"),
                    &format!("Duplicate step id: {}", step.id),
                );
            }

            if step.check.is_empty() {
                result.error(&format!("{prefix}.check"), "Check command cannot be empty");
            }
            if step.apply.is_empty() || step.apply.iter().any(Vec::is_empty) {
                result.error(
                    &format!("{prefix}.apply"),
                    "Apply must list at least one non-empty command",
                );
            }
            if step.requires.iter().any(String::is_empty) {
                result.error(&format!("{prefix}.requires"), "Prerequisite ids cannot be empty");
            }
            if let Some(user) = &step.run_as
                && !is_valid_user_name(user)
            {
                result.error(
                    &format!("{prefix}.run_as"),
                    &format!("'{user}' is not a valid user name"),
                );
            }
        }
    }
}

impl ValidationResult {
    /// Records an error for a field.
    fn error(&mut self, field: &str, message: &str) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Requires an absolute path.
fn check_absolute(path: &Path, field: &str, result: &mut ValidationResult) {
    if !path.is_absolute() {
        result.error(
            field,
            &format!("Path '{}' must be absolute", path.display()),
        );
    }
}

/// Requires an absolute path on a single line.
fn check_path(path: &Path, field: &str, result: &mut ValidationResult) {
    check_absolute(path, field, result);
    check_single_line(&path.to_string_lossy(), field, result);
}

/// Rejects values that would break the line-oriented files we render.
fn check_single_line(value: &str, field: &str, result: &mut ValidationResult) {
    if value.contains('\n') || value.contains('\r') {
        result.error(field, "Value cannot contain line breaks");
    }
}

/// Validates a step id: lowercase alphanumeric with single hyphens,
/// starting with a letter.
fn is_valid_step_id(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Validates a unix user or role name.
fn is_valid_user_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first == '_') {
        return false;
    }

    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}

/// Validates a dotted Python module path such as `lxml.etree`.
fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Validates a Debian package name.
fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };

    first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}
