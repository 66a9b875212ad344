//! The standard step catalog for a single-host Odoo stack.
//!
//! Steps follow the manual install guide: packages, database server, system
//! user, database role, source checkout, virtualenv, directories, the
//! configuration file and the service unit, then the endpoint check.
//! Operator-defined steps from the configuration are appended after them.

use std::path::Path;
use std::time::Duration;

use crate::config::{
    ConfigHasher, CustomStepConfig, ProvisionConfig, render_app_config, render_service_unit,
    venv_python,
};
use crate::host::{CommandSpec, Credential, FileSpec};

use super::step::{Check, Operation, Step};

/// Ids of the standard steps, in declaration order.
pub const STANDARD_STEP_IDS: &[&str] = &[
    INSTALL_SYSTEM_PACKAGES,
    INSTALL_POSTGRESQL,
    START_POSTGRESQL,
    CREATE_SYSTEM_USER,
    CREATE_DB_ROLE,
    FETCH_SOURCE,
    CREATE_VIRTUALENV,
    INSTALL_PYTHON_REQUIREMENTS,
    CREATE_ADDONS_DIR,
    CREATE_LOG_DIR,
    WRITE_CONFIG,
    WRITE_SERVICE_UNIT,
    ENABLE_SERVICE,
    VERIFY_WEB_ENDPOINT,
];

/// Installs build and runtime dependencies.
pub const INSTALL_SYSTEM_PACKAGES: &str = "install-system-packages";
/// Installs the database server.
pub const INSTALL_POSTGRESQL: &str = "install-postgresql";
/// Enables and starts the database server.
pub const START_POSTGRESQL: &str = "start-postgresql";
/// Creates the application system user.
pub const CREATE_SYSTEM_USER: &str = "create-system-user";
/// Creates the application database role.
pub const CREATE_DB_ROLE: &str = "create-db-role";
/// Clones the application source.
pub const FETCH_SOURCE: &str = "fetch-source";
/// Creates the Python virtualenv.
pub const CREATE_VIRTUALENV: &str = "create-virtualenv";
/// Installs Python requirements into the virtualenv.
pub const INSTALL_PYTHON_REQUIREMENTS: &str = "install-python-requirements";
/// Creates custom addon directories.
pub const CREATE_ADDONS_DIR: &str = "create-addons-dir";
/// Creates the log directory.
pub const CREATE_LOG_DIR: &str = "create-log-dir";
/// Writes the application configuration file.
pub const WRITE_CONFIG: &str = "write-config";
/// Writes the systemd service unit.
pub const WRITE_SERVICE_UNIT: &str = "write-service-unit";
/// Enables and starts the application service.
pub const ENABLE_SERVICE: &str = "enable-service";
/// Waits for the web endpoint to answer.
pub const VERIFY_WEB_ENDPOINT: &str = "verify-web-endpoint";

/// Database cluster superuser.
const DB_SUPERUSER: &str = "postgres";

/// Builds the full step list: the standard catalog followed by custom steps.
#[must_use]
pub fn build_steps(config: &ProvisionConfig) -> Vec<Step> {
    let mut steps = standard_steps(config);
    steps.extend(config.custom_steps.iter().filter_map(custom_step));
    steps
}

/// Builds the standard steps for a configuration.
#[must_use]
pub fn standard_steps(config: &ProvisionConfig) -> Vec<Step> {
    let app_user = Credential::User(config.app.user.clone());
    let hasher = ConfigHasher::new();

    let install_packages = Step::new(
        INSTALL_SYSTEM_PACKAGES,
        "Install system packages",
        Check::All(
            config
                .packages
                .system
                .iter()
                .map(|p| Check::PackageInstalled(p.clone()))
                .collect(),
        ),
    )
    .then(Operation::Run(apt_get().arg("update")))
    .then(Operation::Run(
        apt_get()
            .args(["install", "-y", "--no-install-recommends"])
            .args(config.packages.system.iter().cloned()),
    ));

    let install_postgresql = Step::new(
        INSTALL_POSTGRESQL,
        "Install the database server",
        Check::PackageInstalled(config.packages.database.clone()),
    )
    .then(Operation::Run(
        apt_get().args(["install", "-y"]).arg(config.packages.database.clone()),
    ));

    let start_postgresql = service_step(
        START_POSTGRESQL,
        "Enable and start the database server",
        &config.database.service_unit,
    )
    .requires([INSTALL_POSTGRESQL]);

    let create_user = Step::new(
        CREATE_SYSTEM_USER,
        format!("Create system user {}", config.app.user),
        Check::UserExists(config.app.user.clone()),
    )
    .then(Operation::Run(
        CommandSpec::new("useradd")
            .args(["-m", "-d"])
            .arg(path_arg(&config.app.home))
            .args(["-U", "-r", "-s", "/bin/bash"])
            .arg(config.app.user.clone()),
    ));

    let mut create_role = Step::new(
        CREATE_DB_ROLE,
        format!("Create database role {}", config.database.user),
        Check::DbRoleExists(config.database.user.clone()),
    )
    .requires([START_POSTGRESQL, CREATE_SYSTEM_USER])
    .then(Operation::Run(
        CommandSpec::new("createuser")
            .arg("-s")
            .arg(config.database.user.clone())
            .run_as(Credential::User(String::from(DB_SUPERUSER))),
    ));
    if let Some(password) = &config.database.password {
        create_role = create_role.then(Operation::Run(
            CommandSpec::new("psql")
                .args(["-X", "-q", "-v", "ON_ERROR_STOP=1"])
                .stdin(format!(
                    "ALTER ROLE \"{}\" WITH PASSWORD '{password}';\n",
                    config.database.user
                ))
                .run_as(Credential::User(String::from(DB_SUPERUSER))),
        ));
    }

    let launcher = config.app.source_dir.join("odoo-bin");
    let fetch_source = Step::new(
        FETCH_SOURCE,
        format!("Clone {} ({})", config.app.repository, config.app.branch),
        Check::PathExists(launcher),
    )
    .requires([CREATE_SYSTEM_USER, INSTALL_SYSTEM_PACKAGES])
    .then(Operation::Run(
        CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--branch"])
            .arg(config.app.branch.clone())
            .arg(config.app.repository.clone())
            .arg(path_arg(&config.app.source_dir))
            .run_as(app_user.clone()),
    ));

    let python = venv_python(config);
    let create_venv = Step::new(
        CREATE_VIRTUALENV,
        "Create the Python virtualenv",
        Check::PathExists(python.clone()),
    )
    .requires([CREATE_SYSTEM_USER, INSTALL_SYSTEM_PACKAGES])
    .then(Operation::Run(
        CommandSpec::new("python3")
            .args(["-m", "venv"])
            .arg(path_arg(&config.app.venv_dir))
            .run_as(app_user.clone()),
    ));

    let pip = path_arg(&config.app.venv_dir.join("bin/pip"));
    let imports = format!("import {}", config.python.probe_modules.join(", "));
    let install_requirements = Step::new(
        INSTALL_PYTHON_REQUIREMENTS,
        "Install Python requirements",
        Check::CommandSucceeds(
            CommandSpec::new(path_arg(&python))
                .arg("-c")
                .arg(imports)
                .run_as(app_user.clone()),
        ),
    )
    .requires([FETCH_SOURCE, CREATE_VIRTUALENV])
    .then(Operation::Run(
        CommandSpec::new(pip.clone())
            .args(["install", "wheel"])
            .run_as(app_user.clone()),
    ))
    .then(Operation::Run(
        CommandSpec::new(pip)
            .args(["install", "-r"])
            .arg(path_arg(&config.app.source_dir.join("requirements.txt")))
            .run_as(app_user),
    ));

    let addons_dirs = config.extra_addons_dirs();
    let mut create_addons = Step::new(
        CREATE_ADDONS_DIR,
        "Create custom addon directories",
        Check::All(addons_dirs.iter().map(|d| Check::PathExists((*d).clone())).collect()),
    )
    .requires([CREATE_SYSTEM_USER]);
    for dir in addons_dirs {
        create_addons = create_addons.then(Operation::Run(install_dir(dir, &config.app.user)));
    }

    let log_dir = config.log_dir();
    let create_log_dir = Step::new(
        CREATE_LOG_DIR,
        format!("Create log directory {}", log_dir.display()),
        Check::PathExists(log_dir.clone()),
    )
    .requires([CREATE_SYSTEM_USER])
    .then(Operation::Run(install_dir(&log_dir, &config.app.user)));

    let app_config = render_app_config(config);
    let write_config = Step::new(
        WRITE_CONFIG,
        format!("Write {}", config.server.config_path.display()),
        Check::FileContent {
            path: config.server.config_path.clone(),
            digest: hasher.digest(app_config.as_bytes()),
        },
    )
    .requires([CREATE_DB_ROLE, CREATE_LOG_DIR, CREATE_ADDONS_DIR])
    .then(Operation::WriteFile(FileSpec {
        path: config.server.config_path.clone(),
        contents: app_config,
        mode: 0o640,
        owner: Some(config.app.user.clone()),
        group: Some(config.app.user.clone()),
    }));

    let unit = render_service_unit(config);
    let write_unit = Step::new(
        WRITE_SERVICE_UNIT,
        format!("Write {}", config.unit_path().display()),
        Check::FileContent {
            path: config.unit_path(),
            digest: hasher.digest(unit.as_bytes()),
        },
    )
    .requires([WRITE_CONFIG, INSTALL_PYTHON_REQUIREMENTS, FETCH_SOURCE])
    .then(Operation::WriteFile(FileSpec {
        path: config.unit_path(),
        contents: unit,
        mode: 0o644,
        owner: None,
        group: None,
    }))
    .then(Operation::Run(CommandSpec::new("systemctl").arg("daemon-reload")));

    let enable_service = service_step(
        ENABLE_SERVICE,
        "Enable and start the application service",
        &config.unit_name(),
    )
    .requires([WRITE_SERVICE_UNIT, START_POSTGRESQL]);

    let url = config.endpoint_url();
    let verify = Step::new(
        VERIFY_WEB_ENDPOINT,
        format!("Verify {url}"),
        Check::EndpointReachable(url.clone()),
    )
    .requires([ENABLE_SERVICE])
    .then(Operation::WaitForEndpoint {
        url,
        wait: Duration::from_secs(config.health.wait_secs),
        interval: Duration::from_secs(config.health.interval_secs),
    });

    vec![
        install_packages,
        install_postgresql,
        start_postgresql,
        create_user,
        create_role,
        fetch_source,
        create_venv,
        install_requirements,
        create_addons,
        create_log_dir,
        write_config,
        write_unit,
        enable_service,
        verify,
    ]
}

/// Converts a custom step definition. Invalid definitions are rejected by
/// the validator; an empty check here yields `None`.
fn custom_step(definition: &CustomStepConfig) -> Option<Step> {
    let credential = definition
        .run_as
        .clone()
        .map_or(Credential::Root, Credential::User);
    let check = CommandSpec::from_argv(&definition.check)?.run_as(credential.clone());

    let description = definition
        .description
        .clone()
        .unwrap_or_else(|| definition.id.clone());
    let mut step = Step::new(definition.id.clone(), description, Check::CommandSucceeds(check))
        .requires(definition.requires.iter().cloned());
    for argv in &definition.apply {
        if let Some(command) = CommandSpec::from_argv(argv) {
            step = step.then(Operation::Run(command.run_as(credential.clone())));
        }
    }
    Some(step)
}

fn service_step(id: &str, description: &str, unit: &str) -> Step {
    Step::new(
        id,
        description,
        Check::All(vec![
            Check::ServiceEnabled(unit.to_string()),
            Check::ServiceActive(unit.to_string()),
        ]),
    )
    .then(Operation::Run(
        CommandSpec::new("systemctl").args(["enable", "--now", unit]),
    ))
}

fn apt_get() -> CommandSpec {
    CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

fn install_dir(dir: &Path, owner: &str) -> CommandSpec {
    CommandSpec::new("install")
        .args(["-d", "-o", owner, "-g", owner, "-m", "0755"])
        .arg(path_arg(dir))
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
