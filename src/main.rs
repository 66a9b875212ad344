//! odoo-provision CLI entrypoint.
//!
//! This is the main entrypoint for the odoo-provision command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use odoo_provision::cli::{Cli, Commands, InputArgs, OutputFormatter, RenderTarget};
use odoo_provision::config::{
    ConfigParser, ConfigValidator, ProvisionConfig, SAMPLE_CONFIG, SAMPLE_ENV, render_app_config,
    render_service_unit,
};
use odoo_provision::error::{EXIT_FAILED, EXIT_OK, Result};
use odoo_provision::planner::StepGraph;
use odoo_provision::provisioner::Provisioner;
use odoo_provision::state::{LocalStateStore, StateStore, default_state_dir};
use odoo_provision::steps::build_steps;
use odoo_provision::SystemHost;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FAILED);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the defaults; `--verbose` raises them to debug.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();
    let state_dir = cli.state_dir.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { input, warnings } => {
            cmd_validate(config_path, &input, warnings, &formatter)
        }
        Commands::Plan { input } => cmd_plan(config_path, state_dir, &input, &formatter).await,
        Commands::Apply {
            input,
            yes,
            timeout,
        } => cmd_apply(config_path, state_dir, &input, yes, timeout, &formatter).await,
        Commands::Facts => cmd_facts(config_path, state_dir, &formatter).await,
        Commands::Render { input, target } => cmd_render(config_path, &input, target, &formatter),
        Commands::Status => cmd_status(config_path, state_dir, &formatter).await,
        Commands::History { limit, clear } => {
            cmd_history(config_path, state_dir, limit, clear, &formatter).await
        }
    }
}

/// Write a sample configuration.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing configuration in: {}", path.display());

    let config_path = path.join("odoo-provision.yaml");
    let env_path = path.join(".env.example");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_FAILED);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, SAMPLE_CONFIG)?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, SAMPLE_ENV)?;
    eprintln!("Created: {}", env_path.display());

    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and set the admin password");
    eprintln!("  2. Edit odoo-provision.yaml if the defaults do not fit");
    eprintln!("  3. Run 'odoo-provision validate' to check your configuration");
    eprintln!("  4. Run 'odoo-provision plan' to see what will change");
    eprintln!("  5. Run 'odoo-provision apply' to provision the host");

    Ok(EXIT_OK)
}

/// Validate configuration and the step graph.
fn cmd_validate(
    config_path: Option<&Path>,
    input: &InputArgs,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path, Some(input), None)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&config);
    for err in &result.errors {
        error!("{err}");
    }
    validator.validate(&config)?;

    let graph = StepGraph::new(build_steps(&config))?;
    graph.execution_order()?;

    println!(
        "{}",
        formatter.format_validation(&result, &config, graph.len(), show_warnings)
    );
    Ok(EXIT_OK)
}

/// Show which steps would apply.
async fn cmd_plan(
    config_path: Option<&Path>,
    state_dir: Option<&Path>,
    input: &InputArgs,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_validated_config(config_path, input, None)?;
    let host = SystemHost::new(config.host.escalation)?;
    let store = state_store(state_dir, &config);

    let plan = Provisioner::new(&config, &host, &store).plan().await?;
    println!("{}", formatter.format_plan(&plan));
    Ok(EXIT_OK)
}

/// Provision the host.
async fn cmd_apply(
    config_path: Option<&Path>,
    state_dir: Option<&Path>,
    input: &InputArgs,
    auto_approve: bool,
    timeout: Option<u64>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_validated_config(config_path, input, timeout)?;
    let host = SystemHost::new(config.host.escalation)?;
    let store = state_store(state_dir, &config);
    let provisioner = Provisioner::new(&config, &host, &store);

    // Confirm
    if !auto_approve {
        let plan = provisioner.plan().await?;
        if !plan.is_converged() {
            eprintln!("{}", formatter.format_plan(&plan));
            eprint!("Do you want to apply these steps? [y/N]: ");
            std::io::stderr().flush()?;

            let mut answer = String::new();
            std::io::stdin().read_line(&mut answer)?;

            if !answer.trim().eq_ignore_ascii_case("y") {
                eprintln!("Apply cancelled.");
                return Ok(EXIT_OK);
            }
        }
    }

    let timeout = config.run.timeout_secs.map(Duration::from_secs);
    let report = provisioner.run(timeout).await?;
    println!("{}", formatter.format_report(&report));

    // The report is out; a log write failure still fails the run.
    if let Err(e) = provisioner.record(&report).await {
        eprintln!("{}", formatter.error(&format!("Failed to record run: {e}")));
        return Ok(EXIT_FAILED);
    }
    debug!("Recorded run {}", report.run_id);

    Ok(report.exit_code())
}

/// Print the host facts the steps depend on.
async fn cmd_facts(
    config_path: Option<&Path>,
    state_dir: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path, None, None)?;
    let host = SystemHost::new(config.host.escalation)?;
    let store = state_store(state_dir, &config);

    let facts = Provisioner::new(&config, &host, &store).facts().await;
    println!("{}", formatter.format_facts(&facts));
    Ok(EXIT_OK)
}

/// Print a rendered file.
fn cmd_render(
    config_path: Option<&Path>,
    input: &InputArgs,
    target: RenderTarget,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_validated_config(config_path, input, None)?;

    let (path, contents) = match target {
        RenderTarget::Config => (config.server.config_path.clone(), render_app_config(&config)),
        RenderTarget::Unit => (config.unit_path(), render_service_unit(&config)),
    };
    print!("{}", formatter.format_rendered(&path.display().to_string(), &contents));
    Ok(EXIT_OK)
}

/// Show service and endpoint health.
async fn cmd_status(
    config_path: Option<&Path>,
    state_dir: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path, None, None)?;
    let host = SystemHost::new(config.host.escalation)?;
    let store = state_store(state_dir, &config);

    let status = Provisioner::new(&config, &host, &store).status().await?;
    println!("{}", formatter.format_status(&status));
    Ok(if status.is_healthy() { EXIT_OK } else { EXIT_FAILED })
}

/// Show or clear the run log.
async fn cmd_history(
    config_path: Option<&Path>,
    state_dir: Option<&Path>,
    limit: usize,
    clear: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path, None, None)?;
    let store = state_store(state_dir, &config);

    if clear {
        if !store.exists().await? {
            eprintln!("{}", formatter.warning("No run log to clear."));
            return Ok(EXIT_OK);
        }
        store.delete().await?;
        eprintln!("{}", formatter.success("Run log cleared."));
        return Ok(EXIT_OK);
    }

    let host = SystemHost::new(config.host.escalation)?;
    let history = Provisioner::new(&config, &host, &store).history().await?;
    println!("{}", formatter.format_history(&history, limit));
    Ok(EXIT_OK)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads configuration: `.env`, file, environment, then flags.
fn load_config(
    config_path: Option<&Path>,
    input: Option<&InputArgs>,
    timeout: Option<u64>,
) -> Result<ProvisionConfig> {
    let mut config = ConfigParser::new().load(config_path)?;
    if let Some(input) = input {
        ConfigParser::apply_overrides(&mut config, &input.overrides(timeout));
    }
    Ok(config)
}

/// Loads configuration and rejects invalid values.
fn load_validated_config(
    config_path: Option<&Path>,
    input: &InputArgs,
    timeout: Option<u64>,
) -> Result<ProvisionConfig> {
    let config = load_config(config_path, Some(input), timeout)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

/// Creates the run log store: flag, then configuration, then default.
fn state_store(state_dir: Option<&Path>, config: &ProvisionConfig) -> LocalStateStore {
    let dir: PathBuf = state_dir
        .map(Path::to_path_buf)
        .or_else(|| config.state.dir.clone())
        .unwrap_or_else(default_state_dir);
    debug!("Using state directory: {}", dir.display());
    LocalStateStore::with_base_dir(dir)
}
