//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files, environment
//! variables and command-line overrides, with proper precedence and error
//! handling: defaults < file < environment < flags.

use crate::error::{ConfigError, ProvisionError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::ProvisionConfig;

/// Values supplied on the command line, applied last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Admin (master) password.
    pub admin_passwd: Option<String>,
    /// Database role password.
    pub db_password: Option<String>,
    /// Addon directories; replaces the configured list when non-empty.
    pub addons_path: Vec<PathBuf>,
    /// Run deadline in seconds.
    pub timeout_secs: Option<u64>,
}

/// Configuration parser for loading provisioning configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory the file search starts from; the working directory when unset.
    start_dir: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { start_dir: None }
    }

    /// Sets the directory the configuration file search starts from.
    #[must_use]
    pub fn with_start_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.start_dir = Some(dir.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ProvisionConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ProvisionError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ProvisionConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(ProvisionConfig::default());
        }

        let config: ProvisionConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ProvisionError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for service '{}' ({} custom steps)",
            config.service.name,
            config.custom_steps.len()
        );
        Ok(config)
    }

    /// Loads the configuration file if one is given or found, otherwise the
    /// defaults, then applies environment overrides.
    ///
    /// The `.env` next to the file is loaded first; without a file, the one
    /// in the start directory.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any file is invalid.
    pub fn load(&self, explicit: Option<&Path>) -> Result<ProvisionConfig> {
        let start_dir = match &self.start_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let path = explicit.map(Path::to_path_buf).or_else(|| find_config_file(&start_dir));

        let env_dir = path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(start_dir.as_path());
        Self::load_dotenv(env_dir)?;

        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => {
                info!("No configuration file found, using defaults");
                ProvisionConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Variables use the form `ODOO_PROVISION_<SECTION>_<KEY>`, plus the
    /// `ODOO_ADMIN_PASSWD`, `ODOO_DB_PASSWORD` and `ODOO_ADDONS_PATH` inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override cannot be parsed.
    pub fn apply_env_overrides(config: &mut ProvisionConfig) -> Result<()> {
        if let Ok(host) = std::env::var("ODOO_PROVISION_DB_HOST") {
            debug!("Overriding database.host from environment");
            config.database.host = Some(host);
        }

        if let Ok(port) = std::env::var("ODOO_PROVISION_DB_PORT") {
            debug!("Overriding database.port from environment");
            let port = port.parse::<u16>().map_err(|e| {
                ProvisionError::Config(ConfigError::validation(
                    format!("Invalid ODOO_PROVISION_DB_PORT '{port}': {e}"),
                    "database.port",
                ))
            })?;
            config.database.port = Some(port);
        }

        if let Ok(user) = std::env::var("ODOO_PROVISION_DB_USER") {
            debug!("Overriding database.user from environment");
            config.database.user = user;
        }

        if let Ok(branch) = std::env::var("ODOO_PROVISION_APP_BRANCH") {
            debug!("Overriding app.branch from environment");
            config.app.branch = branch;
        }

        if let Ok(passwd) = std::env::var("ODOO_ADMIN_PASSWD") {
            debug!("Overriding server.admin_passwd from environment");
            config.server.admin_passwd = Some(passwd);
        }

        if let Ok(passwd) = std::env::var("ODOO_DB_PASSWORD") {
            debug!("Overriding database.password from environment");
            config.database.password = Some(passwd);
        }

        if let Ok(paths) = std::env::var("ODOO_ADDONS_PATH") {
            debug!("Overriding server.addons_path from environment");
            config.server.addons_path = split_paths(&paths);
        }

        if let Ok(dir) = std::env::var("ODOO_PROVISION_STATE_DIR") {
            debug!("Overriding state.dir from environment");
            config.state.dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Applies command-line overrides, which take precedence over everything.
    pub fn apply_overrides(config: &mut ProvisionConfig, overrides: &Overrides) {
        if let Some(passwd) = &overrides.admin_passwd {
            config.server.admin_passwd = Some(passwd.clone());
        }
        if let Some(passwd) = &overrides.db_password {
            config.database.password = Some(passwd.clone());
        }
        if !overrides.addons_path.is_empty() {
            config.server.addons_path.clone_from(&overrides.addons_path);
        }
        if overrides.timeout_secs.is_some() {
            config.run.timeout_secs = overrides.timeout_secs;
        }
    }

    /// Loads the `.env` file in `dir` if present. Variables already set in
    /// the environment win.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(dir: &Path) -> Result<()> {
        let env_path = dir.join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ProvisionError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Splits a comma-separated path list, dropping empty entries.
#[must_use]
pub fn split_paths(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Commented sample configuration written by `init`.
pub const SAMPLE_CONFIG: &str = include_str!("../../templates/odoo-provision.yaml");

/// Sample `.env` written by `init`.
pub const SAMPLE_ENV: &str = include_str!("../../templates/env.example");

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["odoo-provision.yaml", "odoo-provision.yml"];

/// Finds the configuration file in the given directory or its parents.
#[must_use]
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml("", None).unwrap();
        assert_eq!(config, ProvisionConfig::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r"
server:
  admin_passwd: master-pass
database:
  port: 5433
app:
  branch: '16.0'
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(config.admin_passwd(), "master-pass");
        assert_eq!(config.database.port, Some(5433));
        assert_eq!(config.database.user, "odoo");
        assert_eq!(config.app.branch, "16.0");
        assert_eq!(config.app.user, "odoo");
    }

    #[test]
    fn test_parse_custom_steps() {
        let yaml = r"
custom_steps:
  - id: install-wkhtmltopdf
    requires: [install-system-packages]
    check: [dpkg-query, -W, wkhtmltox]
    apply:
      - [apt-get, install, -y, wkhtmltopdf]
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(config.custom_steps.len(), 1);
        let step = &config.custom_steps[0];
        assert_eq!(step.requires, vec![String::from("install-system-packages")]);
        assert_eq!(step.apply[0][0], "apt-get");
        assert!(step.run_as.is_none());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ConfigParser::new();
        let err = parser.parse_yaml("server: [unclosed", None).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID_INPUT);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = ProvisionConfig::default();
        config.server.admin_passwd = Some(String::from("from-file"));

        let overrides = Overrides {
            admin_passwd: Some(String::from("from-flag")),
            db_password: Some(String::from("db-flag")),
            addons_path: vec![PathBuf::from("/srv/addons")],
            timeout_secs: Some(600),
        };
        ConfigParser::apply_overrides(&mut config, &overrides);

        assert_eq!(config.admin_passwd(), "from-flag");
        assert_eq!(config.database.password.as_deref(), Some("db-flag"));
        assert_eq!(config.server.addons_path, vec![PathBuf::from("/srv/addons")]);
        assert_eq!(config.run.timeout_secs, Some(600));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("odoo-provision.yaml"), "").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("odoo-provision.yaml"));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let parser = ConfigParser::new();
        let err = parser
            .load(Some(Path::new("/nonexistent/odoo-provision.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_dotenv_next_to_found_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("deploy/sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("odoo-provision.yaml"), "service:\n  name: erp\n").unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "ODOO_PROVISION_APP_BRANCH=17.0-from-dotenv\n",
        )
        .unwrap();

        let config = ConfigParser::new().with_start_dir(&nested).load(None).unwrap();
        assert_eq!(config.service.name, "erp");
        assert_eq!(config.app.branch, "17.0-from-dotenv");
    }

    #[test]
    fn test_split_paths() {
        assert_eq!(
            split_paths("/opt/a, /opt/b,,"),
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert!(split_paths("").is_empty());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(SAMPLE_CONFIG, None).unwrap();
        assert_eq!(config, ProvisionConfig::default());
    }
}
