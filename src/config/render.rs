//! Rendering of the files the provisioning run writes to the host.
//!
//! Both outputs are byte-for-byte stable for a given configuration so that
//! their digests can serve as idempotency checks.

use std::fmt::Write;
use std::path::PathBuf;

use super::spec::ProvisionConfig;

/// Value the application expects for an unset connection setting.
const UNSET: &str = "False";

/// Renders the application configuration file.
#[must_use]
pub fn render_app_config(config: &ProvisionConfig) -> String {
    let db = &config.database;
    let addons = config
        .server
        .addons_path
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut out = String::from("[options]\n");
    let _ = writeln!(out, "admin_passwd = {}", config.admin_passwd());
    let _ = writeln!(out, "db_host = {}", db.host.as_deref().unwrap_or(UNSET));
    let _ = writeln!(
        out,
        "db_port = {}",
        db.port.map_or_else(|| UNSET.to_string(), |p| p.to_string())
    );
    let _ = writeln!(out, "db_user = {}", db.user);
    let _ = writeln!(out, "db_password = {}", db.password.as_deref().unwrap_or(UNSET));
    let _ = writeln!(out, "addons_path = {addons}");
    let _ = writeln!(out, "logfile = {}", config.server.logfile.display());
    out
}

/// Renders the systemd service unit.
#[must_use]
pub fn render_service_unit(config: &ProvisionConfig) -> String {
    let python = config.app.venv_dir.join("bin/python3");
    let launcher = config.app.source_dir.join("odoo-bin");

    let mut out = String::from("[Unit]\n");
    let _ = writeln!(out, "Description={}", config.service.description);
    let _ = writeln!(out, "After={}", config.database.service_unit);
    out.push_str("\n[Service]\nType=simple\n");
    let _ = writeln!(out, "User={}", config.app.user);
    let _ = writeln!(
        out,
        "ExecStart={} {} -c {}",
        python.display(),
        launcher.display(),
        config.server.config_path.display()
    );
    out.push_str("StandardOutput=journal+console\n");
    out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    out
}

/// Returns the interpreter inside the virtualenv.
#[must_use]
pub fn venv_python(config: &ProvisionConfig) -> PathBuf {
    config.app.venv_dir.join("bin/python3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_app_config_defaults() {
        let mut config = ProvisionConfig::default();
        config.server.admin_passwd = Some(String::from("s3cret-master"));

        let expected = "[options]\n\
admin_passwd = s3cret-master\n\
db_host = False\n\
db_port = False\n\
db_user = odoo\n\
db_password = False\n\
addons_path = /opt/odoo/odoo/addons,/opt/odoo/custom-addons\n\
logfile = /var/log/odoo/odoo.log\n";

        assert_eq!(render_app_config(&config), expected);
    }

    #[test]
    fn test_render_app_config_remote_db() {
        let mut config = ProvisionConfig::default();
        config.server.admin_passwd = Some(String::from("admin"));
        config.database.host = Some(String::from("db.internal"));
        config.database.port = Some(5433);
        config.database.password = Some(String::from("pw"));

        let rendered = render_app_config(&config);
        assert!(rendered.contains("db_host = db.internal\n"));
        assert!(rendered.contains("db_port = 5433\n"));
        assert!(rendered.contains("db_password = pw\n"));
    }

    #[test]
    fn test_render_service_unit_defaults() {
        let config = ProvisionConfig::default();
        let expected = "[Unit]\n\
Description=Odoo\n\
After=postgresql.service\n\
\n\
[Service]\n\
Type=simple\n\
User=odoo\n\
ExecStart=/opt/odoo/venv/bin/python3 /opt/odoo/odoo/odoo-bin -c /etc/odoo.conf\n\
StandardOutput=journal+console\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n";

        assert_eq!(render_service_unit(&config), expected);
    }
}
