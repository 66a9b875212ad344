//! The live host: commands run as child processes.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Escalation;
use crate::error::HostError;

use super::command::{CommandOutput, CommandSpec, Credential, FileSpec};
use super::health::HealthChecker;
use super::Host;

/// Builds the full argv for a command, including the privilege switch.
///
/// Environment variables are passed through `env` so they survive `sudo`
/// and `runuser`, which both reset the environment.
#[must_use]
pub fn argv(command: &CommandSpec, escalation: Escalation) -> Vec<String> {
    let mut argv: Vec<String> = match (escalation, &command.run_as) {
        (Escalation::None, Credential::Root) => Vec::new(),
        (Escalation::None, Credential::User(user)) => {
            vec![String::from("runuser"), String::from("-u"), user.clone(), String::from("--")]
        }
        (Escalation::Sudo, Credential::Root) => {
            vec![String::from("sudo"), String::from("-n"), String::from("--")]
        }
        (Escalation::Sudo, Credential::User(user)) => vec![
            String::from("sudo"),
            String::from("-n"),
            String::from("-u"),
            user.clone(),
            String::from("--"),
        ],
    };

    if !command.env.is_empty() {
        argv.push(String::from("env"));
        argv.extend(command.env.iter().map(|(k, v)| format!("{k}={v}")));
    }
    argv.push(command.program.clone());
    argv.extend(command.args.iter().cloned());
    argv
}

/// Host implementation backed by the local machine.
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// How privileged commands are executed.
    escalation: Escalation,
    /// HTTP client for endpoint probes.
    health: HealthChecker,
}

impl SystemHost {
    /// Creates a host using the given escalation strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(escalation: Escalation) -> Result<Self, HostError> {
        Ok(Self {
            escalation,
            health: HealthChecker::new()?,
        })
    }

    /// Runs `test -e` as root, for paths we cannot stat ourselves.
    async fn privileged_exists(&self, path: &Path) -> Result<bool, HostError> {
        let output = self
            .run(&CommandSpec::new("test").arg("-e").arg(path.display().to_string()))
            .await?;
        Ok(output.success())
    }

    /// Writes a private staging file that `install` copies into place.
    async fn stage(&self, file: &FileSpec) -> Result<PathBuf, HostError> {
        let staging = std::env::temp_dir().join(format!("odoo-provision-{}", uuid::Uuid::new_v4()));
        let mut handle = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&staging)
            .await
            .map_err(|e| HostError::io(&staging, &e))?;
        handle
            .write_all(file.contents.as_bytes())
            .await
            .map_err(|e| HostError::io(&staging, &e))?;
        handle.flush().await.map_err(|e| HostError::io(&staging, &e))?;
        Ok(staging)
    }
}

#[async_trait]
impl Host for SystemHost {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, HostError> {
        let argv = argv(command, self.escalation);
        debug!("Running: {command}");

        let Some((program, args)) = argv.split_first() else {
            return Err(HostError::Spawn {
                program: String::new(),
                message: String::from("empty command"),
            });
        };

        let spawn_error = |e: std::io::Error| HostError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        };

        let mut process = Command::new(program);
        process
            .args(args)
            .stdin(if command.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(CommandOutput {
                    status: Some(CommandOutput::NOT_FOUND),
                    stdout: String::new(),
                    stderr: format!("{program}: command not found"),
                });
            }
            Err(e) => return Err(spawn_error(e)),
        };

        if let Some(input) = &command.stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes()).await.map_err(spawn_error)?;
            // Closing the pipe signals end of input.
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("Command `{command}` exited with {:?}", result.status);
        Ok(result)
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::PermissionDenied && self.escalation == Escalation::Sudo => {
                if !self.privileged_exists(path).await? {
                    return Ok(None);
                }
                let output = self
                    .run(&CommandSpec::new("cat").arg(path.display().to_string()))
                    .await?;
                if output.success() {
                    Ok(Some(output.stdout.into_bytes()))
                } else {
                    Err(HostError::Io {
                        path: path.to_path_buf(),
                        message: output.diagnostic(),
                    })
                }
            }
            Err(e) => Err(HostError::io(path, &e)),
        }
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, HostError> {
        match tokio::fs::try_exists(path).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.kind() == ErrorKind::PermissionDenied && self.escalation == Escalation::Sudo => {
                self.privileged_exists(path).await
            }
            Err(e) => Err(HostError::io(path, &e)),
        }
    }

    async fn write_file(&self, file: &FileSpec) -> Result<(), HostError> {
        debug!("Installing {file}");
        let staging = self.stage(file).await?;

        let mut install = CommandSpec::new("install")
            .arg("-D")
            .arg("-m")
            .arg(format!("{:04o}", file.mode));
        if let Some(owner) = &file.owner {
            install = install.arg("-o").arg(owner.clone());
        }
        if let Some(group) = &file.group {
            install = install.arg("-g").arg(group.clone());
        }
        install = install
            .arg(staging.display().to_string())
            .arg(file.path.display().to_string());

        let result = self.run(&install).await;

        if let Err(e) = tokio::fs::remove_file(&staging).await {
            warn!("Failed to remove staging file {}: {e}", staging.display());
        }

        let output = result?;
        if output.success() {
            Ok(())
        } else {
            Err(HostError::Io {
                path: file.path.clone(),
                message: output.diagnostic(),
            })
        }
    }

    async fn http_status(&self, url: &str) -> Result<Option<u16>, HostError> {
        self.health.status(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_root_without_escalation() {
        let cmd = CommandSpec::new("systemctl").args(["enable", "--now", "odoo.service"]);
        assert_eq!(
            argv(&cmd, Escalation::None),
            vec!["systemctl", "enable", "--now", "odoo.service"]
        );
    }

    #[test]
    fn test_argv_user_switch() {
        let cmd = CommandSpec::new("psql")
            .arg("-tAc")
            .arg("SELECT 1")
            .run_as(Credential::User(String::from("postgres")));
        assert_eq!(
            argv(&cmd, Escalation::None),
            vec!["runuser", "-u", "postgres", "--", "psql", "-tAc", "SELECT 1"]
        );
        assert_eq!(
            argv(&cmd, Escalation::Sudo),
            vec!["sudo", "-n", "-u", "postgres", "--", "psql", "-tAc", "SELECT 1"]
        );
    }

    #[test]
    fn test_argv_env_survives_sudo() {
        let cmd = CommandSpec::new("apt-get")
            .args(["install", "-y", "git"])
            .env("DEBIAN_FRONTEND", "noninteractive");
        assert_eq!(
            argv(&cmd, Escalation::Sudo),
            vec![
                "sudo",
                "-n",
                "--",
                "env",
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "install",
                "-y",
                "git"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let host = SystemHost::new(Escalation::None).unwrap();
        let output = host
            .run(&CommandSpec::new("odoo-provision-no-such-program"))
            .await
            .unwrap();
        assert_eq!(output.status, Some(CommandOutput::NOT_FOUND));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let host = SystemHost::new(Escalation::None).unwrap();
        let output = host
            .run(&CommandSpec::new("cat").stdin("ALTER ROLE odoo;\n"))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "ALTER ROLE odoo;\n");
    }

    #[tokio::test]
    async fn test_read_file_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = SystemHost::new(Escalation::None).unwrap();
        assert_eq!(host.read_file(&dir.path().join("absent")).await.unwrap(), None);
        assert!(!host.path_exists(&dir.path().join("absent")).await.unwrap());
        assert!(host.path_exists(dir.path()).await.unwrap());
    }
}
