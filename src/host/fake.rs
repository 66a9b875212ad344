//! In-memory host for end-to-end tests.
//!
//! Interprets the commands issued by the catalog and the prober against a
//! simulated Debian machine, so whole runs can be replayed without root.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::HostError;

use super::command::{CommandOutput, CommandSpec, Credential, FileSpec};
use super::Host;

#[derive(Debug, Default)]
struct Machine {
    packages: BTreeSet<String>,
    users: BTreeSet<String>,
    roles: BTreeSet<String>,
    paths: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    enabled: BTreeSet<String>,
    active: BTreeSet<String>,
    requirements_installed: bool,
    mutations: usize,
    failures: Vec<String>,
}

/// Simulated host. Commands it does not know exit 127.
#[derive(Debug)]
pub(crate) struct FakeHost {
    machine: Mutex<Machine>,
    web_unit: String,
}

fn exit(code: i32) -> CommandOutput {
    CommandOutput {
        status: Some(code),
        ..CommandOutput::default()
    }
}

fn stdout(code: i32, text: &str) -> CommandOutput {
    CommandOutput {
        status: Some(code),
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

fn flag(value: bool) -> CommandOutput {
    exit(i32::from(!value))
}

impl FakeHost {
    /// An empty machine whose web endpoint is served by `odoo.service`.
    pub(crate) fn new() -> Self {
        Self {
            machine: Mutex::new(Machine::default()),
            web_unit: String::from("odoo.service"),
        }
    }

    /// A machine with the database server installed and running.
    pub(crate) fn with_database() -> Self {
        let host = Self::new();
        {
            let mut machine = host.machine.lock().unwrap();
            machine.packages.insert(String::from("postgresql"));
            machine.users.insert(String::from("postgres"));
            machine.enabled.insert(String::from("postgresql.service"));
            machine.active.insert(String::from("postgresql.service"));
        }
        host
    }

    /// Makes every mutating command whose display contains `pattern` exit 1.
    pub(crate) fn fail_when(&self, pattern: &str) {
        self.machine.lock().unwrap().failures.push(pattern.to_string());
    }

    /// Number of mutating commands and file writes so far.
    pub(crate) fn mutations(&self) -> usize {
        self.machine.lock().unwrap().mutations
    }

    /// Contents of a written file.
    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.machine
            .lock()
            .unwrap()
            .files
            .get(Path::new(path))
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    fn query(machine: &Machine, command: &CommandSpec) -> Option<CommandOutput> {
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let output = match (command.program.as_str(), args.as_slice()) {
            ("dpkg-query", [.., name]) => {
                if machine.packages.contains(*name) {
                    stdout(0, "install ok installed")
                } else {
                    exit(1)
                }
            }
            ("getent", ["passwd", name]) => exit(if machine.users.contains(*name) { 0 } else { 2 }),
            ("psql", ["-tAc", query]) => {
                if !machine.packages.contains("postgresql") {
                    exit(CommandOutput::NOT_FOUND)
                } else if !machine.active.contains("postgresql.service") {
                    CommandOutput {
                        status: Some(2),
                        stdout: String::new(),
                        stderr: String::from("psql: error: connection to server failed"),
                    }
                } else {
                    let exists = machine.roles.iter().any(|r| query.contains(&format!("'{r}'")));
                    stdout(0, if exists { "1\n" } else { "" })
                }
            }
            ("systemctl", ["is-enabled", unit]) => {
                let on = machine.enabled.contains(*unit);
                stdout(i32::from(!on), if on { "enabled\n" } else { "disabled\n" })
            }
            ("systemctl", ["is-active", unit]) => {
                let on = machine.active.contains(*unit);
                stdout(if on { 0 } else { 3 }, if on { "active\n" } else { "inactive\n" })
            }
            ("true", _) => exit(0),
            ("false", _) => exit(1),
            (python, ["-c", _]) if python.ends_with("bin/python3") => flag(machine.requirements_installed),
            _ => return None,
        };
        Some(output)
    }

    fn mutate(machine: &mut Machine, command: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        match (command.program.as_str(), args.as_slice()) {
            ("apt-get", ["update"]) => {}
            ("apt-get", ["install", rest @ ..]) => {
                for name in rest.iter().filter(|a| !a.starts_with('-')) {
                    machine.packages.insert((*name).to_string());
                    if *name == "postgresql" {
                        machine.users.insert(String::from("postgres"));
                    }
                }
            }
            ("useradd", [.., name]) => {
                if let Some(i) = args.iter().position(|a| *a == "-d") {
                    machine.paths.insert(PathBuf::from(args[i + 1]));
                }
                machine.users.insert((*name).to_string());
            }
            ("createuser", [.., name]) => {
                if !machine.active.contains("postgresql.service") {
                    return exit(1);
                }
                machine.roles.insert((*name).to_string());
            }
            ("psql", ["-X", ..]) if command.stdin.is_some() => {}
            ("systemctl", ["daemon-reload"]) => {}
            ("systemctl", ["enable", "--now", unit]) => {
                machine.enabled.insert((*unit).to_string());
                machine.active.insert((*unit).to_string());
            }
            ("git", [.., dir]) => {
                let dir = PathBuf::from(dir);
                machine.paths.insert(dir.join("odoo-bin"));
                machine.paths.insert(dir.join("requirements.txt"));
                machine.paths.insert(dir);
            }
            ("python3", ["-m", "venv", dir]) => {
                machine.paths.insert(PathBuf::from(dir).join("bin/python3"));
                machine.paths.insert(PathBuf::from(dir));
            }
            (pip, ["install", "-r", _]) if pip.ends_with("bin/pip") => {
                machine.requirements_installed = true;
            }
            (pip, ["install", _]) if pip.ends_with("bin/pip") => {}
            ("install", ["-d", .., dir]) => {
                machine.paths.insert(PathBuf::from(dir));
            }
            _ => return exit(CommandOutput::NOT_FOUND),
        }
        exit(0)
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, HostError> {
        let mut machine = self.machine.lock().unwrap();
        if let Some(output) = Self::query(&machine, command) {
            return Ok(output);
        }

        machine.mutations += 1;
        let shown = command.to_string();
        if machine.failures.iter().any(|p| shown.contains(p.as_str())) {
            return Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("{shown}: injected failure"),
            });
        }
        if let Credential::User(user) = &command.run_as
            && !machine.users.contains(user)
        {
            return Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("runuser: user {user} does not exist"),
            });
        }
        Ok(Self::mutate(&mut machine, command))
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        Ok(self.machine.lock().unwrap().files.get(path).cloned())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, HostError> {
        let machine = self.machine.lock().unwrap();
        Ok(machine.paths.contains(path) || machine.files.contains_key(path))
    }

    async fn write_file(&self, file: &FileSpec) -> Result<(), HostError> {
        let mut machine = self.machine.lock().unwrap();
        machine.mutations += 1;
        let shown = file.to_string();
        if machine.failures.iter().any(|p| shown.contains(p.as_str())) {
            return Err(HostError::Io {
                path: file.path.clone(),
                message: String::from("injected failure"),
            });
        }
        machine
            .files
            .insert(file.path.clone(), file.contents.clone().into_bytes());
        Ok(())
    }

    async fn http_status(&self, _url: &str) -> Result<Option<u16>, HostError> {
        let machine = self.machine.lock().unwrap();
        Ok(machine.active.contains(&self.web_unit).then_some(303))
    }
}
