//! Command and file descriptions handed to the [`Host`](super::Host).
//!
//! Every privileged operation carries an explicit [`Credential`]. The system
//! host maps it to `runuser` or `sudo`; test hosts just record it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Placeholder shown instead of secret arguments and file contents.
pub const REDACTED: &str = "<redacted>";

/// The identity an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// The superuser.
    #[default]
    Root,
    /// A named system user.
    User(String),
}

/// A command to run on the host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Text written to standard input. Never logged.
    pub stdin: Option<String>,
    /// Identity to run as.
    pub run_as: Credential,
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// A file to install on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// Destination path.
    pub path: PathBuf,
    /// Full file contents.
    pub contents: String,
    /// Permission bits.
    pub mode: u32,
    /// Owning user; root when absent.
    pub owner: Option<String>,
    /// Owning group; root when absent.
    pub group: Option<String>,
}

impl CommandSpec {
    /// Creates a command running as root.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            run_as: Credential::Root,
        }
    }

    /// Builds a command from an argv vector. Returns `None` for an empty vector.
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feeds text to standard input.
    ///
    /// Secrets belong here rather than in `args`, which other users can
    /// read from the process table.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Sets the identity to run as.
    #[must_use]
    pub fn run_as(mut self, credential: Credential) -> Self {
        self.run_as = credential;
        self
    }

}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Credential::User(user) = &self.run_as {
            write!(f, "[{user}] ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if self.stdin.is_some() {
            write!(f, " < {REDACTED}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::User(user) => write!(f, "{user}"),
        }
    }
}

impl CommandOutput {
    /// Exit code reported when the program does not exist, as a shell would.
    pub const NOT_FOUND: i32 = 127;

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Returns the last non-empty line of stderr, falling back to stdout.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let last_line = |s: &str| {
            s.lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        };
        let detail = last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_else(|| String::from("no output"));
        match self.status {
            Some(code) => format!("exit status {code}: {detail}"),
            None => format!("terminated by signal: {detail}"),
        }
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write {} (mode {:o})", self.path.display(), self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_redacts_stdin() {
        let cmd = CommandSpec::new("psql")
            .args(["-X", "-q"])
            .stdin("ALTER ROLE odoo WITH PASSWORD 'hunter2';")
            .run_as(Credential::User(String::from("postgres")));
        let shown = cmd.to_string();
        assert_eq!(shown, "[postgres] psql -X -q < <redacted>");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_from_argv() {
        let argv = vec![String::from("systemctl"), String::from("is-active"), String::from("odoo")];
        let cmd = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(cmd.program, "systemctl");
        assert_eq!(cmd.args, vec!["is-active", "odoo"]);
        assert!(CommandSpec::from_argv(&[]).is_none());
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let output = CommandOutput {
            status: Some(100),
            stdout: String::from("Reading package lists...\n"),
            stderr: String::from("E: Unable to locate package nope\n\n"),
        };
        assert_eq!(
            output.diagnostic(),
            "exit status 100: E: Unable to locate package nope"
        );
    }
}
