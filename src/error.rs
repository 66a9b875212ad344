//! Error types for the provisioning system.
//!
//! Two layers of errors exist. [`ProvisionError`] aborts a command before any
//! step runs (bad configuration, an invalid step graph) or after the report
//! is produced (the run log cannot be written). [`StepError`] is local to one
//! step: it is recorded in that step's result and never aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit code for a run where every step is satisfied.
pub const EXIT_OK: u8 = 0;

/// Process exit code for a run where one or more steps failed.
pub const EXIT_FAILED: u8 = 1;

/// Process exit code for invalid input configuration.
pub const EXIT_INVALID_INPUT: u8 = 2;

/// The main error type for the provisioning system.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Step graph errors.
    #[error("Step graph error: {0}")]
    Graph(#[from] GraphError),

    /// Host access errors outside of a step.
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// Errors raised while building or ordering the step graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two steps share an identifier.
    #[error("Duplicate step id: {id}")]
    DuplicateStep {
        /// The duplicated id.
        id: String,
    },

    /// A step names a prerequisite that does not exist.
    #[error("Step '{step}' requires unknown step '{prerequisite}'")]
    UnknownPrerequisite {
        /// The step declaring the prerequisite.
        step: String,
        /// The missing prerequisite.
        prerequisite: String,
    },

    /// The dependency relation is cyclic.
    #[error("Circular dependency detected: {cycle}")]
    Cycle {
        /// The cycle path, e.g. `a -> b -> a`.
        cycle: String,
    },
}

/// Errors from the host access layer (process spawning, files, HTTP).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A command could not be started.
    #[error("Failed to run '{program}': {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        message: String,
    },

    /// A filesystem operation failed.
    #[error("Filesystem error on {path}: {message}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// A command ran but its result could not be interpreted.
    #[error("Unexpected result from `{command}`: {message}")]
    Command {
        /// Display form of the command (secrets redacted).
        command: String,
        /// What was unexpected.
        message: String,
    },

    /// The HTTP client could not be built or used.
    #[error("HTTP error for {url}: {message}")]
    Http {
        /// Target URL.
        url: String,
        /// Underlying error.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The state directory or file could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Failure of a single step. Recorded in the run report, never propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Host state needed by the check could not be determined.
    #[error("cannot determine {fact}: {message}")]
    Probe {
        /// The fact that could not be probed.
        fact: String,
        /// Why probing failed.
        message: String,
    },

    /// A prerequisite step never reached the satisfied state.
    #[error("prerequisite '{prerequisite}' was not satisfied")]
    PrerequisiteUnmet {
        /// The first unmet prerequisite.
        prerequisite: String,
    },

    /// The apply action itself failed.
    #[error("{operation} failed: {message}")]
    Apply {
        /// Display form of the failing operation (secrets redacted).
        operation: String,
        /// What went wrong.
        message: String,
    },

    /// The action ran but the check still does not hold.
    #[error("still unsatisfied after apply: {reason}")]
    Postcondition {
        /// Why the check is still unsatisfied.
        reason: String,
    },

    /// The run deadline passed before this step started.
    #[error("run deadline of {timeout_secs}s exceeded before the step started")]
    RunTimeout {
        /// Configured run timeout.
        timeout_secs: u64,
    },
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Returns the process exit code for this error.
    ///
    /// Input problems (configuration and step graph) map to
    /// [`EXIT_INVALID_INPUT`]; everything else to [`EXIT_FAILED`].
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Graph(_) => EXIT_INVALID_INPUT,
            _ => EXIT_FAILED,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl HostError {
    /// Creates a filesystem error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl StepError {
    /// Returns the failure category used in reports.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Probe { .. } => FailureKind::Probe,
            Self::PrerequisiteUnmet { .. } => FailureKind::PrerequisiteUnmet,
            Self::Apply { .. } => FailureKind::Apply,
            Self::Postcondition { .. } => FailureKind::Postcondition,
            Self::RunTimeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Failure categories of a step, in report form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Host state could not be determined.
    Probe,
    /// A prerequisite was not satisfied.
    PrerequisiteUnmet,
    /// The action failed.
    Apply,
    /// The action ran but the check still fails.
    Postcondition,
    /// The run deadline passed.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Probe => "probe error",
            Self::PrerequisiteUnmet => "prerequisite unmet",
            Self::Apply => "apply error",
            Self::Postcondition => "postcondition error",
            Self::Timeout => "timed out",
        };
        write!(f, "{s}")
    }
}
