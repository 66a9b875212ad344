//! Planning and execution of provisioning steps.
//!
//! This module orders steps by their prerequisites, guards each step with
//! its check, and records outcomes for the report.

mod executor;
mod graph;
mod guard;
mod outcome;

pub use executor::StepExecutor;
pub use graph::StepGraph;
pub use guard::{Guarded, IdempotencyGuard};
pub use outcome::{AggregateStatus, Outcome, RunReport, RunResult, ServiceHealth, StepPhase};
