//! Provisioning steps and the standard catalog.

pub mod catalog;
mod step;

pub use catalog::{build_steps, standard_steps, STANDARD_STEP_IDS};
pub use step::{Check, Operation, Step, StepId, Verdict};
