// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Odoo Provision
//!
//! Declarative, idempotent provisioning of an Odoo ERP stack on a single
//! Linux host.
//!
//! ## Overview
//!
//! The manual install guide for the stack is a list of shell commands. Run
//! twice, half of them fail: the user exists, the role exists, the clone
//! target is not empty. This crate turns each command into a **step** with a
//! check that decides, from observed host facts, whether the action is still
//! needed:
//!
//! - Probe the host once into a fact snapshot
//! - Order steps by their prerequisites
//! - Apply only the steps whose check does not hold, then re-check them
//! - Report every step as applied, skipped or failed
//!
//! ## Architecture
//!
//! 1. **Fact Prober**: reads packages, users, roles, files, services and the
//!    web endpoint through the [`host::Host`] trait
//! 2. **Step Graph**: validates ids and prerequisites and orders steps
//! 3. **Idempotency Guard**: check, apply, reconfirm for one step
//! 4. **Executor**: runs the ordered steps and blocks dependents of failures
//! 5. **Reporter**: renders the run report as a table or JSON
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and rendering
//! - [`host`]: Host access, fact probing and endpoint health
//! - [`steps`]: Step model and the standard step catalog
//! - [`planner`]: Step graph, idempotency guard and executor
//! - [`provisioner`]: Full runs, dry-run plans and status
//! - [`state`]: Persisted run log
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! server:
//!   admin_passwd: change-me
//!   addons_path:
//!     - /opt/odoo/odoo/addons
//!     - /opt/odoo/custom-addons
//! database:
//!   user: odoo
//! app:
//!   branch: "17.0"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod planner;
pub mod provisioner;
pub mod state;
pub mod steps;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, ProvisionConfig};
pub use error::{ProvisionError, Result};
pub use host::{FactProber, Host, HostFacts, SystemHost};
pub use planner::{IdempotencyGuard, RunReport, StepExecutor, StepGraph};
pub use provisioner::{ProvisionPlan, Provisioner, StackStatus};
pub use state::{LocalStateStore, ProvisionState, StateStore};
pub use steps::{Step, StepId, build_steps};
