//! CLI module for the odoo-provision tool.
//!
//! This module provides the command-line interface for provisioning and
//! inspecting a single-host Odoo stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, InputArgs, OutputFormat, RenderTarget};
pub use output::OutputFormatter;
