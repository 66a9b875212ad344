//! Output formatting for CLI commands.
//!
//! This module renders run reports, plans, facts and status either as
//! colored tables for a terminal or as JSON for scripting.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ProvisionConfig, ValidationResult};
use crate::host::{FactValue, HostFacts};
use crate::planner::{AggregateStatus, Outcome, RunReport};
use crate::provisioner::{PlannedAction, ProvisionPlan, StackStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Step result row for table display.
#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

#[derive(Tabled)]
struct FactRow {
    #[tabled(rename = "Fact")]
    fact: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Finished")]
    finished: String,
    #[tabled(rename = "Run")]
    run: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Applied")]
    applied: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a run report.
    ///
    /// Failed steps point to a numbered diagnostic printed below the table.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();
        let mut diagnostics = Vec::new();

        let _ = write!(output, "\nProvisioning run {}\n", short_id(&report.run_id.to_string()));
        let _ = write!(
            output,
            "   Host: {}  Config hash: {}\n\n",
            report.hostname,
            short_hash(&report.config_hash)
        );

        let rows: Vec<ReportRow> = report
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let details = match &r.outcome {
                    Outcome::Failed { diagnostic, .. } => {
                        diagnostics.push((r.step_id.to_string(), diagnostic.clone()));
                        format!("see [{}]", diagnostics.len())
                    }
                    _ => r.description.clone(),
                };
                ReportRow {
                    index: i + 1,
                    step: r.step_id.to_string(),
                    outcome: Self::color_outcome(&r.outcome),
                    details: truncate(&details, 60),
                }
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !diagnostics.is_empty() {
            let _ = write!(output, "\n{} Diagnostics:\n", "✗".red());
            for (i, (step, message)) in diagnostics.iter().enumerate() {
                let _ = writeln!(output, "   [{}] {step}: {message}", i + 1);
            }
        }

        let _ = write!(
            output,
            "\nResult: {} ({} applied, {} skipped, {} failed) in {} ms\n",
            Self::color_status(report.status()),
            report.applied_count(),
            report.skipped_count(),
            report.failed_count(),
            report.duration_ms()
        );

        if let Some(health) = &report.service_health {
            if health.healthy {
                let _ = writeln!(output, "{} Web endpoint ready: {}", "✓".green(), health.url);
            } else {
                let answered = health
                    .status_code
                    .map_or_else(|| String::from("no answer"), |s| format!("HTTP {s}"));
                let _ = writeln!(output, "{} Web endpoint {}: {answered}", "⚠".yellow(), health.url);
            }
        }

        if report.status() != AggregateStatus::AllSatisfied {
            let _ = writeln!(output, "   See the application log for details: {}", report.app_log);
        }

        output
    }

    /// Formats a dry-run plan.
    #[must_use]
    pub fn format_plan(&self, plan: &ProvisionPlan) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &ProvisionPlan) -> String {
        if plan.is_converged() {
            return format!(
                "{} No changes required - every step is already satisfied.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nProvisioning plan\n");
        let _ = write!(output, "   Config hash: {}\n\n", short_hash(&plan.config_hash));

        let rows: Vec<PlanRow> = plan
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let (action, reason) = match &e.action {
                    PlannedAction::AlreadySatisfied => ("ok".dimmed().to_string(), String::new()),
                    PlannedAction::WillApply { reason } => ("+apply".green().to_string(), reason.clone()),
                    PlannedAction::Unknown { diagnostic } => ("?unknown".yellow().to_string(), diagnostic.clone()),
                };
                PlanRow {
                    index: i + 1,
                    step: e.step_id.to_string(),
                    action,
                    reason: truncate(&reason, 60),
                }
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} of {} steps to apply\n",
            plan.apply_count().to_string().green(),
            plan.entries.len()
        );
        output
    }

    /// Formats a fact snapshot.
    #[must_use]
    pub fn format_facts(&self, facts: &HostFacts) -> String {
        let mut rows: Vec<FactJson> = facts
            .values()
            .map(|(key, value)| FactJson {
                fact: key.to_string(),
                value: Some(fact_value_json(value)),
                error: None,
            })
            .chain(facts.failures().map(|(key, message)| FactJson {
                fact: key.to_string(),
                value: None,
                error: Some(message.clone()),
            }))
            .collect();
        rows.sort_by(|a, b| a.fact.cmp(&b.fact));

        match self.format {
            OutputFormat::Json => to_json(&FactsJson {
                probed_at: facts.probed_at().to_rfc3339(),
                facts: rows,
            }),
            OutputFormat::Text => {
                let table_rows: Vec<FactRow> = rows
                    .into_iter()
                    .map(|f| FactRow {
                        fact: f.fact,
                        value: match (f.value, f.error) {
                            (_, Some(error)) => format!("{} {}", "error:".red(), truncate(&error, 50)),
                            (Some(value), None) => value.to_string(),
                            (None, None) => String::new(),
                        },
                    })
                    .collect();
                format!(
                    "\nHost facts ({})\n\n{}\n",
                    facts.probed_at().format("%Y-%m-%d %H:%M:%S UTC"),
                    Table::new(table_rows)
                )
            }
        }
    }

    /// Formats stack status.
    #[must_use]
    pub fn format_status(&self, status: &StackStatus) -> String {
        match self.format {
            OutputFormat::Json => to_json(status),
            OutputFormat::Text => {
                let mut output = String::from("\nStack status\n\n");
                for unit in &status.units {
                    let _ = writeln!(
                        output,
                        "   {:<24} {} / {}",
                        unit.unit,
                        Self::color_flag(unit.enabled, "enabled", "disabled"),
                        Self::color_flag(unit.active, "active", "inactive")
                    );
                }

                let endpoint = match status.endpoint.status_code {
                    Some(code) if status.endpoint.healthy => format!("HTTP {code}").green().to_string(),
                    Some(code) => format!("HTTP {code}").red().to_string(),
                    None => "no answer".red().to_string(),
                };
                let _ = writeln!(output, "   {:<24} {endpoint}", status.endpoint.url);

                match (status.last_run_at, status.last_run_status) {
                    (Some(at), Some(run_status)) => {
                        let _ = write!(
                            output,
                            "\nLast run: {} ({})\n",
                            at.format("%Y-%m-%d %H:%M"),
                            Self::color_status(run_status)
                        );
                    }
                    _ => output.push_str("\nNo recorded runs.\n"),
                }
                output
            }
        }
    }

    /// Formats the most recent runs, newest first.
    #[must_use]
    pub fn format_history(&self, history: &[RunReport], limit: usize) -> String {
        let recent: Vec<&RunReport> = history.iter().rev().take(limit).collect();
        match self.format {
            OutputFormat::Json => to_json(&recent),
            OutputFormat::Text => {
                if recent.is_empty() {
                    return String::from("No recorded runs.\n");
                }
                let rows: Vec<HistoryRow> = recent
                    .iter()
                    .map(|r| HistoryRow {
                        finished: r.finished_at.format("%Y-%m-%d %H:%M").to_string(),
                        run: short_id(&r.run_id.to_string()).to_string(),
                        status: Self::color_status(r.status()),
                        applied: r.applied_count(),
                        skipped: r.skipped_count(),
                        failed: r.failed_count(),
                    })
                    .collect();
                format!(
                    "\nRun history ({} of {})\n\n{}\n",
                    recent.len(),
                    history.len(),
                    Table::new(rows)
                )
            }
        }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        config: &ProvisionConfig,
        step_count: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: result.warnings.clone(),
                steps: step_count,
            }),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "   Service: {}", config.unit_name());
                let _ = writeln!(output, "   Config file: {}", config.server.config_path.display());
                let _ = writeln!(output, "   Database role: {}", config.database.user);
                let _ = writeln!(output, "   Source: {} ({})", config.app.repository, config.app.branch);
                let _ = writeln!(output, "   Steps: {step_count} ({} custom)", config.custom_steps.len());
                let _ = writeln!(output, "   Endpoint: {}", config.endpoint_url());
                output
            }
        }
    }

    /// Formats a rendered file.
    #[must_use]
    pub fn format_rendered(&self, path: &str, contents: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "path": path, "contents": contents })),
            OutputFormat::Text => contents.to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    fn message(&self, status: &str, symbol: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }

    /// Formats an outcome with color.
    fn color_outcome(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Applied => outcome.label().green().to_string(),
            Outcome::SkippedAlreadySatisfied => outcome.label().dimmed().to_string(),
            Outcome::Failed { .. } => outcome.label().red().to_string(),
        }
    }

    fn color_status(status: AggregateStatus) -> String {
        match status {
            AggregateStatus::AllSatisfied => status.to_string().green().to_string(),
            AggregateStatus::Partial => status.to_string().yellow().to_string(),
            AggregateStatus::Failed => status.to_string().red().to_string(),
        }
    }

    fn color_flag(flag: Option<bool>, on: &str, off: &str) -> String {
        match flag {
            Some(true) => on.green().to_string(),
            Some(false) => off.red().to_string(),
            None => "unknown".yellow().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn fact_value_json(value: &FactValue) -> serde_json::Value {
    match value {
        FactValue::Flag(flag) => serde_json::Value::Bool(*flag),
        FactValue::Digest(digest) => digest
            .as_deref()
            .map_or(serde_json::Value::Null, |d| serde_json::Value::String(d.to_string())),
        FactValue::HttpStatus(status) => status.map_or(serde_json::Value::Null, serde_json::Value::from),
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct FactsJson {
    probed_at: String,
    facts: Vec<FactJson>,
}

#[derive(Serialize)]
struct FactJson {
    fact: String,
    value: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ValidationJson {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    steps: usize,
}
