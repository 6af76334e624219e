//! Output formatters for verdicts.

use crate::report::{describe_family, Verdict};
use cellgate_core::AuditEvent;
use clap::ValueEnum;
use comfy_table::{Cell, Table};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the verdict of a `check`.
    fn format_verdict(&self, verdict: &Verdict) -> String;

    /// Format the result of a `validate`.
    fn format_validation(&self, rules: usize, audit_unmatched: bool) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_verdict(&self, verdict: &Verdict) -> String {
        let mut output = format!("Verdict: {}", verdict.outcome);
        if let Some(reason) = &verdict.denial_reason {
            output.push_str(&format!("\nReason: {}", reason));
        }

        if !verdict.families.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Family", "Access"]);
            for (family, access) in &verdict.families {
                table.add_row(vec![Cell::new(family), Cell::new(describe_family(access))]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }

        let events: Vec<(&str, &AuditEvent)> = verdict
            .granted_events
            .iter()
            .map(|e| ("granted", e))
            .chain(verdict.family_level_granted_events.iter().map(|e| ("family", e)))
            .chain(verdict.denied_event.iter().map(|e| ("denied", e)))
            .collect();

        if !events.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Kind", "Resource", "Access", "Policy", "User"]);
            for (kind, event) in events {
                table.add_row(vec![
                    Cell::new(kind),
                    Cell::new(&event.resource),
                    Cell::new(&event.access_type),
                    Cell::new(event.policy_id.map_or_else(|| "-".to_string(), |id| id.to_string())),
                    Cell::new(&event.user),
                ]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }

        output
    }

    fn format_validation(&self, rules: usize, audit_unmatched: bool) -> String {
        format!(
            "{} rule(s) OK (audit unmatched: {})",
            rules,
            if audit_unmatched { "yes" } else { "no" }
        )
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_verdict(&self, verdict: &Verdict) -> String {
        serde_json::to_string_pretty(verdict).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    fn format_validation(&self, rules: usize, audit_unmatched: bool) -> String {
        serde_json::json!({
            "valid": true,
            "rules": rules,
            "audit_unmatched": audit_unmatched,
        })
        .to_string()
    }
}
