//! Report rendering for the terminal

use crate::ui;
use anyhow::Result;
use colored::Colorize;
use compliance::{ComplianceReport, Deviation, HostReport, OutcomeStatus, ReportKind, StateReturn};
use serde::Serialize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

/// Print any serializable value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn title(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Check => "Compliance Check",
        ReportKind::Remediation { dry_run: true } => "Remediation (dry run)",
        ReportKind::Remediation { dry_run: false } => "Remediation",
    }
}

/// Print a report as text
pub fn print_report(report: &ComplianceReport, verbose: u8) {
    ui::header(title(report.kind));

    for host in report.hosts.values() {
        print_host(host, report.kind, verbose);
    }

    ui::section("Summary");
    let summary = &report.summary;
    ui::kv(
        "Generated",
        &report
            .generated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    ui::kv("Hosts", &summary.host_count.to_string());
    ui::kv("Compliant", &summary.compliant_count.to_string().green().to_string());
    if summary.noncompliant_count > 0 {
        ui::kv(
            "Non-compliant",
            &summary.noncompliant_count.to_string().yellow().to_string(),
        );
    }
    if summary.error_count > 0 {
        ui::kv("Errored", &summary.error_count.to_string().red().to_string());
    }
    if matches!(report.kind, ReportKind::Remediation { .. }) {
        ui::kv(
            "Actions",
            &format!(
                "{} succeeded, {} failed, {} skipped",
                summary.actions_succeeded, summary.actions_failed, summary.actions_skipped
            ),
        );
    }
    println!();
}

fn print_host(host: &HostReport, kind: ReportKind, verbose: u8) {
    println!();
    println!(
        "{} {}  {}",
        host.host_id.to_string().bold(),
        format!("({})", host.cluster).dimmed(),
        ui::host_status(host.status)
    );

    let deviations = match kind {
        ReportKind::Remediation { .. } if !host.initial_deviations.is_empty() => {
            &host.initial_deviations
        }
        _ => &host.deviations,
    };
    for deviation in deviations {
        print_deviation(deviation, verbose);
    }

    for outcome in &host.outcomes {
        let mut line = format!(
            "  {} {} {}",
            ui::outcome_symbol(outcome.status),
            outcome.action.label(),
            format!("({})", outcome.action.operation).dimmed()
        );
        if outcome.simulated {
            line.push_str(&format!(" {}", "[simulated]".dimmed()));
        }
        if let Some(reason) = outcome.reason {
            line.push_str(&format!(" {reason}"));
        }
        if let Some(error) = &outcome.error {
            line.push_str(&format!(": {}", error.red()));
        }
        println!("{line}");

        if verbose > 0 {
            for resolution in &outcome.resolutions {
                ui::dim(&format!(
                    "  made '{}' hold ({})",
                    resolution.precondition,
                    resolution.status.to_string().to_lowercase()
                ));
            }
        }
    }

    for restoration in &host.restorations {
        let status = if restoration.status == OutcomeStatus::Succeeded {
            "restored".to_string()
        } else {
            format!(
                "restore failed: {}",
                restoration.error.as_deref().unwrap_or("unknown error")
            )
        };
        ui::dim(&format!("'{}' {status}", restoration.precondition));
    }

    for skip in &host.skipped {
        ui::dim(&format!("{} skipped: {}", skip.category, skip.reason));
    }

    for error in &host.errors {
        let location = match (&error.category, &error.field) {
            (Some(category), Some(field)) => format!(" [{category}/{field}]"),
            (Some(category), None) => format!(" [{category}]"),
            _ => String::new(),
        };
        println!(
            "  {} {:?}{}: {}",
            "✗".red(),
            error.code,
            location,
            error.message
        );
    }
}

fn print_deviation(deviation: &Deviation, verbose: u8) {
    let current = deviation.current_value.as_ref();
    let desired = deviation.desired_value.as_ref();
    println!(
        "  {} {}/{}: {} → {}",
        ui::deviation_symbol(deviation.action),
        deviation.category,
        deviation.field,
        display(current).dimmed(),
        display(desired)
    );

    if verbose > 0 && (is_structured(current) || is_structured(desired)) {
        for (tag, line) in diff_lines(current, desired) {
            match tag {
                ChangeTag::Delete => println!("      {}", format!("- {line}").red()),
                ChangeTag::Insert => println!("      {}", format!("+ {line}").green()),
                ChangeTag::Equal => println!("      {}", format!("  {line}").dimmed()),
            }
        }
    }
}

fn is_structured(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Object(_) | Value::Array(_)))
}

/// Short single-line rendering of a field value
pub fn display(value: Option<&Value>) -> String {
    match value {
        None => "(absent)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Line diff of two values rendered as pretty JSON
pub fn diff_lines(old: Option<&Value>, new: Option<&Value>) -> Vec<(ChangeTag, String)> {
    let pretty = |value: Option<&Value>| {
        value
            .map(|v| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()))
            .unwrap_or_default()
    };
    let old = pretty(old);
    let new = pretty(new);

    TextDiff::from_lines(&old, &new)
        .iter_all_changes()
        .map(|change| (change.tag(), change.value().trim_end_matches('\n').to_string()))
        .collect()
}

/// Print a declarative state return
pub fn print_state_return(ret: &StateReturn) {
    let result = match ret.result {
        Some(true) => "True".green(),
        Some(false) => "False".red(),
        None => "None".yellow(),
    };
    ui::header(&ret.name);
    ui::kv("Result", &result.to_string());
    ui::kv("Comment", &ret.comment);

    let hosts = ret.changes.as_object().map(serde_json::Map::len).unwrap_or(0);
    if hosts == 0 {
        ui::kv("Changes", "none");
    } else {
        ui::section("Changes");
        if let Ok(pretty) = serde_json::to_string_pretty(&ret.changes) {
            for line in pretty.lines() {
                println!("  {line}");
            }
        }
    }
    println!();
}
