use colored::{ColoredString, Colorize};
use compliance::{DeviationKind, HostStatus, OutcomeStatus};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored host status label
pub fn host_status(status: HostStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        HostStatus::Compliant => label.green().bold(),
        HostStatus::NonCompliant => label.yellow().bold(),
        HostStatus::Errored => label.red().bold(),
    }
}

/// Symbol for a deviation kind, as in a diff
pub fn deviation_symbol(kind: DeviationKind) -> ColoredString {
    match kind {
        DeviationKind::Add => "+".green(),
        DeviationKind::Change => "~".yellow(),
        DeviationKind::Remove => "-".red(),
    }
}

/// Symbol for an outcome status
pub fn outcome_symbol(status: OutcomeStatus) -> ColoredString {
    match status {
        OutcomeStatus::Succeeded => "✓".green(),
        OutcomeStatus::Failed => "✗".red(),
        OutcomeStatus::Skipped => "○".dimmed(),
    }
}
