//! Progress indicators for vconverge runs.

use colored::Colorize;
use compliance::{HostId, HostReport, HostStatus, Outcome, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// One bar per run, ticking once per finished host
pub struct HostProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl HostProgress {
    pub fn new(hidden: bool, verbose: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            bar
        };
        Self { bar, verbose }
    }
}

impl ProgressCallback for HostProgress {
    fn on_run_start(&self, host_count: usize) {
        self.bar.set_length(host_count as u64);
        self.bar.set_position(0);
        self.bar.reset_elapsed();
    }

    fn on_host_start(&self, host: &HostId) {
        self.bar.set_message(host.to_string());
    }

    fn on_action_complete(&self, host: &HostId, outcome: &Outcome) {
        if outcome.is_failed() {
            self.bar.println(format!(
                "{} {}: {} failed: {}",
                "✗".red(),
                host,
                outcome.action.label(),
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        } else if self.verbose {
            self.bar.println(format!(
                "  {} {}: {} {}",
                "·".dimmed(),
                host,
                outcome.action.label(),
                outcome.status.to_string().to_lowercase().dimmed()
            ));
        }
    }

    fn on_host_complete(&self, report: &HostReport) {
        if report.status == HostStatus::Errored
            && report.outcomes.is_empty()
            && let Some(error) = report.errors.first()
        {
            self.bar
                .println(format!("{} {}: {}", "⚠".yellow(), report.host_id, error.message));
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self) {
        self.bar.finish_and_clear();
    }
}
