pub mod categories;
pub mod check;
pub mod remediate;
pub mod state;
pub mod validate;

use crate::Context;
use crate::cli::{OutputFormat, TargetArgs};
use crate::inventory::InventoryPlane;
use crate::progress::HostProgress;
use crate::{render, ui};
use anyhow::{Context as _, Result, bail};
use compliance::{CancellationToken, ComplianceReport, DesiredStateDocument, Engine, Registry, Scope};
use std::sync::Arc;

/// Everything a run needs, resolved from flags and config
pub struct Session {
    pub engine: Engine,
    pub plane: InventoryPlane,
    pub scope: Scope,
    pub doc: DesiredStateDocument,
}

impl Session {
    pub fn open(ctx: &Context, target: &TargetArgs) -> Result<Self> {
        let config = &ctx.config;

        let doc = DesiredStateDocument::load(&target.desired).with_context(|| {
            format!("Failed to load desired state: {}", target.desired.display())
        })?;

        let clusters = if target.clusters.is_empty() {
            config.clusters.clone()
        } else {
            target.clusters.clone()
        };
        if clusters.is_empty() {
            bail!("No clusters given. Pass --cluster or set `clusters` in the config file");
        }
        let scope = Scope::new(clusters)?.with_hosts(target.hosts.iter().cloned());

        let Some(inventory) = config.inventory_path(target.inventory.as_deref()) else {
            bail!("No inventory given. Pass --inventory or set `inventory` in the config file");
        };

        let options = config.engine_options(target.jobs, target.timeout, target.reject_unknown);
        let registry = Registry::builtin()?;
        let plane = InventoryPlane::load(&inventory, registry.clone())?;

        let hidden = ctx.quiet || target.format == OutputFormat::Json;
        let engine = Engine::new(registry, options)
            .with_progress(Arc::new(HostProgress::new(hidden, ctx.verbose > 0)));

        log::info!(
            "{} categories in document, {} clusters in scope",
            doc.categories.len(),
            scope.clusters().len()
        );
        if let Some(hosts) = scope.hosts() {
            log::info!("Limited to {} hosts", hosts.len());
        }
        Ok(Self {
            engine,
            plane,
            scope,
            doc,
        })
    }

    /// Write back the inventory after a mutating run
    pub fn save(&self, ctx: &Context) -> Result<()> {
        if self.plane.save()?
            && !ctx.quiet
            && let Some(path) = self.plane.path()
        {
            ui::dim(&format!("Inventory updated: {}", path.display()));
        }
        Ok(())
    }
}

/// Token cancelled on Ctrl-C or SIGTERM.
///
/// The first signal lets in-flight actions finish and reverts resolved
/// preconditions; a second one exits immediately.
pub fn interruptible() -> Result<CancellationToken> {
    let cancel = CancellationToken::new();
    ctrlc::set_handler(on_interrupt(cancel.clone())).context("Failed to install Ctrl-C handler")?;
    Ok(cancel)
}

fn on_interrupt(cancel: CancellationToken) -> impl FnMut() + Send + 'static {
    move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        log::warn!("Interrupted, finishing in-flight actions (press Ctrl-C again to abort)");
        cancel.cancel();
    }
}

/// Render a report and turn non-compliance into an error under `--strict`
pub fn finish(ctx: &Context, target: &TargetArgs, report: &ComplianceReport) -> Result<()> {
    match target.format {
        OutputFormat::Json => render::print_json(report)?,
        OutputFormat::Text => {
            if !ctx.quiet || !report.is_compliant() {
                render::print_report(report, ctx.verbose);
            }
            if report.is_compliant() {
                ui::success("All hosts compliant");
            } else if report.has_errors() {
                ui::warn(&format!("{} hosts errored", report.summary.error_count));
            }
        }
    }

    if target.strict && !report.is_compliant() {
        bail!(
            "{} of {} hosts not compliant",
            report.summary.host_count - report.summary.compliant_count,
            report.summary.host_count
        );
    }
    Ok(())
}
