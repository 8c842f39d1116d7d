use super::{Session, finish, interruptible};
use crate::Context;
use crate::cli::{ApplyArgs, OutputFormat, RemediateArgs};
use crate::{render, ui};
use anyhow::{Result, bail};
use compliance::CancellationToken;
use dialoguer::Confirm;

/// Remediate every host in scope
pub fn run(ctx: &Context, args: &RemediateArgs) -> Result<()> {
    let session = Session::open(ctx, &args.target)?;
    if !confirm(ctx, &session, args)? {
        return Ok(());
    }

    let cancel = interruptible()?;
    let report = session.engine.remediate(
        &session.plane,
        &session.scope,
        &session.doc,
        args.dry_run,
        &cancel,
    )?;
    complete(ctx, &session, args)?;
    finish(ctx, &args.target, &report)
}

/// Check first, then remediate the hosts found non-compliant
pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let remediate = &args.remediate;
    let session = Session::open(ctx, &remediate.target)?;
    if !confirm(ctx, &session, remediate)? {
        return Ok(());
    }

    let cancel = interruptible()?;
    let report = session.engine.apply_configuration(
        &session.plane,
        &session.scope,
        &session.doc,
        remediate.dry_run,
        !args.no_check_first,
        &cancel,
    )?;
    complete(ctx, &session, remediate)?;
    finish(ctx, &remediate.target, &report)
}

/// Preview deviations and ask before changing anything.
///
/// Returns false when the user declined.
fn confirm(ctx: &Context, session: &Session, args: &RemediateArgs) -> Result<bool> {
    if args.dry_run || args.yes {
        return Ok(true);
    }
    if args.target.format == OutputFormat::Json {
        bail!("Refusing to prompt for confirmation with --format json; pass --yes");
    }

    let preview = session
        .engine
        .check_compliance(
            &session.plane,
            &session.scope,
            &session.doc,
            &CancellationToken::new(),
        )?;
    if preview.summary.noncompliant_count == 0 {
        log::info!("No non-compliant hosts, nothing to confirm");
        return Ok(true);
    }

    render::print_report(&preview, ctx.verbose);
    let proceed = Confirm::new()
        .with_prompt(format!(
            "Remediate {} non-compliant hosts?",
            preview.summary.noncompliant_count
        ))
        .default(false)
        .interact()?;
    if !proceed {
        ui::error("Aborted");
    }
    Ok(proceed)
}

fn complete(ctx: &Context, session: &Session, args: &RemediateArgs) -> Result<()> {
    if args.dry_run {
        if args.target.format == OutputFormat::Text && !ctx.quiet {
            ui::info("Dry run - no changes made");
        }
        return Ok(());
    }
    if args.no_save {
        log::info!("Not saving inventory (--no-save)");
        return Ok(());
    }
    session.save(ctx)
}
