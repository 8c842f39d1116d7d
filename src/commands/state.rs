use super::{Session, interruptible};
use crate::Context;
use crate::cli::{OutputFormat, StateArgs};
use crate::render;
use anyhow::{Result, bail};
use compliance::check_control;

/// Run a control as a declarative state and print its return
pub fn run(ctx: &Context, args: &StateArgs) -> Result<()> {
    let session = Session::open(ctx, &args.target)?;
    let cancel = interruptible()?;
    let ret = check_control(
        &args.name,
        &session.engine,
        &session.plane,
        &session.scope,
        &session.doc,
        args.test,
        &cancel,
    );

    if !args.test && !args.no_save {
        session.save(ctx)?;
    }

    match args.target.format {
        OutputFormat::Json => render::print_json(&ret)?,
        OutputFormat::Text => render::print_state_return(&ret),
    }

    if args.target.strict && ret.result != Some(true) {
        bail!("{}: {}", ret.name, ret.comment);
    }
    Ok(())
}
