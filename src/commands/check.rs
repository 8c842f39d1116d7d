use super::{Session, finish, interruptible};
use crate::Context;
use crate::cli::TargetArgs;
use anyhow::Result;

pub fn run(ctx: &Context, args: &TargetArgs) -> Result<()> {
    let session = Session::open(ctx, args)?;
    let cancel = interruptible()?;
    let report = session
        .engine
        .check_compliance(&session.plane, &session.scope, &session.doc, &cancel)?;
    finish(ctx, args, &report)
}
