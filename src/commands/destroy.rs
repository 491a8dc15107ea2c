use anyhow::{Result, bail};

use super::Session;
use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::{ApplyOptions, PromptConfirm, apply_plan};
use crate::signal;
use crate::ui;
use declarative::CancelToken;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let state = session.load_state()?;
    if state.is_empty() {
        ui::info("Nothing to destroy.");
        return Ok(());
    }

    let plan = session.plan(&state, None, &[], true)?;
    let control_plane = session.connect(ctx)?;

    let cancel = CancelToken::new();
    signal::cancel_on_interrupt(&cancel)?;

    let options = ApplyOptions {
        execute: session.execute_options(args.jobs, false),
        yes: args.yes,
        quiet: ctx.quiet,
    };
    let Some(report) = apply_plan(
        &plan,
        &session.store,
        control_plane.as_ref(),
        &options,
        &mut PromptConfirm,
        &cancel,
    )?
    else {
        return Ok(());
    };

    let failed = report.summary().failed;
    if failed > 0 {
        bail!("destroy finished with {failed} failed resource(s); they remain in state");
    }
    Ok(())
}
