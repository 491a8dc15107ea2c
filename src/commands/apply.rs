use anyhow::{Result, bail};

use super::Session;
use super::plan::SavedPlan;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{ApplyOptions, PromptConfirm, apply_plan, print_hooks, run_hooks};
use crate::runner::ProcessRunner;
use crate::signal;
use crate::ui;
use declarative::CancelToken;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let state = session.load_state()?;
    let control_plane = session.connect(ctx)?;

    let plan = match &args.plan {
        Some(path) => {
            let saved = SavedPlan::read(path, &session.stack.name)?;
            ui::info(&format!(
                "Applying plan saved at {}",
                saved.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            saved.plan
        }
        None => {
            let observed = if args.refresh && !state.is_empty() {
                Some(session.observe(ctx, &state, control_plane.as_ref())?)
            } else {
                None
            };
            session.plan(&state, observed.as_ref(), &args.targets, false)?
        }
    };

    let cancel = CancelToken::new();
    signal::cancel_on_interrupt(&cancel)?;

    let options = ApplyOptions {
        execute: session.execute_options(args.jobs, args.dry_run),
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
    if args.dry_run {
        return Ok(());
    }

    let mut hooks_failed = 0;
    if !args.no_hooks && !session.stack.hooks.is_empty() {
        let applied = session.load_state()?;
        let outcomes = run_hooks(
            &session.stack.hooks,
            &report,
            &applied,
            &ProcessRunner,
            &options.execute.retry,
            &cancel,
        );
        print_hooks(&outcomes);
        hooks_failed = outcomes.iter().filter(|o| o.is_failure()).count();
    }

    let failed = report.summary().failed;
    if failed > 0 || hooks_failed > 0 {
        bail!("apply finished with {failed} failed resource(s) and {hooks_failed} failed hook(s)");
    }
    if cancel.is_cancelled() {
        bail!("apply was interrupted; run apply again to finish");
    }
    Ok(())
}
