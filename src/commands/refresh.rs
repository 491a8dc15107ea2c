use anyhow::Result;

use super::Session;
use crate::Context;
use crate::engine::display_drift;
use crate::ui;
use declarative::detect_drift;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let state = session.load_state()?;
    if state.is_empty() {
        ui::info("Nothing applied yet.");
        return Ok(());
    }

    let control_plane = session.connect(ctx)?;
    let observed = session.observe(ctx, &state, control_plane.as_ref())?;
    let drift = detect_drift(&state, &observed);
    display_drift(&drift);

    if !drift.is_empty() {
        println!();
        ui::dim("Plan with --refresh to see how the stack would be brought back.");
    }
    Ok(())
}
